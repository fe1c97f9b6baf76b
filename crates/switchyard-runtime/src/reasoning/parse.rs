//! Lenient parsing of layer output.
//!
//! Models do not always follow the requested JSON format. Parsing falls
//! back in order: the whole text (code fence removed) as JSON, the
//! outermost `{...}` span as JSON, `ANSWER:` and `CONFIDENCE:` lines, and
//! finally the raw text with the layer's default confidence.

use serde_json::Value as JsonValue;
use switchyard_core::analysis::patterns::strip_code_fence;

/// A layer's answer as parsed from model output.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReasoning {
    pub answer: String,

    /// In [0, 1]
    pub confidence: f64,

    pub steps: Vec<String>,
    pub assumptions: Vec<String>,
}

/// Parse model output. Never fails.
pub fn parse_reasoning(text: &str, default_confidence: f64) -> ParsedReasoning {
    let default_confidence = unit(default_confidence).unwrap_or(0.5);
    let body = strip_code_fence(text).unwrap_or_else(|| text.trim().to_string());

    if let Some(parsed) = from_json(&body, default_confidence) {
        return parsed;
    }

    if let (Some(start), Some(end)) = (body.find('{'), body.rfind('}')) {
        if start < end {
            if let Some(parsed) = from_json(&body[start..=end], default_confidence) {
                return parsed;
            }
        }
    }

    if let Some(parsed) = from_labelled_lines(&body, default_confidence) {
        return parsed;
    }

    ParsedReasoning {
        answer: body,
        confidence: default_confidence,
        steps: Vec::new(),
        assumptions: Vec::new(),
    }
}

fn from_json(text: &str, default_confidence: f64) -> Option<ParsedReasoning> {
    let value: JsonValue = serde_json::from_str(text).ok()?;
    let object = value.as_object()?;
    let answer = match object.get("answer")? {
        JsonValue::String(s) => s.trim().to_string(),
        JsonValue::Null => return None,
        other => other.to_string(),
    };

    let confidence = object
        .get("confidence")
        .and_then(confidence_value)
        .unwrap_or(default_confidence);

    Some(ParsedReasoning {
        answer,
        confidence,
        steps: string_list(object.get("steps")),
        assumptions: string_list(object.get("assumptions")),
    })
}

fn confidence_value(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64().and_then(unit),
        JsonValue::String(s) => parse_confidence(s),
        _ => None,
    }
}

fn string_list(value: Option<&JsonValue>) -> Vec<String> {
    match value {
        Some(JsonValue::Array(items)) => items
            .iter()
            .map(|item| match item {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(JsonValue::String(s)) if !s.trim().is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn from_labelled_lines(text: &str, default_confidence: f64) -> Option<ParsedReasoning> {
    let mut answer = None;
    let mut confidence = None;

    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = strip_label(line, "answer:") {
            answer.get_or_insert_with(|| rest.to_string());
        } else if let Some(rest) = strip_label(line, "confidence:") {
            if confidence.is_none() {
                confidence = parse_confidence(rest);
            }
        }
    }

    Some(ParsedReasoning {
        answer: answer?,
        confidence: confidence.unwrap_or(default_confidence),
        steps: Vec::new(),
        assumptions: Vec::new(),
    })
}

fn strip_label<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let head = line.get(..label.len())?;
    head.eq_ignore_ascii_case(label)
        .then(|| line[label.len()..].trim())
}

/// `0.85`, `85%` or `85` (read as a percentage).
fn parse_confidence(text: &str) -> Option<f64> {
    let text = text.trim();
    if let Some(percent) = text.strip_suffix('%') {
        return percent.trim().parse::<f64>().ok().and_then(|p| unit(p / 100.0));
    }
    let value: f64 = text.parse().ok()?;
    if value > 1.0 && value <= 100.0 {
        unit(value / 100.0)
    } else {
        unit(value)
    }
}

fn unit(value: f64) -> Option<f64> {
    value.is_finite().then(|| value.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_plain_json() {
        let parsed = parse_reasoning(
            r#"{"answer": "16", "confidence": 0.9, "steps": ["4*4"], "assumptions": []}"#,
            0.5,
        );
        assert_eq!(parsed.answer, "16");
        assert_eq!(parsed.confidence, 0.9);
        assert_eq!(parsed.steps, vec!["4*4"]);
    }

    #[test]
    fn test_fenced_json_with_numeric_answer() {
        let parsed = parse_reasoning("```json\n{\"answer\": 16, \"confidence\": \"80%\"}\n```", 0.5);
        assert_eq!(parsed.answer, "16");
        assert!((parsed.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_json_embedded_in_prose() {
        let parsed = parse_reasoning(
            "Sure! Here you go: {\"answer\": \"Paris\", \"confidence\": 0.95} Hope that helps.",
            0.5,
        );
        assert_eq!(parsed.answer, "Paris");
        assert_eq!(parsed.confidence, 0.95);
    }

    #[test]
    fn test_labelled_lines() {
        let parsed = parse_reasoning("Let me think.\nANSWER: 42\nConfidence: 70", 0.5);
        assert_eq!(parsed.answer, "42");
        assert!((parsed.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_raw_text_fallback() {
        let parsed = parse_reasoning("  It is 16.  ", 0.6);
        assert_eq!(parsed.answer, "It is 16.");
        assert_eq!(parsed.confidence, 0.6);
    }

    #[test]
    fn test_json_without_answer_falls_through() {
        let parsed = parse_reasoning(r#"{"result": 3}"#, 0.4);
        assert_eq!(parsed.answer, r#"{"result": 3}"#);
        assert_eq!(parsed.confidence, 0.4);
    }

    proptest! {
        #[test]
        fn confidence_always_in_unit_interval(text in ".*", default in -2.0f64..2.0) {
            let parsed = parse_reasoning(&text, default);
            prop_assert!((0.0..=1.0).contains(&parsed.confidence));
        }
    }
}
