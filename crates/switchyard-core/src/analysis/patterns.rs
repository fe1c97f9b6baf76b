//! Shared detection patterns for analyzers.
//!
//! Regexes and text helpers used by more than one analyzer live here so the
//! validator, the hallucination detector, the recognizer and the scorer all
//! agree on what a code fence, a hedge or a keyword is.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;

lazy_static! {
    // =========================================================================
    // STRUCTURE
    // =========================================================================

    /// A response wrapped entirely in a Markdown code fence.
    pub static ref CODE_FENCE_PATTERN: Regex = Regex::new(
        r"(?s)^\s*```[A-Za-z0-9_+.-]*[ \t]*\r?\n(.*?)\r?\n?[ \t]*```\s*$"
    ).unwrap();

    /// Opening, closing or self-closing XML tag.
    pub static ref XML_TAG_PATTERN: Regex = Regex::new(
        r"<(/?)([A-Za-z_][\w.:-]*)[^<>]*?(/?)>"
    ).unwrap();

    /// XML declaration, comment, CDATA or doctype; skipped by the tag checker.
    pub static ref XML_SPECIAL_PATTERN: Regex = Regex::new(
        r"(?s)<\?.*?\?>|<!--.*?-->|<!\[CDATA\[.*?\]\]>|<!DOCTYPE[^>]*>"
    ).unwrap();

    // =========================================================================
    // LANGUAGE
    // =========================================================================

    /// Hedging language that signals the model is unsure.
    pub static ref HEDGING_PATTERN: Regex = Regex::new(
        r"(?i)\b(i think|i believe|i guess|probably|possibly|perhaps|maybe|might|could be|not (entirely )?sure|not certain|it seems|seems to|likely|unclear|as far as i know|to my knowledge|approximately|roughly)\b"
    ).unwrap();

    /// Definitive phrasing that asserts certainty.
    pub static ref DEFINITIVE_CLAIM_PATTERN: Regex = Regex::new(
        r"(?i)\b(definitely|certainly|undoubtedly|unquestionably|it is a (well-known )?fact that|without (a |any )?doubt|it has been proven|is proven|guaranteed|everyone knows|100% (sure|certain))\b"
    ).unwrap();

    // =========================================================================
    // FABRICATION SIGNALS
    // =========================================================================

    /// Decimal numbers with four or more fractional digits.
    pub static ref PRECISE_NUMBER_PATTERN: Regex = Regex::new(
        r"\b\d+\.\d{4,}\b"
    ).unwrap();

    /// ISO-like timestamps down to the minute.
    pub static ref TIMESTAMP_PATTERN: Regex = Regex::new(
        r"\b\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}(?::\d{2})?"
    ).unwrap();

    /// Identifier-like tokens: UUIDs and prefixed serials such as `INV-2093841`.
    pub static ref ID_LIKE_PATTERN: Regex = Regex::new(
        r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b|\b[A-Z]{2,5}-?\d{5,}\b"
    ).unwrap();

    /// Four-digit calendar years from 1800 onwards.
    pub static ref YEAR_PATTERN: Regex = Regex::new(
        r"\b(1[89]\d{2}|2\d{3})\b"
    ).unwrap();
}

/// Words too common to carry meaning in overlap comparisons.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "your", "with", "this", "that", "from",
    "was", "were", "have", "has", "had", "what", "which", "who", "how", "why", "when", "where",
    "can", "could", "would", "should", "will", "does", "did", "its", "into", "about", "than",
    "then", "them", "they", "their", "there", "here", "also", "just", "some", "any", "all",
    "our", "out", "use", "been", "being", "more", "most", "such", "only", "other", "please",
];

/// Return the body of a fully fenced response, or `None` if it is not fenced.
pub fn strip_code_fence(text: &str) -> Option<String> {
    CODE_FENCE_PATTERN
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|body| body.as_str().trim().to_string())
}

/// Count hedging phrases in the text.
pub fn hedge_count(text: &str) -> usize {
    HEDGING_PATTERN.find_iter(text).count()
}

/// Lowercased content words (three or more characters, stopwords removed).
pub fn keywords(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .map(|w| w.trim_matches('\'').to_lowercase())
        .filter(|w| w.chars().count() >= 3 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Fraction of `reference` keywords that also appear in `candidate`.
///
/// Returns 1.0 when `reference` has no keywords, so an empty reference never
/// looks like a mismatch.
pub fn keyword_overlap(reference: &str, candidate: &str) -> f64 {
    let reference = keywords(reference);
    if reference.is_empty() {
        return 1.0;
    }
    let candidate = keywords(candidate);
    let shared = reference.intersection(&candidate).count();
    shared as f64 / reference.len() as f64
}

/// Check XML tag nesting. Returns a description of the first problem found.
pub fn xml_structure_error(text: &str) -> Option<String> {
    let cleaned = XML_SPECIAL_PATTERN.replace_all(text, "");
    let mut stack: Vec<String> = Vec::new();
    let mut saw_element = false;

    for caps in XML_TAG_PATTERN.captures_iter(&cleaned) {
        let closing = !caps[1].is_empty();
        let self_closing = !caps[3].is_empty();
        let name = caps[2].to_string();
        saw_element = true;

        if self_closing {
            continue;
        }
        if closing {
            match stack.pop() {
                Some(open) if open == name => {}
                Some(open) => {
                    return Some(format!("closing tag </{}> does not match <{}>", name, open))
                }
                None => return Some(format!("closing tag </{}> has no opening tag", name)),
            }
        } else {
            stack.push(name);
        }
    }

    if !saw_element {
        return Some("no XML elements found".to_string());
    }
    stack
        .pop()
        .map(|open| format!("element <{}> is never closed", open))
}

/// Check that brackets in a code snippet are balanced.
///
/// String and character literals are skipped so `"("` does not count.
pub fn code_structure_error(text: &str) -> Option<String> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string: Option<char> = None;
    let mut escaped = false;

    for (line_no, line) in text.lines().enumerate() {
        for c in line.chars() {
            if let Some(quote) = in_string {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == quote {
                    in_string = None;
                }
                continue;
            }
            match c {
                '"' | '`' => in_string = Some(c),
                '(' | '[' | '{' => stack.push(c),
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    if stack.pop() != Some(expected) {
                        return Some(format!("unbalanced '{}' on line {}", c, line_no + 1));
                    }
                }
                _ => {}
            }
        }
        // Double-quoted strings do not span lines in most languages.
        if in_string == Some('"') {
            in_string = None;
        }
    }

    stack
        .last()
        .map(|open| format!("unclosed '{}' at end of input", open))
}
