//! System prompts for reasoning layers.
//!
//! Every layer shares [`BASE_REASONING_PROMPT`], which fixes the output
//! format, followed by a kind-specific prompt. Dynamic content (facts,
//! prior answers, the question) goes in the user message.

use switchyard_core::ChatMessage;

use super::{LayerKind, ReasoningContext};

/// Shared by every layer.
pub const BASE_REASONING_PROMPT: &str = r#"
You are one layer in a chain of independent reasoners.

Answer the question you are given. Other layers may answer the same
question; your answer is compared with theirs, so state it plainly.

## Constraints
1. Respect every fact you are given
2. State assumptions you rely on
3. If you cannot answer, say so and give a low confidence

## Output Format (JSON)
{
  "answer": "the final answer only, as short as possible",
  "confidence": 0.0-1.0,
  "steps": ["reasoning step", "..."],
  "assumptions": ["assumption", "..."]
}

Return only the JSON object.
"#;

/// Fast layer prompt.
pub const FAST_LAYER_PROMPT: &str = r#"
## Layer: Fast

Give the most likely answer immediately. Keep `steps` to at most one
entry. Do not deliberate.
"#;

/// Deep layer prompt.
pub const DEEP_LAYER_PROMPT: &str = r#"
## Layer: Deep

Work through the problem step by step before answering. Record each
step in `steps`. If earlier layers answered, check their answers against
your own reasoning but do not copy them.
"#;

/// Verification layer prompt.
pub const VERIFICATION_LAYER_PROMPT: &str = r#"
## Layer: Verification

If a candidate answer is given, verify it independently. Reply with the
candidate if it holds and with the corrected answer if it does not.
Without a candidate, solve the problem and check your own answer before
replying. Lower your confidence for every check you could not complete.
"#;

/// Get the prompt for a layer kind.
pub fn layer_prompt(kind: LayerKind) -> &'static str {
    match kind {
        LayerKind::Fast => FAST_LAYER_PROMPT,
        LayerKind::Deep => DEEP_LAYER_PROMPT,
        LayerKind::Verification => VERIFICATION_LAYER_PROMPT,
    }
}

/// System and user messages for one layer call.
pub fn build_messages(kind: LayerKind, prompt: &str, context: &ReasoningContext) -> Vec<ChatMessage> {
    let mut system = format!("{}{}", BASE_REASONING_PROMPT, layer_prompt(kind));
    if let Some(extra) = &context.system_context {
        system.push_str("\n## Context\n");
        system.push_str(extra);
        system.push('\n');
    }

    let mut user = String::new();
    if !context.facts.is_empty() {
        user.push_str("Facts:\n");
        for fact in &context.facts {
            user.push_str(&format!("- {}\n", fact));
        }
        user.push('\n');
    }

    match (kind, context.best_prior()) {
        (LayerKind::Verification, Some(best)) => {
            user.push_str(&format!(
                "Candidate answer (from {}, confidence {:.2}): {}\n\n",
                best.layer, best.confidence, best.answer
            ));
        }
        _ if !context.prior_answers.is_empty() => {
            user.push_str("Earlier answers:\n");
            for prior in &context.prior_answers {
                user.push_str(&format!(
                    "- {} ({:.2}): {}\n",
                    prior.layer, prior.confidence, prior.answer
                ));
            }
            user.push('\n');
        }
        _ => {}
    }

    user.push_str("Question: ");
    user.push_str(prompt);

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}
