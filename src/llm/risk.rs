//! Pre-generation risk assessment and reply structure checks.
//!
//! Risk scores are cheap lexical heuristics in [0, 1]. A high hallucination
//! score makes the service prepend [`FACTUALITY_PREAMBLE`]; a request that
//! declares expected sections gets one formatting regeneration when the reply
//! misses any of them.

use super::model_select::estimate_tokens;

/// Hallucination score above which factuality constraints are added.
pub const HALLUCINATION_THRESHOLD: f64 = 0.7;

/// Prompts with fewer words than this are considered ambiguous.
const SHORT_PROMPT_WORDS: usize = 15;

const TIME_SENSITIVE_PHRASES: &[&str] = &[
    "latest",
    "newest",
    "current",
    "recent",
    "today",
    "now",
    "present",
    "modern",
    "specifics about",
    "details of",
    "explain exactly how",
];

/// Sections requested when a caller asks for structure without naming any.
pub const DEFAULT_SECTIONS: &[&str] = &["Summary", "Details", "Conclusion"];

pub const FACTUALITY_PREAMBLE: &str = "IMPORTANT: Please adhere to these guidelines in your response:\n\
1. Only include information you are confident is accurate.\n\
2. If you're uncertain about specific details, acknowledge the uncertainty.\n\
3. Avoid making up specific facts, figures, dates, or technical details.\n\
4. Focus on established concepts rather than speculating about recent developments.\n\
5. If the question requires very specific or current information that you might not have, state this limitation.";

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RiskAssessment {
    pub hallucination: f64,
    pub ambiguity: f64,
    pub context_length: f64,
}

impl RiskAssessment {
    pub fn needs_factuality_constraints(&self) -> bool {
        self.hallucination > HALLUCINATION_THRESHOLD
    }
}

/// Score `prompt` against a model with a `max_context` token window.
pub fn assess(prompt: &str, max_context: u64) -> RiskAssessment {
    let lower = prompt.to_lowercase();
    let hits = TIME_SENSITIVE_PHRASES
        .iter()
        .filter(|phrase| lower.contains(*phrase))
        .count();
    let hallucination = (hits as f64 * 0.1).min(0.9);

    let ambiguity = if prompt.split_whitespace().count() < SHORT_PROMPT_WORDS {
        0.7
    } else {
        0.0
    };

    let context_length = if max_context == 0 {
        0.9
    } else {
        (estimate_tokens(prompt) as f64 / max_context as f64 * 2.0).min(0.9)
    };

    RiskAssessment {
        hallucination,
        ambiguity,
        context_length,
    }
}

pub fn with_factuality_constraints(prompt: &str) -> String {
    format!("{}\n\n{}", FACTUALITY_PREAMBLE, prompt)
}

/// Expected sections that do not occur anywhere in `text`, in request order.
pub fn missing_sections<'a>(text: &str, expected: &'a [String]) -> Vec<&'a str> {
    expected
        .iter()
        .map(String::as_str)
        .filter(|section| !text.contains(section))
        .collect()
}

/// Prefix asking the model to lay out `sections` as headed sections.
pub fn formatting_instruction(sections: &[String]) -> String {
    let listed: Vec<&str> = if sections.is_empty() {
        DEFAULT_SECTIONS.to_vec()
    } else {
        sections.iter().map(String::as_str).collect()
    };
    let mut out = String::from(
        "IMPORTANT: Format your response with clear section headings. \
         Include all of the following sections:\n",
    );
    for section in listed {
        out.push_str("- ");
        out.push_str(section);
        out.push('\n');
    }
    out
}
