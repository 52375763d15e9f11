use serde::Serialize;

use crate::catalog::EnhancementStyle;

const BASE_CLAUSES: [(&str, &str); 3] = [
    ("contrast", "HIGH CONTRAST"),
    ("flat", "flat design"),
    ("vector", "vector style"),
];

const CORE_CLAUSES: [&str; 3] = ["bold solid colors", "clean sharp edges", "no gradients"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnhancedPrompt {
    pub original: String,
    pub enhanced: String,
    pub negative_prompt: String,
    pub style: Option<String>,
    pub optimizations_applied: Vec<String>,
}

/// Appends tracer-friendly clauses to a prompt. Clause order is stable and
/// user text is never rewritten; without a style the prompt passes through
/// untouched. Containment checks run against the original lowercased prompt,
/// so a clause the user already wrote is not appended twice.
pub fn enhance_prompt(raw_prompt: &str, style: Option<&EnhancementStyle>) -> EnhancedPrompt {
    let original = raw_prompt.to_string();
    let Some(style) = style else {
        return EnhancedPrompt {
            enhanced: original.clone(),
            original,
            negative_prompt: String::new(),
            style: None,
            optimizations_applied: Vec::new(),
        };
    };

    let prompt_lower = raw_prompt.to_lowercase();
    let mut enhanced = raw_prompt.to_string();
    let mut applied = Vec::new();

    let mut append = |enhanced: &mut String, applied: &mut Vec<String>, clause: &str| {
        enhanced.push_str(", ");
        enhanced.push_str(clause);
        applied.push(clause.to_string());
    };

    for (marker, clause) in BASE_CLAUSES {
        if !prompt_lower.contains(marker) {
            append(&mut enhanced, &mut applied, clause);
        }
    }
    for clause in style.additions {
        if !prompt_lower.contains(&clause.to_lowercase()) {
            append(&mut enhanced, &mut applied, clause);
        }
    }
    for clause in CORE_CLAUSES {
        if !prompt_lower.contains(clause) {
            append(&mut enhanced, &mut applied, clause);
        }
    }

    EnhancedPrompt {
        original,
        enhanced,
        negative_prompt: style.negative.to_string(),
        style: Some(style.id.to_string()),
        optimizations_applied: applied,
    }
}
