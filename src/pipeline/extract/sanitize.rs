use std::sync::LazyLock;

use regex::Regex;

/// Maximum treatment-plan length in characters.
const MAX_PLAN_LENGTH: usize = 4_000;

#[derive(Debug, Clone)]
pub struct SanitizedPlan {
    pub text: String,
    pub was_modified: bool,
}

/// Sanitize a clinician's free-text plan before it reaches the language
/// model: strip invisible Unicode and control characters, filter prompt
/// injection patterns, bound the length.
pub fn sanitize_plan_text(raw: &str) -> SanitizedPlan {
    let mut text = remove_invisible_unicode(raw);
    text = remove_control_characters(&text);
    text = remove_injection_patterns(&text);

    if text.len() > MAX_PLAN_LENGTH {
        text = truncate_at_word_boundary(&text, MAX_PLAN_LENGTH);
    }

    let text = text.trim().to_string();
    let was_modified = text != raw.trim();
    if was_modified {
        tracing::warn!("Treatment plan text was modified during sanitization");
    }

    SanitizedPlan { text, was_modified }
}

/// Wrap the sanitized plan in delimiters so the model cannot confuse it
/// with instructions.
pub fn wrap_plan_for_prompt(sanitized_plan: &str) -> String {
    format!("<TREATMENT_PLAN>\n{sanitized_plan}\n</TREATMENT_PLAN>")
}

fn remove_invisible_unicode(text: &str) -> String {
    text.chars()
        .filter(|c| {
            !matches!(
                *c,
                '\u{200B}'..='\u{200F}'  // Zero-width chars
                | '\u{202A}'..='\u{202E}' // Directional formatting
                | '\u{2060}'..='\u{2064}' // Invisible operators
                | '\u{2066}'..='\u{2069}' // Directional isolates
                | '\u{FEFF}'              // BOM
                | '\u{00AD}'              // Soft hyphen
            )
        })
        .collect()
}

fn remove_control_characters(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

fn remove_injection_patterns(text: &str) -> String {
    static INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
        vec![
            Regex::new(r"(?i)ignore\s+(?:previous|above|all\s+prior|the\s+above)\s+(?:instructions?|rules?|prompts?)").unwrap(),
            Regex::new(r"(?i)forget\s+(?:everything|all|your)\s+(?:previous|prior)?").unwrap(),
            Regex::new(r"(?i)new\s+instructions?:").unwrap(),
            Regex::new(r"(?i)you\s+are\s+now\s+(?:a|an)\s+").unwrap(),
            Regex::new(r"(?i)system\s*:").unwrap(),
            Regex::new(r"(?i)assistant\s*:").unwrap(),
            Regex::new(r"<<SYS>>").unwrap(),
            Regex::new(r"\[INST\]").unwrap(),
            Regex::new(r"<\|im_start\|>").unwrap(),
            Regex::new(r"<\|im_end\|>").unwrap(),
            Regex::new(r"(?i)approve\s+this\s+(?:prescription|plan)\s+regardless").unwrap(),
        ]
    });

    let mut result = text.to_string();
    for pattern in INJECTION_PATTERNS.iter() {
        result = pattern.replace_all(&result, "[FILTERED]").to_string();
    }
    result
}

fn truncate_at_word_boundary(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let truncated = &text[..end];
    match truncated.rfind(char::is_whitespace) {
        Some(pos) => truncated[..pos].to_string(),
        None => truncated.to_string(),
    }
}
