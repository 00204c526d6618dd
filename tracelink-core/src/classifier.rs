//! Node-name heuristics deciding whether a workflow step is a model call.
//!
//! Matching is a case-insensitive substring test with no word boundaries, so
//! it both over-matches ("email_parser" contains "ai") and under-matches
//! (a model node named "summarize" stays a span).

use serde_json::{json, Value};

use crate::models::Attributes;

/// Substrings that mark a node as a model invocation, checked in order.
pub const GENERATION_PATTERNS: [&str; 9] = [
    "ai",
    "llm",
    "generate",
    "completion",
    "chat",
    "gpt",
    "claude",
    "gemini",
    "openai",
];

pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u64 = 2048;

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Span,
    Generation {
        model: String,
        parameters: Attributes,
    },
}

pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack
        .to_ascii_lowercase()
        .contains(&needle.to_ascii_lowercase())
}

/// First matching pattern, if any.
pub fn matched_pattern(node_name: &str) -> Option<&'static str> {
    let lowered = node_name.to_ascii_lowercase();
    GENERATION_PATTERNS
        .iter()
        .copied()
        .find(|pattern| lowered.contains(pattern))
}

pub fn is_generation(node_name: &str) -> bool {
    matched_pattern(node_name).is_some()
}

/// Classify a node, pulling the model name and parameter overrides from the
/// event metadata when it is a generation.
pub fn classify(node_name: &str, metadata: &Attributes) -> Classification {
    if !is_generation(node_name) {
        return Classification::Span;
    }

    Classification::Generation {
        model: model_for(node_name, metadata),
        parameters: model_parameters(metadata),
    }
}

pub fn model_for(node_name: &str, metadata: &Attributes) -> String {
    if let Some(model) = metadata.get("model").and_then(Value::as_str) {
        return model.to_string();
    }

    if contains_ignore_case(node_name, "gpt") {
        "gpt-3.5-turbo".to_string()
    } else if contains_ignore_case(node_name, "claude") {
        "claude-3-sonnet".to_string()
    } else if contains_ignore_case(node_name, "gemini") {
        "gemini-pro".to_string()
    } else {
        "unknown".to_string()
    }
}

pub fn model_parameters(metadata: &Attributes) -> Attributes {
    let mut params = Attributes::new();
    params.insert(
        "temperature".to_string(),
        metadata
            .get("temperature")
            .cloned()
            .unwrap_or_else(|| json!(DEFAULT_TEMPERATURE)),
    );
    params.insert(
        "max_tokens".to_string(),
        metadata
            .get("max_tokens")
            .cloned()
            .unwrap_or_else(|| json!(DEFAULT_MAX_TOKENS)),
    );
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_names() {
        for name in [
            "generate_response",
            "ai_completion",
            "llm_call",
            "gpt_x",
            "claude_x",
            "gemini_x",
            "openai_x",
            "CHAT_Agent",
        ] {
            assert!(is_generation(name), "{name} should be a generation");
        }
    }

    #[test]
    fn test_span_names() {
        for name in ["process_data", "validate_input", "fetch", ""] {
            assert!(!is_generation(name), "{name} should be a span");
        }
    }

    #[test]
    fn test_substring_match_has_no_word_boundaries() {
        assert_eq!(matched_pattern("email_parser"), Some("ai"));
    }

    #[test]
    fn test_model_from_name_and_metadata() {
        let empty = Attributes::new();
        assert_eq!(model_for("gpt_summarize", &empty), "gpt-3.5-turbo");
        assert_eq!(model_for("Claude_review", &empty), "claude-3-sonnet");
        assert_eq!(model_for("gemini_plan", &empty), "gemini-pro");
        assert_eq!(model_for("llm_call", &empty), "unknown");

        let mut metadata = Attributes::new();
        metadata.insert("model".to_string(), json!("gpt-4o"));
        assert_eq!(model_for("gpt_summarize", &metadata), "gpt-4o");
    }

    #[test]
    fn test_parameters_default_and_override() {
        let params = model_parameters(&Attributes::new());
        assert_eq!(params["temperature"], json!(0.7));
        assert_eq!(params["max_tokens"], json!(2048));

        let mut metadata = Attributes::new();
        metadata.insert("temperature".to_string(), json!(0.1));
        let params = model_parameters(&metadata);
        assert_eq!(params["temperature"], json!(0.1));
        assert_eq!(params["max_tokens"], json!(2048));
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("process_data", &Attributes::new()), Classification::Span);
        match classify("gpt_summarize", &Attributes::new()) {
            Classification::Generation { model, parameters } => {
                assert_eq!(model, "gpt-3.5-turbo");
                assert_eq!(parameters.len(), 2);
            }
            other => panic!("expected generation, got {other:?}"),
        }
    }
}
