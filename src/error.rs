//! Error types for protopad

use std::path::PathBuf;

use thiserror::Error;

/// Result type for protopad operations
pub type Result<T> = std::result::Result<T, ProtopadError>;

/// Protopad errors
#[derive(Error, Debug)]
pub enum ProtopadError {
    #[error("Unknown message type '{name}'{}", suggestion_hint(.suggestions))]
    TypeNotFound { name: String, suggestions: Vec<String> },

    #[error(
        "Message type '{name}' is ambiguous. Possibilities are:\n{}\nAdd any unambiguous prefix to the type name to specify. (e.g. `prefix.TypeName`)",
        candidate_list(.candidates)
    )]
    TypeAmbiguous { name: String, candidates: Vec<String> },

    #[error("Failed to load any message types at all. Check your registered paths with `protopad register --list`")]
    NoSchemas,

    #[error("Failed to decode input as the message type `{type_name}`. The data may be of another message type. ({reason})")]
    BinaryDecode { type_name: String, reason: String },

    #[error("Failed to decode internal type as {type_name} in field `{field}`: {reason}")]
    InternalDecode {
        type_name: String,
        field: String,
        reason: String,
    },

    #[error("Failed to parse text as `{type_name}`: {reason}")]
    TextSyntax { type_name: String, reason: String },

    #[error("Could not load schema module {module}: {reason}")]
    SchemaLoad { module: String, reason: String },

    #[error("No editor available: pass --editor, set editor.command in the config, or set $EDITOR")]
    EditorUnavailable,

    #[error("Compilation failed for the following proto files:\n{}", .0.join("\n"))]
    Compilation(Vec<String>),

    #[error("The path `{}` is not registered and so can't be removed.", .0.display())]
    PathNotRegistered(PathBuf),

    #[error("Configuration error: {0}")]
    Config(#[from] config_crate::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtopadError {
    /// Shorthand for a text-form failure on `type_name`
    pub fn text(type_name: impl Into<String>, reason: impl ToString) -> Self {
        Self::TextSyntax {
            type_name: type_name.into(),
            reason: reason.to_string(),
        }
    }
}

fn suggestion_hint(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(". Did you mean: {}?", suggestions.join(", "))
    }
}

fn candidate_list(candidates: &[String]) -> String {
    candidates
        .iter()
        .map(|c| format!("- {}", c))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ambiguous_lists_candidates() {
        let err = ProtopadError::TypeAmbiguous {
            name: "Widget".to_string(),
            candidates: vec!["pkgA.widget.Widget".to_string(), "pkgB.widget.Widget".to_string()],
        };
        let message = err.to_string();
        assert!(message.contains("- pkgA.widget.Widget"));
        assert!(message.contains("- pkgB.widget.Widget"));
        assert!(message.contains("prefix.TypeName"));
    }

    #[test]
    fn test_not_found_without_suggestions() {
        let err = ProtopadError::TypeNotFound {
            name: "NoSuchType".to_string(),
            suggestions: vec![],
        };
        assert_eq!(err.to_string(), "Unknown message type 'NoSuchType'");
    }
}
