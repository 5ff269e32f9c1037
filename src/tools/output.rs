//! Tool result content.

use crate::types::{ContentPart, MessageContent};

/// Canonical result of a tool execution: one string, or an ordered
/// sequence of strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutput {
    Text(String),
    Parts(Vec<String>),
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Normalize an arbitrary JSON return value.
    ///
    /// A string becomes a single text; an array becomes a sequence (string
    /// elements verbatim, anything else JSON-encoded); every other value is
    /// JSON-encoded into a single text.
    pub fn from_value(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(text) => Self::Text(text),
            serde_json::Value::Array(items) => Self::Parts(
                items
                    .into_iter()
                    .map(|item| match item {
                        serde_json::Value::String(text) => text,
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            other => Self::Text(other.to_string()),
        }
    }

    pub fn into_content(self) -> MessageContent {
        match self {
            Self::Text(text) => MessageContent::Text(text),
            Self::Parts(parts) => MessageContent::Parts(
                parts
                    .into_iter()
                    .map(|text| ContentPart::Text { text })
                    .collect(),
            ),
        }
    }
}

impl From<String> for ToolOutput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for ToolOutput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<ToolOutput> for MessageContent {
    fn from(output: ToolOutput) -> Self {
        output.into_content()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_value_becomes_single_text() {
        assert_eq!(ToolOutput::from_value(json!("5")), ToolOutput::text("5"));
    }

    #[test]
    fn array_value_keeps_strings_verbatim() {
        let output = ToolOutput::from_value(json!(["a", 1, {"k": true}]));
        assert_eq!(
            output,
            ToolOutput::Parts(vec!["a".into(), "1".into(), r#"{"k":true}"#.into()])
        );
    }

    #[test]
    fn other_values_are_json_encoded() {
        assert_eq!(ToolOutput::from_value(json!(5)), ToolOutput::text("5"));
        assert_eq!(
            ToolOutput::from_value(json!({"sum": 5})),
            ToolOutput::text(r#"{"sum":5}"#)
        );
    }

    #[test]
    fn parts_convert_to_text_content_parts() {
        let content = ToolOutput::Parts(vec!["first".into(), "second".into()]).into_content();
        assert_eq!(
            content,
            MessageContent::Parts(vec![
                ContentPart::Text {
                    text: "first".into()
                },
                ContentPart::Text {
                    text: "second".into()
                },
            ])
        );
    }
}
