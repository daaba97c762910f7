//! Items produced by one agent turn and reduction to the answer to post.

use serde::Serialize;

/// One item of an agent turn, in the order it was produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseItem {
    /// Text emitted by the model.
    Text { text: String },
    /// A tool operation the model called, with the result it was given back.
    ToolCall {
        tool: String,
        arguments: serde_json::Value,
        output: serde_json::Value,
    },
}

impl ResponseItem {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::ToolCall { .. } => None,
        }
    }
}

/// The last text item, if the turn produced any.
pub fn extract_answer(items: &[ResponseItem]) -> Option<&str> {
    items.iter().rev().find_map(ResponseItem::as_text)
}
