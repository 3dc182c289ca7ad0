//! The conversation data model (§3 of the design): a tagged-union `Message`
//! plus the content-block sum type used for tool output.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A model-originated request to invoke a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

/// A tool definition advertised to the model gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One unit of structured tool output.
///
/// A tool message's content is either plain text or a non-empty ordered
/// list of these blocks (see `MessageContent`); keeping both shapes lets
/// callers interoperate with models that reject block-list tool results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image {
        /// `image/png` or `image/jpeg`, inferred from magic bytes (P7).
        mime: String,
        /// Base64-encoded image bytes.
        data_base64: String,
    },
    #[serde(rename = "interactive_plot")]
    InteractivePlot { html: String },
}

impl ContentBlock {
    /// Build an `Image` block, sniffing PNG vs JPEG from the base64 prefix:
    /// a PNG-encoded payload always base64-encodes to a string starting
    /// with `iVBOR` (the PNG signature `\x89PNG` lands on a 3-byte boundary).
    pub fn image(data_base64: impl Into<String>) -> Self {
        let data_base64 = data_base64.into();
        let mime = if data_base64.starts_with("iVBOR") {
            "image/png"
        } else {
            "image/jpeg"
        };
        ContentBlock::Image {
            mime: mime.to_string(),
            data_base64,
        }
    }

    pub fn data_url(&self) -> Option<String> {
        match self {
            ContentBlock::Image { mime, data_base64 } => {
                Some(format!("data:{mime};base64,{data_base64}"))
            }
            _ => None,
        }
    }
}

/// The body of a message: either plain text, or (for `tool` messages) a
/// list of content blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Join all text-bearing parts of this content into one string.
    /// `Blocks` variants combine every `Text` block, in order, separated
    /// by blank lines; non-text blocks are skipped.
    pub fn extract_all_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(t) => t.is_empty(),
            MessageContent::Blocks(b) => b.is_empty(),
        }
    }
}

/// A message in the conversation.
///
/// `tool_calls` is only meaningful on `Role::Assistant` messages;
/// `tool_call_id` only on `Role::Tool` messages. `opaque` preserves any
/// provider-native fields (e.g. a reasoning/thought signature) verbatim
/// across append/re-submit, per the design note on opaque round-tripping
/// (§9): this system never interprets it, only carries it along.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opaque: Option<Value>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            opaque: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            opaque: None,
        }
    }

    /// An assistant message with text and/or tool calls (§9: both may be
    /// present at once; the termination condition only cares about
    /// `tool_calls` being empty).
    pub fn assistant(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
            tool_calls,
            tool_call_id: None,
            opaque: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: MessageContent) -> Self {
        Self {
            role: Role::Tool,
            content,
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
            opaque: None,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_all_text_from_text_variant() {
        let content = MessageContent::Text("hello world".into());
        assert_eq!(content.extract_all_text(), "hello world");
    }

    #[test]
    fn extract_all_text_from_blocks_joins_with_blank_line() {
        let content = MessageContent::Blocks(vec![
            ContentBlock::Text {
                text: "stdout:\n42".into(),
            },
            ContentBlock::Image {
                mime: "image/png".into(),
                data_base64: "iVBORabc".into(),
            },
            ContentBlock::Text {
                text: "stderr: none".into(),
            },
        ]);
        assert_eq!(content.extract_all_text(), "stdout:\n42\n\nstderr: none");
    }

    #[test]
    fn extract_all_text_empty_blocks() {
        let content = MessageContent::Blocks(vec![]);
        assert_eq!(content.extract_all_text(), "");
    }

    #[test]
    fn image_block_sniffs_png_from_magic_prefix() {
        let block = ContentBlock::image("iVBORw0KGgo...");
        match block {
            ContentBlock::Image { mime, .. } => assert_eq!(mime, "image/png"),
            _ => panic!("expected image block"),
        }
    }

    #[test]
    fn image_block_defaults_to_jpeg_when_not_png() {
        let block = ContentBlock::image("/9j/4AAQSkZJRg...");
        match block {
            ContentBlock::Image { mime, .. } => assert_eq!(mime, "image/jpeg"),
            _ => panic!("expected image block"),
        }
    }

    #[test]
    fn assistant_message_preserves_both_text_and_tool_calls() {
        let msg = Message::assistant(
            "let me check",
            vec![ToolCall {
                call_id: "call_1".into(),
                tool_name: "run_code".into(),
                arguments: serde_json::json!({"code": "1+1"}),
            }],
        );
        assert!(msg.has_tool_calls());
        assert_eq!(msg.content.extract_all_text(), "let me check");
    }
}
