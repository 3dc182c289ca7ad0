use sa_domain::error::Result;
use sa_domain::message::{Message, ToolCall, ToolDefinition};
use sa_domain::usage::Usage;

/// A single non-streaming chat-completion request, matching the model
/// gateway contract in the design (§6): the gateway is reached once per
/// turn iteration and returns exactly one assistant message.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    /// A hint like `"low"`/`"medium"`/`"high"`; passed through verbatim to
    /// providers that support it, ignored otherwise.
    pub reasoning_effort: String,
    /// Model identifier override. When `None`, the gateway uses its default.
    pub model: Option<String>,
}

/// The model's reply to one `ChatRequest`.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    pub model: String,
    pub finish_reason: Option<String>,
    /// Provider-native fields that must round-trip verbatim on resubmission
    /// (e.g. a reasoning/thought signature); see `Message::opaque`.
    pub opaque: Option<serde_json::Value>,
}

/// The opaque "model gateway" collaborator (§1, §6): a single call that
/// sends the full conversation plus the tool schema and gets back one
/// assistant turn. Deliberately not streaming — the agent loop only ever
/// needs the complete message to append to history and emit as an event.
#[async_trait::async_trait]
pub trait ModelGateway: Send + Sync {
    async fn complete(&self, req: ChatRequest) -> Result<ChatResponse>;

    /// A short identifier for logging (e.g. `"openai-compat"`).
    fn id(&self) -> &str;
}
