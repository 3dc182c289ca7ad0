//! UI-fragment payloads (§6): every endpoint that produces client-visible
//! output returns structured JSON naming the DOM container it targets,
//! rather than server-rendered HTML. The four stable container ids are
//! `chat-container`, `trace-container`, `response-area`, and
//! `token-count`.

use serde::Serialize;

use sa_domain::message::{ContentBlock, Message, MessageContent, Role};
use sa_domain::usage::UsageUpdate;

pub const CHAT_CONTAINER: &str = "chat-container";
pub const TRACE_CONTAINER: &str = "trace-container";
pub const RESPONSE_AREA: &str = "response-area";
pub const TOKEN_COUNT: &str = "token-count";

/// One piece of UI update, named by the container it belongs in.
#[derive(Debug, Serialize)]
pub struct Fragment {
    pub target: &'static str,
    pub kind: &'static str,
    #[serde(flatten)]
    pub payload: serde_json::Value,
}

/// The bubble rendered for the user's own message, right after `POST
/// /chat` accepts it — the client doesn't wait for a round trip to show
/// what it just sent.
pub fn user_bubble(text: &str) -> Fragment {
    Fragment {
        target: CHAT_CONTAINER,
        kind: "user_message",
        payload: serde_json::json!({ "text": text }),
    }
}

/// Tells the client to open `GET /agent-stream` to receive the rest of
/// the turn.
pub fn subscribe_placeholder() -> Fragment {
    Fragment {
        target: RESPONSE_AREA,
        kind: "subscribe",
        payload: serde_json::json!({ "stream_url": "/agent-stream" }),
    }
}

/// The first trace line, shown while the model call is in flight.
pub fn trace_pending() -> Fragment {
    Fragment {
        target: TRACE_CONTAINER,
        kind: "trace",
        payload: serde_json::json!({ "text": "thinking…" }),
    }
}

/// Translate one [`TurnEvent`](crate::runtime::TurnEvent) into the
/// fragment(s) the client should render. An assistant message with both
/// text and tool calls (§9) produces two fragments — one per container.
pub fn fragments_for_message(message: &Message) -> Vec<Fragment> {
    match message.role {
        Role::Assistant => {
            let mut out = Vec::new();
            let text = message.content.extract_all_text();
            if !text.is_empty() {
                out.push(Fragment {
                    target: CHAT_CONTAINER,
                    kind: "assistant_message",
                    payload: serde_json::json!({ "text": text }),
                });
            }
            for call in &message.tool_calls {
                out.push(Fragment {
                    target: TRACE_CONTAINER,
                    kind: "tool_call",
                    payload: serde_json::json!({
                        "call_id": call.call_id,
                        "tool_name": call.tool_name,
                        "arguments": call.arguments,
                    }),
                });
            }
            out
        }
        Role::Tool => vec![Fragment {
            target: TRACE_CONTAINER,
            kind: "tool_result",
            payload: serde_json::json!({
                "call_id": message.tool_call_id,
                "blocks": blocks_as_json(&message.content),
            }),
        }],
        Role::System | Role::User => Vec::new(),
    }
}

pub fn fragment_for_usage(usage: &UsageUpdate) -> Fragment {
    Fragment {
        target: TOKEN_COUNT,
        kind: "usage",
        payload: serde_json::json!({ "cumulative_tokens": usage.cumulative_tokens }),
    }
}

pub fn close_fragment() -> Fragment {
    Fragment {
        target: RESPONSE_AREA,
        kind: "close",
        payload: serde_json::json!({}),
    }
}

fn blocks_as_json(content: &MessageContent) -> serde_json::Value {
    match content {
        MessageContent::Text(t) => serde_json::json!([{ "type": "text", "text": t }]),
        MessageContent::Blocks(blocks) => serde_json::Value::Array(
            blocks
                .iter()
                .map(|b| match b {
                    ContentBlock::Text { text } => serde_json::json!({ "type": "text", "text": text }),
                    ContentBlock::Image { mime, data_base64 } => serde_json::json!({
                        "type": "image",
                        "mime": mime,
                        "data_base64": data_base64,
                    }),
                    ContentBlock::InteractivePlot { html } => {
                        serde_json::json!({ "type": "interactive_plot", "html": html })
                    }
                })
                .collect(),
        ),
    }
}
