//! OpenAI-compatible adapter.
//!
//! Works with OpenAI, Azure OpenAI, Ollama, vLLM, LM Studio, Together, and
//! any other endpoint that follows the OpenAI chat-completions contract.
//! Only the non-streaming `/chat/completions` call is used: the design's
//! model-gateway contract (§6) is exactly "one request, one response".

use crate::traits::{ChatRequest, ChatResponse, ModelGateway};
use crate::util::{from_reqwest, resolve_api_key};
use sa_domain::config::LlmConfig;
use sa_domain::error::{Error, Result};
use sa_domain::message::{ContentBlock, Message, MessageContent, Role, ToolCall, ToolDefinition};
use sa_domain::usage::Usage;
use serde_json::Value;

pub struct OpenAiCompatGateway {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAiCompatGateway {
    pub fn from_config(cfg: &LlmConfig) -> Result<Self> {
        let api_key = resolve_api_key(&cfg.auth)?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            id: "openai-compat".into(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model: cfg.model.clone(),
            client,
        })
    }

    fn effective_model(&self, req: &ChatRequest) -> String {
        req.model.clone().unwrap_or_else(|| self.default_model.clone())
    }

    fn build_body(&self, req: &ChatRequest) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();
        let mut body = serde_json::json!({
            "model": self.effective_model(req),
            "messages": messages,
            "stream": false,
        });
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_openai).collect();
            body["tools"] = Value::Array(tools);
        }
        if !req.reasoning_effort.is_empty() {
            body["reasoning_effort"] = Value::String(req.reasoning_effort.clone());
        }
        body
    }
}

#[async_trait::async_trait]
impl ModelGateway for OpenAiCompatGateway {
    async fn complete(&self, req: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&req);

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {status}: {text}"),
            });
        }

        let value: Value = serde_json::from_str(&text)?;
        parse_chat_response(&value, &self.id)
    }

    fn id(&self) -> &str {
        &self.id
    }
}

// ── Message serialization ───────────────────────────────────────────

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_openai(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => tool_result_to_openai(msg),
        Role::Assistant => assistant_to_openai(msg),
        _ => serde_json::json!({
            "role": role_to_str(msg.role),
            "content": msg.content.extract_all_text(),
        }),
    }
}

fn assistant_to_openai(msg: &Message) -> Value {
    let mut obj = serde_json::json!({"role": "assistant"});
    let text = msg.content.extract_all_text();
    obj["content"] = if text.is_empty() {
        Value::Null
    } else {
        Value::String(text)
    };
    if !msg.tool_calls.is_empty() {
        let tool_calls: Vec<Value> = msg
            .tool_calls
            .iter()
            .map(|tc| {
                serde_json::json!({
                    "id": tc.call_id,
                    "type": "function",
                    "function": {
                        "name": tc.tool_name,
                        "arguments": tc.arguments.to_string(),
                    }
                })
            })
            .collect();
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    if let Some(opaque) = &msg.opaque {
        if let Some(map) = opaque.as_object() {
            for (k, v) in map {
                obj[k] = v.clone();
            }
        }
    }
    obj
}

fn tool_result_to_openai(msg: &Message) -> Value {
    let content = match &msg.content {
        MessageContent::Text(t) => t.clone(),
        MessageContent::Blocks(blocks) => blocks_to_openai_content_string(blocks),
    };
    serde_json::json!({
        "role": "tool",
        "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
        "content": content,
    })
}

/// Most OpenAI-compatible endpoints only accept a plain string as tool
/// content; collapse the content-block list to its text, keeping a
/// placeholder note for any rich blocks so nothing is silently dropped.
fn blocks_to_openai_content_string(blocks: &[ContentBlock]) -> String {
    let mut parts = Vec::new();
    for b in blocks {
        match b {
            ContentBlock::Text { text } => parts.push(text.clone()),
            ContentBlock::Image { .. } => parts.push("[image attached]".to_string()),
            ContentBlock::InteractivePlot { .. } => {
                parts.push("[interactive plot attached]".to_string())
            }
        }
    }
    parts.join("\n\n")
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ── Response deserialization ─────────────────────────────────────────

fn parse_chat_response(body: &Value, provider: &str) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider {
            provider: provider.into(),
            message: "no choices in response".into(),
        })?;

    let message = choice.get("message").ok_or_else(|| Error::Provider {
        provider: provider.into(),
        message: "no message in choice".into(),
    })?;

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(String::from);

    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let tool_calls = parse_tool_calls(message);
    let usage = body.get("usage").and_then(parse_usage);

    // Preserve any field beyond the interpreted ones verbatim, so a
    // provider-native reasoning/thought signature round-trips on resubmit.
    let known = ["content", "role", "tool_calls"];
    let opaque = message.as_object().and_then(|m| {
        let extra: serde_json::Map<String, Value> = m
            .iter()
            .filter(|(k, _)| !known.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if extra.is_empty() {
            None
        } else {
            Some(Value::Object(extra))
        }
    });

    Ok(ChatResponse {
        content,
        tool_calls,
        usage,
        model,
        finish_reason,
        opaque,
    })
}

fn parse_tool_calls(message: &Value) -> Vec<ToolCall> {
    let arr = match message.get("tool_calls").and_then(|v| v.as_array()) {
        Some(a) => a,
        None => return Vec::new(),
    };
    arr.iter()
        .filter_map(|tc| {
            let call_id = tc.get("id")?.as_str()?.to_string();
            let func = tc.get("function")?;
            let tool_name = func.get("name")?.as_str()?.to_string();
            let args_str = func.get("arguments")?.as_str().unwrap_or("{}");
            let arguments: Value =
                serde_json::from_str(args_str).unwrap_or(Value::Object(Default::default()));
            Some(ToolCall {
                call_id,
                tool_name,
                arguments,
            })
        })
        .collect()
}

fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens").and_then(|x| x.as_u64()),
        completion_tokens: v.get("completion_tokens").and_then(|x| x.as_u64()),
        total_tokens: v.get("total_tokens").and_then(|x| x.as_u64()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_chat_response_with_tool_calls() {
        let body = serde_json::json!({
            "model": "gpt-4o-mini",
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "run_code", "arguments": "{\"code\":\"1+1\"}"}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });
        let resp = parse_chat_response(&body, "openai-compat").unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].call_id, "call_1");
        assert_eq!(resp.usage.unwrap().total_tokens, Some(15));
    }

    #[test]
    fn parse_chat_response_plain_text() {
        let body = serde_json::json!({
            "model": "gpt-4o-mini",
            "choices": [{"finish_reason": "stop", "message": {"role": "assistant", "content": "Hello!"}}],
        });
        let resp = parse_chat_response(&body, "openai-compat").unwrap();
        assert_eq!(resp.content, "Hello!");
        assert!(resp.tool_calls.is_empty());
    }

    #[test]
    fn parse_chat_response_missing_choices_errors() {
        let body = serde_json::json!({"model": "gpt-4o-mini"});
        assert!(parse_chat_response(&body, "openai-compat").is_err());
    }

    #[test]
    fn assistant_message_round_trips_tool_calls() {
        let msg = Message::assistant(
            "",
            vec![ToolCall {
                call_id: "call_1".into(),
                tool_name: "run_code".into(),
                arguments: serde_json::json!({"code": "print(1)"}),
            }],
        );
        let v = assistant_to_openai(&msg);
        assert_eq!(v["tool_calls"][0]["function"]["name"], "run_code");
    }
}
