//! The Agent Loop (§4.D): a lazy, finite sequence of events per user turn,
//! driven by a non-streaming model-gateway call per iteration and
//! sequential tool dispatch in declaration order.

use async_stream::stream;
use futures_core::stream::Stream;

use sa_domain::message::{Message, MessageContent, Role};
use sa_domain::usage::UsageUpdate;
use sa_providers::ChatRequest;

use crate::runtime::cancel::CancelToken;
use crate::runtime::tools::{build_tool_definitions, dispatch_tool};
use crate::state::AppState;

/// A hard cap on tool-dispatch iterations per turn (§4.D point 3): guards
/// against a pathologically looping model. Exceeding it aborts the turn
/// the same way a model-gateway failure does.
const MAX_TOOL_LOOPS: usize = 25;

pub const SYSTEM_PROMPT: &str = "\
You are a helpful coding assistant with access to a persistent Python \
sandbox via the run_code tool. Variables, imports, and functions defined \
in earlier calls remain available across calls. Prefer running code over \
guessing at output.";

/// One event produced during a turn (§4.D): either a message appended to
/// that user's conversation, or a cumulative token-usage update.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    Message(Message),
    Usage(UsageUpdate),
}

/// Run one turn for `user_id`, assuming the caller has already ensured the
/// system prompt and appended the triggering user message. Returns a
/// stream of events; the caller is responsible for emitting a final
/// `close` once the stream is exhausted (§6).
///
/// On a model-gateway failure or a `MAX_TOOL_LOOPS` overrun, the stream
/// simply ends without a terminal error event (§7): the turn aborts,
/// partial state already appended to Messages is retained, and the caller
/// closes the SSE connection.
pub fn run_turn(
    state: AppState,
    user_id: String,
    cancel: CancelToken,
) -> impl Stream<Item = TurnEvent> {
    stream! {
        state.sessions.ensure_system_prompt(&user_id, SYSTEM_PROMPT);

        let tools = build_tool_definitions();
        let mut cumulative_tokens: u64 = 0;

        for _ in 0..MAX_TOOL_LOOPS {
            if cancel.is_cancelled() {
                tracing::info!(user_id = %user_id, "turn cancelled, stopping agent loop");
                return;
            }

            let messages = state.sessions.messages(&user_id);
            let request = ChatRequest {
                messages,
                tools: tools.clone(),
                reasoning_effort: state.config.llm.reasoning_effort.clone(),
                model: None,
            };

            let response = match state.model_gateway.complete(request).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(user_id = %user_id, error = %e, "model gateway failure, aborting turn");
                    return;
                }
            };

            if let Some(usage) = &response.usage {
                let declared = usage.total_tokens.unwrap_or_else(|| {
                    usage.prompt_tokens.unwrap_or(0) + usage.completion_tokens.unwrap_or(0)
                });
                cumulative_tokens += declared;
            }
            yield TurnEvent::Usage(UsageUpdate { cumulative_tokens });

            let assistant_message = Message {
                role: Role::Assistant,
                content: MessageContent::Text(response.content),
                tool_calls: response.tool_calls.clone(),
                tool_call_id: None,
                opaque: response.opaque,
            };
            state.sessions.append_message(&user_id, assistant_message.clone());
            yield TurnEvent::Message(assistant_message.clone());

            if !assistant_message.has_tool_calls() {
                return;
            }

            // §4.D step d: tool calls are processed sequentially, in the
            // order the model declared them — never concurrently.
            for call in &assistant_message.tool_calls {
                if cancel.is_cancelled() {
                    tracing::info!(user_id = %user_id, "turn cancelled mid tool-dispatch");
                    return;
                }
                let blocks = dispatch_tool(&state, &user_id, &call.tool_name, &call.arguments).await;
                let tool_message =
                    Message::tool_result(call.call_id.clone(), MessageContent::Blocks(blocks));
                state.sessions.append_message(&user_id, tool_message.clone());
                yield TurnEvent::Message(tool_message);
            }
        }

        tracing::error!(user_id = %user_id, "exceeded MAX_TOOL_LOOPS, aborting turn");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use sa_domain::config::{Config, SandboxConfig, SessionsConfig};
    use sa_domain::error::Result as DomainResult;
    use sa_domain::message::ToolCall;
    use sa_providers::{ChatResponse, ModelGateway};
    use sa_sessions::SessionRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct ScriptedGateway {
        calls: AtomicUsize,
        responses: Vec<ChatResponse>,
    }

    #[async_trait::async_trait]
    impl ModelGateway for ScriptedGateway {
        async fn complete(&self, _req: ChatRequest) -> DomainResult<ChatResponse> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.responses[i].clone())
        }

        fn id(&self) -> &str {
            "scripted"
        }
    }

    fn plain_response(text: &str) -> ChatResponse {
        ChatResponse {
            content: text.to_string(),
            tool_calls: vec![],
            usage: Some(sa_domain::usage::Usage {
                prompt_tokens: Some(10),
                completion_tokens: Some(5),
                total_tokens: Some(15),
            }),
            model: "test".into(),
            finish_reason: Some("stop".into()),
            opaque: None,
        }
    }

    fn tool_call_response(call_id: &str, code: &str) -> ChatResponse {
        ChatResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                call_id: call_id.to_string(),
                tool_name: "run_code".into(),
                arguments: serde_json::json!({ "code": code }),
            }],
            usage: Some(sa_domain::usage::Usage {
                prompt_tokens: Some(5),
                completion_tokens: Some(5),
                total_tokens: Some(10),
            }),
            model: "test".into(),
            finish_reason: Some("tool_calls".into()),
            opaque: None,
        }
    }

    fn test_state(gateway: Arc<dyn ModelGateway>) -> AppState {
        AppState {
            config: Arc::new(Config::default()),
            model_gateway: gateway,
            sessions: Arc::new(SessionRegistry::new(
                "/bin/true",
                &SandboxConfig::default(),
                &SessionsConfig::default(),
            )),
            session_locks: Arc::new(crate::runtime::session_lock::SessionLockMap::new()),
            cancel_map: Arc::new(crate::runtime::cancel::CancelMap::new()),
        }
    }

    #[tokio::test]
    async fn no_tool_reply_emits_usage_then_final_assistant() {
        let gateway = Arc::new(ScriptedGateway {
            calls: AtomicUsize::new(0),
            responses: vec![plain_response("Hello!")],
        });
        let state = test_state(gateway);
        state.sessions.append_message("u1", Message::user("Hi"));

        let events: Vec<TurnEvent> = run_turn(state.clone(), "u1".into(), CancelToken::new())
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], TurnEvent::Usage(_)));
        match &events[1] {
            TurnEvent::Message(m) => {
                assert_eq!(m.role, Role::Assistant);
                assert!(!m.has_tool_calls());
                assert_eq!(m.content.extract_all_text(), "Hello!");
            }
            _ => panic!("expected a message event"),
        }

        // P3: the last event is a tool-call-free assistant message, and
        // Messages gained exactly the system prompt + user + assistant
        // turn suffix (P1).
        let msgs = state.sessions.messages("u1");
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].role, Role::System);
        assert_eq!(msgs[1].role, Role::User);
        assert_eq!(msgs[2].role, Role::Assistant);
    }

    #[tokio::test]
    async fn tool_call_then_final_reply_pairs_tool_result_before_next_call() {
        let gateway = Arc::new(ScriptedGateway {
            calls: AtomicUsize::new(0),
            responses: vec![
                tool_call_response("call_1", "print(6*7)"),
                plain_response("The answer is 42."),
            ],
        });
        let state = test_state(gateway);
        state.sessions.append_message("u1", Message::user("compute 6*7"));

        let events: Vec<TurnEvent> = run_turn(state.clone(), "u1".into(), CancelToken::new())
            .collect()
            .await;

        // Usage, assistant(tool_calls), tool(call_1), Usage, assistant(final).
        assert_eq!(events.len(), 5);
        match &events[2] {
            TurnEvent::Message(m) => {
                assert_eq!(m.role, Role::Tool);
                assert_eq!(m.tool_call_id.as_deref(), Some("call_1"));
            }
            _ => panic!("expected the tool-result event"),
        }
        match &events[4] {
            TurnEvent::Message(m) => assert!(!m.has_tool_calls()),
            _ => panic!("expected the final assistant event"),
        }

        // P4: usage is non-decreasing across the turn.
        let usages: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                TurnEvent::Usage(u) => Some(u.cumulative_tokens),
                _ => None,
            })
            .collect();
        assert!(usages.windows(2).all(|w| w[1] >= w[0]));
    }

    #[tokio::test]
    async fn second_model_call_is_never_reached_after_no_tool_calls() {
        let gateway = Arc::new(ScriptedGateway {
            calls: AtomicUsize::new(0),
            responses: vec![plain_response("done"), plain_response("should not run")],
        });
        let state = test_state(gateway);
        state.sessions.append_message("u1", Message::user("Hi"));

        let _events: Vec<TurnEvent> = run_turn(state.clone(), "u1".into(), CancelToken::new())
            .collect()
            .await;

        let msgs = state.sessions.messages("u1");
        assert_eq!(msgs.len(), 3);
    }

    #[tokio::test]
    async fn cancelled_token_stops_the_loop_immediately() {
        let gateway = Arc::new(ScriptedGateway {
            calls: AtomicUsize::new(0),
            responses: vec![plain_response("unused")],
        });
        let state = test_state(gateway);
        state.sessions.append_message("u1", Message::user("Hi"));

        let cancel = CancelToken::new();
        cancel.cancel();

        let events: Vec<TurnEvent> = run_turn(state, "u1".into(), cancel).collect().await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn running_a_turn_twice_does_not_duplicate_the_system_prompt() {
        let gateway = Arc::new(ScriptedGateway {
            calls: AtomicUsize::new(0),
            responses: vec![plain_response("first"), plain_response("second")],
        });
        let state = test_state(gateway);

        state.sessions.append_message("u1", Message::user("one"));
        let _: Vec<TurnEvent> = run_turn(state.clone(), "u1".into(), CancelToken::new())
            .collect()
            .await;

        state.sessions.append_message("u1", Message::user("two"));
        let _: Vec<TurnEvent> = run_turn(state.clone(), "u1".into(), CancelToken::new())
            .collect()
            .await;

        let msgs = state.sessions.messages("u1");
        let system_count = msgs.iter().filter(|m| m.role == Role::System).count();
        assert_eq!(system_count, 1);
    }
}
