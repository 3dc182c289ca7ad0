//! The tool surface exposed to the model (§4.D, §6): a single `run_code`
//! tool backed by that user's Sandbox Controller.

use sa_domain::message::{ContentBlock, ToolDefinition};

use crate::state::AppState;

/// The one tool definition sent with every `ModelGateway::complete` call.
pub fn build_tool_definitions() -> Vec<ToolDefinition> {
    vec![ToolDefinition {
        name: "run_code".into(),
        description: "Execute a snippet in the user's persistent sandbox session. \
            Variables, imports, and functions defined in earlier calls remain \
            available. Returns stdout/stderr plus any figures or images produced."
            .into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "code": { "type": "string", "description": "Code to execute" }
            },
            "required": ["code"]
        }),
    }]
}

/// Dispatch one `run_code` call for `user_id`. Returns the content blocks to
/// attach to the tool-result message on success, or a single text block
/// carrying the failure's message on error (§7: a tool-invocation failure
/// never aborts the turn, unlike a model-gateway failure).
pub async fn dispatch_tool(
    state: &AppState,
    user_id: &str,
    tool_name: &str,
    arguments: &serde_json::Value,
) -> Vec<ContentBlock> {
    if tool_name != "run_code" {
        return vec![ContentBlock::Text {
            text: format!("unknown tool: {tool_name}"),
        }];
    }

    let code = match arguments.get("code").and_then(|v| v.as_str()) {
        Some(c) => c,
        None => {
            return vec![ContentBlock::Text {
                text: "missing required argument: code".to_string(),
            }]
        }
    };

    let controller = match state.sessions.sandbox(user_id).await {
        Ok(c) => c,
        Err(e) => {
            return vec![ContentBlock::Text {
                text: format!("sandbox unavailable: {e}"),
            }]
        }
    };

    match controller.submit(code).await {
        Ok(resp) => sa_sandbox::assemble_content_blocks(&resp),
        Err(e) => vec![ContentBlock::Text {
            text: format!("execution failed: {e}"),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_definitions_name_run_code() {
        let defs = build_tool_definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "run_code");
    }
}
