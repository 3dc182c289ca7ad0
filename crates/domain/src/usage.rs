use serde::{Deserialize, Serialize};

/// Token usage declared by a single model-gateway response. Any field may
/// be absent if the gateway doesn't report it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

/// A cumulative-token-count event emitted after each model call (§3, P4).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UsageUpdate {
    pub cumulative_tokens: u64,
}
