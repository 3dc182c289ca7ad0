//! The runtime: the Agent Loop (§4.D) plus the concurrency primitives that
//! keep one turn in flight per user at a time and let a client disconnect
//! cancel it.

pub mod cancel;
pub mod session_lock;
pub mod tools;
pub mod turn;

pub use turn::{run_turn, TurnEvent, SYSTEM_PROMPT};
