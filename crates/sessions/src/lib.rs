//! The Session Registry (§4.C): per-user conversation state and sandbox
//! lifecycle, with idle-TTL eviction.

pub mod registry;

pub use registry::SessionRegistry;
