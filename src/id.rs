//! Opaque id generation.
//!
//! Tool-call ids are allocated once per tool call, at the moment
//! `ToolInputStart` is emitted, and reused for every subsequent event on
//! that call.

/// Generate a fresh opaque tool-call id.
pub fn next_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
