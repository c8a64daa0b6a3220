//! Error kinds for the middleware.
//!
//! Recoverable parse failures (the first three variants below) never unwind
//! across the
//! [`crate::stream_parser::StreamParser`] / [`crate::generate_parser`] API
//! boundary: callers observe them through [`crate::types::ParseOptions::on_error`].
//! Only [`MiddlewareError::InvariantViolation`] is ever returned as an `Err`
//! or surfaced as a downstream `Error` part.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MiddlewareError {
    #[error("malformed tool call body for `{tool_name}`: {source}")]
    MalformedToolBody {
        tool_name: String,
        raw: String,
        source: String,
    },

    #[error("unterminated tool call for `{tool_name}`: {source}")]
    UnterminatedToolCall {
        tool_name: String,
        raw: String,
        source: String,
    },

    /// §7 kind 3: an upstream part of a kind the parser does not interpret
    /// *during prompt construction*. Deliberately unreachable in this
    /// crate: prompt/message-array assembly (merging consecutive same-role
    /// messages, provider-options plumbing) is the parameter-transform
    /// shell's job, and that shell is explicitly out of scope here (§1) —
    /// only its protocol-independent building blocks
    /// ([`crate::transform::default_system_prompt_template`],
    /// [`crate::transform::default_format_tool_response`]) are implemented.
    /// A host assembling its own message array is where this variant would
    /// actually be constructed.
    #[error("unrecognised content of kind `{kind}`")]
    UnknownContent { kind: String },

    #[error("invariant violation: event referenced unknown id `{id}`")]
    InvariantViolation { id: String },

    #[error("duplicate declared tool name: `{0}`")]
    DuplicateToolName(String),

    #[error("tool name must not be empty")]
    EmptyToolName,

    /// Raised by [`crate::transform::response_format_for_tool_choice`] when
    /// `ToolChoice::Tool` names a tool that was never declared to this
    /// middleware.
    #[error("unknown tool name: `{0}`")]
    UnknownToolName(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// Metadata handed to [`crate::types::ParseOptions::on_error`] alongside a message.
#[derive(Debug, Clone)]
pub struct ErrorMetadata {
    pub tool_name: Option<String>,
    pub raw_segment: Option<String>,
}

impl ErrorMetadata {
    pub fn new() -> Self {
        Self {
            tool_name: None,
            raw_segment: None,
        }
    }

    pub fn with_tool_name(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn with_raw_segment(mut self, raw: impl Into<String>) -> Self {
        self.raw_segment = Some(raw.into());
        self
    }
}

impl Default for ErrorMetadata {
    fn default() -> Self {
        Self::new()
    }
}
