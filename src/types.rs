//! The data model shared by every surface protocol and by both the
//! streaming and non-streaming parse paths.

use serde_json::Value;
use std::fmt;

use crate::error::ErrorMetadata;
use crate::schema::SchemaView;

/// A tool the caller has declared, immutable once a parser is constructed
/// around it.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn schema_view(&self) -> SchemaView<'_> {
        SchemaView::new(&self.input_schema)
    }
}

/// A finalised tool call: the canonical JSON string is the single
/// definitive serialisation of the parsed arguments, and the concatenation
/// of every `tool-input-delta.delta` for this id must equal it verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub tool_name: String,
    pub input: String,
}

/// A result produced while replaying a tool's output back to the model.
#[derive(Debug, Clone)]
pub struct ToolResponseMessage {
    pub tool_call_id: String,
    pub tool_name: String,
    pub content: String,
}

/// Parts the upstream model wire produces; the parser interprets
/// `TextDelta` and `Finish`, and passes everything else through untouched.
#[derive(Debug, Clone)]
pub enum StreamPart {
    TextDelta { id: String, delta: String },
    Finish { reason: String, usage: Option<Value> },
    Error { error: String },
    PassThrough(Value),
}

/// Events the parser emits downstream. A superset of [`StreamPart`]:
/// upstream variants pass through unchanged, and new variants bracket text
/// and tool-call regions.
#[derive(Debug, Clone, PartialEq)]
pub enum DownstreamPart {
    TextStart { id: String },
    TextDelta { id: String, delta: String },
    TextEnd { id: String },
    ToolInputStart { id: String, tool_name: String },
    ToolInputDelta { id: String, delta: String },
    ToolInputEnd { id: String },
    ToolCall { id: String, tool_name: String, input: String },
    Finish { reason: String, usage: Option<Value> },
    Error { error: String },
    PassThrough(Value),
}

/// A part of a fully parsed, non-streaming generation.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    ToolCall(ToolCall),
}

/// Options threaded through both the streaming and non-streaming parse
/// paths.
pub struct ParseOptions {
    pub on_error: Option<Box<dyn FnMut(&str, ErrorMetadata) + Send>>,
    pub emit_raw_tool_call_text_on_error: bool,
    pub repair: bool,
    pub no_child_nodes: std::collections::HashSet<String>,
    pub max_reparses: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            on_error: None,
            emit_raw_tool_call_text_on_error: false,
            repair: true,
            no_child_nodes: std::collections::HashSet::new(),
            max_reparses: 64,
        }
    }
}

impl ParseOptions {
    pub fn report_error(&mut self, message: &str, meta: ErrorMetadata) {
        tracing::debug!(message, tool_name = ?meta.tool_name, "tool call parse error suppressed");
        if let Some(cb) = self.on_error.as_mut() {
            cb(message, meta);
        }
    }
}

impl fmt::Debug for ParseOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParseOptions")
            .field("on_error", &self.on_error.is_some())
            .field(
                "emit_raw_tool_call_text_on_error",
                &self.emit_raw_tool_call_text_on_error,
            )
            .field("repair", &self.repair)
            .field("no_child_nodes", &self.no_child_nodes)
            .field("max_reparses", &self.max_reparses)
            .finish()
    }
}

/// Where the synthetic system message is placed relative to the rest of
/// the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptPlacement {
    First,
    #[default]
    Last,
}
