//! `SurfaceProtocol`: the single polymorphic capability of this crate.
//!
//! Implemented as a `Protocol` trait (what [`crate::stream_parser::StreamParser`]
//! is generic over) plus a `SurfaceProtocolKind` dispatch enum, which gives
//! callers a concrete, storable value without needing a type parameter at
//! every call site. No inheritance hierarchy is needed — each variant is a
//! flat struct implementing the same trait.

pub mod json_tagged;
pub mod mixed_json_xml;
pub mod xml;
pub mod yaml_in_xml;

use serde_json::Value;
use std::collections::HashSet;

use crate::error::MiddlewareError;
use crate::schema::SchemaView;
use crate::types::{ContentPart, ParseOptions, ToolCall, ToolDefinition, ToolResponseMessage};

/// A tag literal the stream engine should watch for while `Outside` any
/// tool call. `tool_name` is `None` for protocols (JsonTagged,
/// MixedJsonXml) that discover the tool name from inside the body rather
/// than from the opening delimiter itself.
#[derive(Debug, Clone)]
pub struct Opener {
    pub literal: String,
    pub tool_name: Option<String>,
    pub self_closing: bool,
}

/// Outcome of attempting to make progress on a still-open tool body.
#[derive(Debug, Clone, Default)]
pub struct Progressive {
    pub tool_name: Option<String>,
    pub canonical_input: Option<String>,
}

/// The capability every surface protocol provides. `StreamParser<P>` is
/// generic over this trait; `GenerateParser` and the transform shell use
/// it too.
pub trait Protocol {
    /// Literal tag/delimiter set this protocol recognises while outside a
    /// tool call, for the declared tools.
    fn openers(&self, tools: &[ToolDefinition]) -> Vec<Opener>;

    /// The literal closer to watch for once inside a tool call opened by
    /// `opener`. For Xml/YamlInXml this depends on the tool name; for
    /// JsonTagged/MixedJsonXml it is fixed.
    fn closer_for(&self, tool_name: Option<&str>) -> String;

    /// The canonical JSON input for a self-closing opener (e.g. `<T/>`).
    fn self_closing_input(&self) -> Value {
        Value::Object(Default::default())
    }

    /// Parse a complete tool body at finalisation.
    fn parse_body(
        &self,
        tool_name: &str,
        body: &str,
        schema: Option<SchemaView<'_>>,
        options: &ParseOptions,
    ) -> Result<Value, MiddlewareError>;

    /// Attempt to make progress on a still-accumulating body. Returns the
    /// tool name once known (eagerly for Xml/YamlInXml, lazily for
    /// JsonTagged/MixedJsonXml) and the canonical JSON input once at least
    /// one value inside it is stably parseable.
    fn progressive(
        &self,
        known_tool_name: Option<&str>,
        body_so_far: &str,
        schema: Option<SchemaView<'_>>,
    ) -> Progressive;

    /// Build the tool-advertising system-prompt fragment. `template`
    /// renders the tool descriptions (name/description/parameters); the
    /// protocol appends its own usage example after it.
    fn format_tools(&self, tools: &[ToolDefinition], template: &dyn Fn(&[ToolDefinition]) -> String) -> String {
        format!("{}\n{}", template(tools), self.example_usage(tools))
    }

    fn format_tool_call(&self, call: &ToolCall) -> String;

    fn format_tool_response(&self, responses: &[ToolResponseMessage]) -> String {
        crate::transform::default_format_tool_response(responses)
    }

    fn parse_generated_text(
        &self,
        text: &str,
        tools: &[ToolDefinition],
        options: &mut ParseOptions,
    ) -> Vec<ContentPart>;

    /// Raw, in-order, non-overlapping tool-call segments as they appear in
    /// `text` — used for replay and debugging.
    fn extract_tool_call_segments(&self, text: &str, tools: &[ToolDefinition]) -> Vec<String>;

    /// A short usage example shown to the model alongside `formatTools`.
    fn example_usage(&self, tools: &[ToolDefinition]) -> String;
}

/// A concrete, storable surface protocol selection.
#[derive(Clone)]
pub enum SurfaceProtocolKind {
    JsonTagged(json_tagged::JsonTagged),
    Xml(xml::Xml),
    YamlInXml(yaml_in_xml::YamlInXml),
    MixedJsonXml(mixed_json_xml::MixedJsonXml),
}

impl SurfaceProtocolKind {
    pub fn as_protocol(&self) -> &dyn Protocol {
        match self {
            SurfaceProtocolKind::JsonTagged(p) => p,
            SurfaceProtocolKind::Xml(p) => p,
            SurfaceProtocolKind::YamlInXml(p) => p,
            SurfaceProtocolKind::MixedJsonXml(p) => p,
        }
    }
}

/// `SurfaceProtocolKind` is itself a `Protocol`, dispatching to whichever
/// variant it holds. This is what lets a host pick a protocol at runtime
/// (from a config string, say) and still hand a single, sized, concrete
/// type to `StreamParser::new` / `GenerateParser::new` — no `Box<dyn
/// Protocol>` or separate generic instantiation per variant required.
impl Protocol for SurfaceProtocolKind {
    fn openers(&self, tools: &[ToolDefinition]) -> Vec<Opener> {
        self.as_protocol().openers(tools)
    }

    fn closer_for(&self, tool_name: Option<&str>) -> String {
        self.as_protocol().closer_for(tool_name)
    }

    fn self_closing_input(&self) -> Value {
        self.as_protocol().self_closing_input()
    }

    fn parse_body(
        &self,
        tool_name: &str,
        body: &str,
        schema: Option<SchemaView<'_>>,
        options: &ParseOptions,
    ) -> Result<Value, MiddlewareError> {
        self.as_protocol().parse_body(tool_name, body, schema, options)
    }

    fn progressive(
        &self,
        known_tool_name: Option<&str>,
        body_so_far: &str,
        schema: Option<SchemaView<'_>>,
    ) -> Progressive {
        self.as_protocol().progressive(known_tool_name, body_so_far, schema)
    }

    fn format_tools(&self, tools: &[ToolDefinition], template: &dyn Fn(&[ToolDefinition]) -> String) -> String {
        self.as_protocol().format_tools(tools, template)
    }

    fn format_tool_call(&self, call: &ToolCall) -> String {
        self.as_protocol().format_tool_call(call)
    }

    fn format_tool_response(&self, responses: &[ToolResponseMessage]) -> String {
        self.as_protocol().format_tool_response(responses)
    }

    fn parse_generated_text(
        &self,
        text: &str,
        tools: &[ToolDefinition],
        options: &mut ParseOptions,
    ) -> Vec<ContentPart> {
        self.as_protocol().parse_generated_text(text, tools, options)
    }

    fn extract_tool_call_segments(&self, text: &str, tools: &[ToolDefinition]) -> Vec<String> {
        self.as_protocol().extract_tool_call_segments(text, tools)
    }

    fn example_usage(&self, tools: &[ToolDefinition]) -> String {
        self.as_protocol().example_usage(tools)
    }
}

pub(crate) fn validate_unique_names(tools: &[ToolDefinition]) -> Result<(), MiddlewareError> {
    let mut seen = HashSet::new();
    for t in tools {
        if t.name.is_empty() {
            return Err(MiddlewareError::EmptyToolName);
        }
        if !seen.insert(t.name.as_str()) {
            return Err(MiddlewareError::DuplicateToolName(t.name.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream_parser::StreamParser;
    use crate::types::{ParseOptions, StreamPart};
    use serde_json::json;

    /// A host that picks its protocol at runtime (e.g. from a config
    /// string) can still hand a single, sized `SurfaceProtocolKind` to
    /// `StreamParser::new` and get the same behaviour as using the
    /// concrete variant directly.
    #[test]
    fn surface_protocol_kind_dispatches_to_its_variant() {
        let tools = vec![ToolDefinition::new(
            "get_weather",
            json!({"type": "object", "properties": {"location": {"type": "string"}}}),
        )];
        let kind = SurfaceProtocolKind::Xml(xml::Xml);
        let mut parser = StreamParser::new(kind, tools, ParseOptions::default()).unwrap();
        let mut events = parser.push(StreamPart::TextDelta {
            id: "0".to_string(),
            delta: "<get_weather><location>Seoul</location></get_weather>".to_string(),
        });
        events.extend(parser.push(StreamPart::Finish { reason: "stop".to_string(), usage: None }));

        let call = events.iter().find_map(|e| match e {
            crate::types::DownstreamPart::ToolCall { tool_name, input, .. } => Some((tool_name.clone(), input.clone())),
            _ => None,
        });
        assert_eq!(call, Some(("get_weather".to_string(), r#"{"location":"Seoul"}"#.to_string())));
    }
}
