//! The non-streaming counterpart to [`crate::stream_parser::StreamParser`]:
//! scans a complete, already-generated text string and produces an ordered
//! list of [`ContentPart`]s in one pass.

use crate::error::MiddlewareError;
use crate::protocol::{validate_unique_names, Protocol};
use crate::types::{ContentPart, ParseOptions, ToolDefinition};

pub struct GenerateParser<P: Protocol> {
    protocol: P,
    tools: Vec<ToolDefinition>,
}

impl<P: Protocol> GenerateParser<P> {
    pub fn new(protocol: P, tools: Vec<ToolDefinition>) -> Result<Self, MiddlewareError> {
        validate_unique_names(&tools)?;
        Ok(Self { protocol, tools })
    }

    pub fn parse(&self, text: &str, options: &mut ParseOptions) -> Vec<ContentPart> {
        self.protocol.parse_generated_text(text, &self.tools, options)
    }

    /// Raw, in-order, non-overlapping tool-call segments as they appear in
    /// `text` — used for replay and debugging.
    pub fn extract_tool_call_segments(&self, text: &str) -> Vec<String> {
        self.protocol.extract_tool_call_segments(text, &self.tools)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::xml::Xml;
    use serde_json::json;

    fn tools() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new("search", json!({"type": "object", "properties": {"query": {"type": "string"}}})),
            ToolDefinition::new("final", json!({"type": "object", "properties": {"message": {"type": "string"}}})),
        ]
    }

    #[test]
    fn duplicate_tool_names_rejected_at_construction() {
        let dup = vec![
            ToolDefinition::new("search", json!({"type": "object"})),
            ToolDefinition::new("search", json!({"type": "object"})),
        ];
        let err = GenerateParser::new(Xml, dup).unwrap_err();
        assert!(matches!(err, MiddlewareError::DuplicateToolName(_)));
    }

    #[test]
    fn parses_multiple_sequential_tool_calls() {
        let parser = GenerateParser::new(Xml, tools()).unwrap();
        let mut options = ParseOptions::default();
        let text = "<search><query>rust async</query></search>\n\n<final><message>done</message></final>";
        let parts = parser.parse(text, &mut options);
        let calls: Vec<_> = parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolCall(c) => Some(c.tool_name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(calls, vec!["search", "final"]);
    }

    #[test]
    fn extract_tool_call_segments_preserves_order() {
        let parser = GenerateParser::new(Xml, tools()).unwrap();
        let text = "go <search><query>x</query></search> then <final><message>y</message></final>";
        let segments = parser.extract_tool_call_segments(text);
        assert_eq!(segments.len(), 2);
        assert!(segments[0].starts_with("<search>"));
        assert!(segments[1].starts_with("<final>"));
    }
}
