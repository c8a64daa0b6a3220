//! YamlInXml surface protocol: the same one-element-per-tool-call XML
//! envelope as [`super::xml::Xml`], but the element body is a YAML mapping
//! rather than nested XML elements.
//!
//! ```xml
//! <search>
//! query: example search
//! limit: 10
//! </search>
//! ```

use serde_json::Value;

use crate::error::MiddlewareError;
use crate::schema::SchemaView;
use crate::types::{ContentPart, ParseOptions, ToolCall, ToolDefinition};

use super::{Opener, Progressive, Protocol};

#[derive(Debug, Clone, Default)]
pub struct YamlInXml;

impl Protocol for YamlInXml {
    fn openers(&self, tools: &[ToolDefinition]) -> Vec<Opener> {
        let mut out = Vec::with_capacity(tools.len() * 3);
        for t in tools {
            out.push(Opener {
                literal: format!("<{}>", t.name),
                tool_name: Some(t.name.clone()),
                self_closing: false,
            });
            out.push(Opener {
                literal: format!("<{}/>", t.name),
                tool_name: Some(t.name.clone()),
                self_closing: true,
            });
            out.push(Opener {
                literal: format!("<{} />", t.name),
                tool_name: Some(t.name.clone()),
                self_closing: true,
            });
        }
        out
    }

    fn closer_for(&self, tool_name: Option<&str>) -> String {
        format!("</{}>", tool_name.expect("YamlInXml closer always scoped to a known tool name"))
    }

    fn parse_body(
        &self,
        tool_name: &str,
        body: &str,
        schema: Option<SchemaView<'_>>,
        _options: &ParseOptions,
    ) -> Result<Value, MiddlewareError> {
        parse_yaml_body(tool_name, body, schema)
    }

    fn progressive(
        &self,
        known_tool_name: Option<&str>,
        body_so_far: &str,
        schema: Option<SchemaView<'_>>,
    ) -> Progressive {
        let tool_name = known_tool_name.map(str::to_string);
        let Some(name) = known_tool_name else {
            return Progressive { tool_name, canonical_input: None };
        };
        let canonical_input = parse_yaml_body(name, body_so_far, schema)
            .ok()
            .and_then(|v| serde_json::to_string(&v).ok());
        Progressive { tool_name, canonical_input }
    }

    fn format_tool_call(&self, call: &ToolCall) -> String {
        let value: Value = serde_json::from_str(&call.input).unwrap_or(Value::Null);
        let body = serde_yaml::to_string(&value).unwrap_or_default();
        format!("<{0}>\n{1}</{0}>", call.tool_name, body)
    }

    fn parse_generated_text(
        &self,
        text: &str,
        tools: &[ToolDefinition],
        options: &mut ParseOptions,
    ) -> Vec<ContentPart> {
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        let intervals = super::xml::scan_tool_calls_for_names(text, &names);
        if intervals.is_empty() {
            return vec![ContentPart::Text(text.to_string())];
        }
        let mut out = Vec::new();
        let mut cursor = 0usize;
        for (start, end, name, inner) in intervals {
            if start > cursor {
                out.push(ContentPart::Text(text[cursor..start].to_string()));
            }
            let schema = tools.iter().find(|t| t.name == name).map(|t| t.schema_view());
            match parse_yaml_body(&name, &inner, schema) {
                Ok(value) => out.push(ContentPart::ToolCall(ToolCall {
                    id: crate::id::next_id(),
                    tool_name: name,
                    input: serde_json::to_string(&value).unwrap_or_default(),
                })),
                Err(e) => {
                    options.report_error(
                        &e.to_string(),
                        crate::error::ErrorMetadata::new()
                            .with_tool_name(name)
                            .with_raw_segment(text[start..end].to_string()),
                    );
                    if options.emit_raw_tool_call_text_on_error {
                        out.push(ContentPart::Text(text[start..end].to_string()));
                    }
                }
            }
            cursor = end;
        }
        if cursor < text.len() {
            out.push(ContentPart::Text(text[cursor..].to_string()));
        }
        out
    }

    fn extract_tool_call_segments(&self, text: &str, tools: &[ToolDefinition]) -> Vec<String> {
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        super::xml::scan_tool_calls_for_names(text, &names)
            .into_iter()
            .map(|(start, end, _, _)| text[start..end].to_string())
            .collect()
    }

    fn example_usage(&self, tools: &[ToolDefinition]) -> String {
        let name = tools.first().map(|t| t.name.as_str()).unwrap_or("tool_name");
        format!("Call a tool by wrapping a YAML mapping in its element:\n\n<{name}>\nparam: value\n</{name}>")
    }
}

/// Strip the body's common leading indentation before handing it to
/// `serde_yaml` — model output typically carries the element's own nested
/// indentation level, which YAML would otherwise treat as a (wrong)
/// sequence/mapping level shift.
fn normalize_indentation(body: &str) -> String {
    let lines: Vec<&str> = body.lines().collect();
    let min_indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    lines
        .iter()
        .map(|l| if l.len() >= min_indent { &l[min_indent..] } else { l.trim_start() })
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_yaml_body(tool_name: &str, body: &str, schema: Option<SchemaView<'_>>) -> Result<Value, MiddlewareError> {
    let trimmed = body.trim_matches('\n');
    if trimmed.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    let normalized = normalize_indentation(trimmed);
    let value: serde_yaml::Value =
        serde_yaml::from_str(&normalized).map_err(|e| MiddlewareError::MalformedToolBody {
            tool_name: tool_name.to_string(),
            raw: body.to_string(),
            source: e.to_string(),
        })?;
    if matches!(value, serde_yaml::Value::Null | serde_yaml::Value::Sequence(_)) {
        return Err(MiddlewareError::MalformedToolBody {
            tool_name: tool_name.to_string(),
            raw: body.to_string(),
            source: "expected a YAML mapping at the document root".to_string(),
        });
    }
    let json_value: Value = serde_json::to_value(&value)?;
    Ok(schema.map(|s| s.coerce(json_value.clone())).unwrap_or(json_value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParseOptions;
    use serde_json::json;

    fn tools() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "search",
                json!({"type": "object", "properties": {"query": {"type": "string"}, "limit": {"type": "number"}}}),
            ),
            ToolDefinition::new("get_location", json!({"type": "object"})),
        ]
    }

    #[test]
    fn openers_include_self_closing_forms() {
        let openers = YamlInXml.openers(&tools());
        assert!(openers.iter().any(|o| o.literal == "<get_location/>" && o.self_closing));
    }

    #[test]
    fn parses_indented_yaml_body() {
        let mut options = ParseOptions::default();
        let text = "<search>\n  query: example search\n  limit: 10\n</search>";
        let parts = YamlInXml.parse_generated_text(text, &tools(), &mut options);
        assert_eq!(parts.len(), 1);
        match &parts[0] {
            ContentPart::ToolCall(call) => {
                assert_eq!(call.tool_name, "search");
                let v: Value = serde_json::from_str(&call.input).unwrap();
                assert_eq!(v["query"], "example search");
                assert_eq!(v["limit"], 10);
            }
            _ => panic!("expected a tool call"),
        }
    }

    #[test]
    fn sequence_root_is_rejected() {
        let err = parse_yaml_body("search", "- a\n- b\n", None);
        assert!(err.is_err());
    }

    #[test]
    fn empty_body_becomes_empty_object() {
        let value = parse_yaml_body("get_location", "", None).unwrap();
        assert_eq!(value, json!({}));
    }
}
