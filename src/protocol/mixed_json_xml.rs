//! MixedJsonXml surface protocol (Qwen3Coder-style): a bespoke tag
//! grammar mixing XML-like delimiters with `=`-assigned names rather than
//! attributes:
//!
//! ```text
//! <tool_call>
//! <function=get_weather>
//! <parameter=location>Seoul</parameter>
//! </function>
//! </tool_call>
//! ```

use serde_json::{Map, Value};

use crate::error::MiddlewareError;
use crate::relaxed_xml;
use crate::schema::SchemaView;
use crate::types::{ContentPart, ParseOptions, ToolCall, ToolDefinition};

use super::{Opener, Progressive, Protocol};

const OUTER_START: &str = "<tool_call>";
const OUTER_END: &str = "</tool_call>";

#[derive(Debug, Clone, Default)]
pub struct MixedJsonXml;

impl Protocol for MixedJsonXml {
    fn openers(&self, _tools: &[ToolDefinition]) -> Vec<Opener> {
        vec![Opener {
            literal: OUTER_START.to_string(),
            tool_name: None,
            self_closing: false,
        }]
    }

    fn closer_for(&self, _tool_name: Option<&str>) -> String {
        OUTER_END.to_string()
    }

    fn parse_body(
        &self,
        tool_name: &str,
        body: &str,
        schema: Option<SchemaView<'_>>,
        _options: &ParseOptions,
    ) -> Result<Value, MiddlewareError> {
        let (name, args) = parse_function_block(body).ok_or_else(|| MiddlewareError::MalformedToolBody {
            tool_name: tool_name.to_string(),
            raw: body.to_string(),
            source: "missing <function=NAME> block".to_string(),
        })?;
        let args = schema.map(|s| s.coerce(args.clone())).unwrap_or(args);
        let _ = name;
        Ok(args)
    }

    fn progressive(
        &self,
        _known_tool_name: Option<&str>,
        body_so_far: &str,
        schema: Option<SchemaView<'_>>,
    ) -> Progressive {
        let tool_name = function_name(body_so_far);
        let canonical_input = parse_function_block(body_so_far).map(|(_, args)| {
            let args = schema.map(|s| s.coerce(args.clone())).unwrap_or(args);
            serde_json::to_string(&args).unwrap_or_default()
        });
        Progressive { tool_name, canonical_input }
    }

    fn format_tool_call(&self, call: &ToolCall) -> String {
        let value: Value = serde_json::from_str(&call.input).unwrap_or(Value::Null);
        let mut params = String::new();
        if let Value::Object(map) = &value {
            for (k, v) in map {
                let rendered = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                params.push_str(&format!("<parameter={k}>{rendered}</parameter>\n"));
            }
        }
        format!(
            "{OUTER_START}\n<function={}>\n{}</function>\n{OUTER_END}",
            call.tool_name, params
        )
    }

    fn parse_generated_text(
        &self,
        text: &str,
        tools: &[ToolDefinition],
        options: &mut ParseOptions,
    ) -> Vec<ContentPart> {
        let segments = scan_outer_segments(text);
        if segments.is_empty() {
            return vec![ContentPart::Text(text.to_string())];
        }
        let mut out = Vec::new();
        let mut cursor = 0usize;
        for (start, end, body) in segments {
            if start > cursor {
                out.push(ContentPart::Text(text[cursor..start].to_string()));
            }
            match parse_function_block(&body) {
                Some((name, args)) => {
                    let schema = tools.iter().find(|t| t.name == name).map(|t| t.schema_view());
                    if schema.is_none() {
                        tracing::warn!(tool_name = %name, "tool call names a tool that was not declared");
                    }
                    let args = schema.map(|s| s.coerce(args.clone())).unwrap_or(args);
                    out.push(ContentPart::ToolCall(ToolCall {
                        id: crate::id::next_id(),
                        tool_name: name,
                        input: serde_json::to_string(&args).unwrap_or_default(),
                    }));
                }
                None => {
                    options.report_error(
                        "missing <function=NAME> block",
                        crate::error::ErrorMetadata::new().with_raw_segment(text[start..end].to_string()),
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

    fn extract_tool_call_segments(&self, text: &str, _tools: &[ToolDefinition]) -> Vec<String> {
        scan_outer_segments(text).into_iter().map(|(s, e, _)| text[s..e].to_string()).collect()
    }

    fn example_usage(&self, tools: &[ToolDefinition]) -> String {
        let name = tools.first().map(|t| t.name.as_str()).unwrap_or("tool_name");
        format!(
            "Call a tool by emitting:\n\n{OUTER_START}\n<function={name}>\n<parameter=param>value</parameter>\n</function>\n{OUTER_END}"
        )
    }
}

fn scan_outer_segments(text: &str) -> Vec<(usize, usize, String)> {
    let mut out = Vec::new();
    let mut from = 0usize;
    while let Some(rel_start) = text[from..].find(OUTER_START) {
        let start = from + rel_start;
        let body_start = start + OUTER_START.len();
        match text[body_start..].find(OUTER_END) {
            Some(rel_end) => {
                let body_end = body_start + rel_end;
                let end = body_end + OUTER_END.len();
                out.push((start, end, text[body_start..body_end].to_string()));
                from = end;
            }
            None => break,
        }
    }
    out
}

fn function_name(body: &str) -> Option<String> {
    let start = body.find("<function=")? + "<function=".len();
    let end = body[start..].find('>')? + start;
    Some(body[start..end].trim().to_string())
}

/// Parse `<function=NAME>...<parameter=KEY>VALUE</parameter>...</function>`
/// into `(NAME, {KEY: VALUE, ...})`. Requires the `</function>` closer to
/// be present; returns `None` otherwise (including while still streaming).
fn parse_function_block(body: &str) -> Option<(String, Value)> {
    let fn_start = body.find("<function=")?;
    let name_start = fn_start + "<function=".len();
    let name_end = body[name_start..].find('>')? + name_start;
    let name = body[name_start..name_end].trim().to_string();

    let inner_start = name_end + 1;
    let fn_close_rel = body[inner_start..].find("</function>")?;
    let inner = &body[inner_start..inner_start + fn_close_rel];

    let mut map = Map::new();
    let mut cursor = 0usize;
    while let Some(rel) = inner[cursor..].find("<parameter=") {
        let p_start = cursor + rel + "<parameter=".len();
        let Some(key_end_rel) = inner[p_start..].find('>') else { break };
        let key_end = p_start + key_end_rel;
        let key = inner[p_start..key_end].trim().to_string();
        let value_start = key_end + 1;
        let Some(close_rel) = inner[value_start..].find("</parameter>") else { break };
        let value_end = value_start + close_rel;
        let raw_value = inner[value_start..value_end].trim();
        map.insert(key, relaxed_xml::parse_scalar(raw_value));
        cursor = value_end + "</parameter>".len();
    }
    Some((name, Value::Object(map)))
}
