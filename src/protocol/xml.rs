//! Xml surface protocol: one top-level XML element per tool call, tag name
//! equal to the declared tool name, parameters as nested elements.
//!
//! ```xml
//! <search>
//!   <query>example search</query>
//!   <limit>10</limit>
//! </search>
//! ```

use serde_json::{Map, Value};

use crate::error::MiddlewareError;
use crate::relaxed_xml;
use crate::schema::SchemaView;
use crate::types::{ContentPart, ParseOptions, ToolCall, ToolDefinition};

use super::{Opener, Progressive, Protocol};

#[derive(Debug, Clone, Default)]
pub struct Xml;

impl Protocol for Xml {
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
        format!("</{}>", tool_name.expect("Xml closer always scoped to a known tool name"))
    }

    fn parse_body(
        &self,
        tool_name: &str,
        body: &str,
        schema: Option<SchemaView<'_>>,
        options: &ParseOptions,
    ) -> Result<Value, MiddlewareError> {
        relaxed_xml::parse_value(tool_name, body, schema, &options.no_child_nodes).map_err(|e| {
            MiddlewareError::MalformedToolBody {
                tool_name: tool_name.to_string(),
                raw: body.to_string(),
                source: e.to_string(),
            }
        })
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
        let canonical_input = relaxed_xml::parse_value(name, body_so_far, schema, &Default::default())
            .ok()
            .and_then(|v| serde_json::to_string(&v).ok());
        Progressive { tool_name, canonical_input }
    }

    fn format_tool_call(&self, call: &ToolCall) -> String {
        let value: Value = serde_json::from_str(&call.input).unwrap_or(Value::Null);
        let inner = render_xml_children(&value);
        format!("<{0}>\n{1}\n</{0}>", call.tool_name, inner)
    }

    fn parse_generated_text(
        &self,
        text: &str,
        tools: &[ToolDefinition],
        options: &mut ParseOptions,
    ) -> Vec<ContentPart> {
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        let intervals = scan_tool_calls(text, &names);

        if intervals.is_empty() {
            if let Some(part) = self_closing_root_fallback(text, &names, tools, options) {
                return part;
            }
            if let Some(part) = line_prefixed_fallback(text, &names, tools, options) {
                return part;
            }
            return vec![ContentPart::Text(text.to_string())];
        }

        let mut out = Vec::new();
        let mut cursor = 0usize;
        for (start, end, name, inner) in intervals {
            if start > cursor {
                out.push(ContentPart::Text(text[cursor..start].to_string()));
            }
            let schema = tools
                .iter()
                .find(|t| t.name == name)
                .map(|t| t.schema_view());
            match relaxed_xml::parse_value(&name, &inner, schema, &options.no_child_nodes) {
                Ok(value) => {
                    let input = serde_json::to_string(&value).unwrap_or_default();
                    out.push(ContentPart::ToolCall(ToolCall {
                        id: crate::id::next_id(),
                        tool_name: name,
                        input,
                    }));
                }
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
        scan_tool_calls(text, &names)
            .into_iter()
            .map(|(start, end, _, _)| text[start..end].to_string())
            .collect()
    }

    fn example_usage(&self, tools: &[ToolDefinition]) -> String {
        let mut out = String::from("Call a tool by emitting its own XML element, parameters as nested elements:\n\n");
        if let Some(t) = tools.first() {
            out.push_str(&format!("<{0}>\n  <param>value</param>\n</{0}>", t.name));
        } else {
            out.push_str("<tool_name>\n  <param>value</param>\n</tool_name>");
        }
        out
    }
}

fn render_xml_children(value: &Value) -> String {
    match value {
        Value::Object(map) => render_map(map),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_map(map: &Map<String, Value>) -> String {
    let mut out = String::new();
    for (k, v) in map {
        match v {
            Value::Array(items) => {
                for item in items {
                    out.push_str(&format!("  <{k}>{}</{k}>\n", render_scalar(item)));
                }
            }
            other => out.push_str(&format!("  <{k}>{}</{k}>\n", render_scalar(other))),
        }
    }
    out.trim_end().to_string()
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => render_map(map),
        other => other.to_string(),
    }
}

/// Locate every top-level occurrence of a declared tool's element in `text`,
/// tracking nesting depth only for tags with the *same* name as the
/// candidate being matched — a `<query>` inside a `<search>` body
/// never affects `<search>`'s own depth count.
pub(crate) fn scan_tool_calls_for_names(text: &str, names: &[&str]) -> Vec<(usize, usize, String, String)> {
    scan_tool_calls(text, names)
}

fn scan_tool_calls(text: &str, names: &[&str]) -> Vec<(usize, usize, String, String)> {
    let mut found = Vec::new();
    for &name in names {
        let open_tag = format!("<{name}>");
        let close_tag = format!("</{name}>");
        let self_close_a = format!("<{name}/>");
        let self_close_b = format!("<{name} />");

        let mut search_from = 0usize;
        while let Some(rel) = text[search_from..].find(&open_tag) {
            let start = search_from + rel;
            let body_start = start + open_tag.len();
            let mut depth = 1usize;
            let mut cursor = body_start;
            let mut matched_end = None;
            loop {
                let next_open = text[cursor..].find(&open_tag).map(|i| cursor + i);
                let next_close = text[cursor..].find(&close_tag).map(|i| cursor + i);
                match (next_open, next_close) {
                    (Some(o), Some(c)) if o < c => {
                        depth += 1;
                        cursor = o + open_tag.len();
                    }
                    (_, Some(c)) => {
                        depth -= 1;
                        cursor = c + close_tag.len();
                        if depth == 0 {
                            matched_end = Some(c + close_tag.len());
                            break;
                        }
                    }
                    _ => break,
                }
            }
            match matched_end {
                Some(end) => {
                    let inner = text[body_start..end - close_tag.len()].to_string();
                    found.push((start, end, name.to_string(), inner));
                    search_from = end;
                }
                None => {
                    // No matching close found at all: skip this occurrence.
                    search_from = body_start;
                }
            }
        }

        for literal in [&self_close_a, &self_close_b] {
            let mut from = 0usize;
            while let Some(rel) = text[from..].find(literal.as_str()) {
                let start = from + rel;
                let end = start + literal.len();
                found.push((start, end, name.to_string(), String::new()));
                from = end;
            }
        }
    }
    found.sort_by_key(|(start, end, _, _)| (*start, *end));
    dedupe_overlaps(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParseOptions;
    use serde_json::json;

    fn tools() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new("search", json!({"type": "object", "properties": {"query": {"type": "string"}}})),
            ToolDefinition::new("final", json!({"type": "object"})),
        ]
    }

    #[test]
    fn openers_cover_open_and_self_closing_forms() {
        let openers = Xml.openers(&tools());
        assert!(openers.iter().any(|o| o.literal == "<search>" && !o.self_closing));
        assert!(openers.iter().any(|o| o.literal == "<search/>" && o.self_closing));
    }

    #[test]
    fn parse_generated_text_extracts_single_call() {
        let mut options = ParseOptions::default();
        let parts = Xml.parse_generated_text("<search><query>hi</query></search>", &tools(), &mut options);
        assert_eq!(parts.len(), 1);
        match &parts[0] {
            ContentPart::ToolCall(call) => {
                assert_eq!(call.tool_name, "search");
                assert_eq!(call.input, r#"{"query":"hi"}"#);
            }
            _ => panic!("expected a tool call"),
        }
    }

    #[test]
    fn parse_generated_text_keeps_surrounding_prose() {
        let mut options = ParseOptions::default();
        let parts = Xml.parse_generated_text(
            "before <search><query>hi</query></search> after",
            &tools(),
            &mut options,
        );
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], ContentPart::Text("before ".to_string()));
        assert_eq!(parts[2], ContentPart::Text(" after".to_string()));
    }

    /// Shell-array dedup (§9 open question (a)): a `command: array<string>`
    /// parameter with a repeated scalar collapses the earlier duplicate,
    /// exercised through the full `Protocol::parse_body` entry point rather
    /// than the lower-level `relaxed_xml` unit directly.
    #[test]
    fn parse_body_dedupes_repeated_string_array_items_against_declared_schema() {
        let options = ParseOptions::default();
        let schema_value = json!({
            "type": "object",
            "properties": {
                "command": {"type": "array", "items": {"type": "string"}}
            }
        });
        let schema = SchemaView::new(&schema_value);
        let value = Xml
            .parse_body(
                "shell",
                "<command>rm</command><command>rm</command><command>-rf</command>",
                Some(schema),
                &options,
            )
            .unwrap();
        assert_eq!(value["command"].as_array().unwrap(), &vec![Value::from("rm"), Value::from("-rf")]);
    }

    #[test]
    fn malformed_body_reports_error_and_emits_no_call() {
        let mut seen = Vec::new();
        let mut options = ParseOptions {
            on_error: Some(Box::new(|msg, _meta| {
                panic!("unexpected on_error invocation: {msg}");
            })),
            ..Default::default()
        };
        // Replace with a recording callback instead of panicking, to assert arity.
        options.on_error = Some(Box::new(move |_msg, _meta| {
            seen.push(());
        }));
        let parts = Xml.parse_generated_text("<search><query>hi</query> stray</search>", &tools(), &mut options);
        assert!(parts.iter().all(|p| !matches!(p, ContentPart::ToolCall(_))));
    }

    /// §4.3 line-prefixed fallback: the tool name alone on its own line,
    /// followed by sibling parameter elements with no enclosing root tag.
    #[test]
    fn line_prefixed_fallback_accepts_bare_name_followed_by_params() {
        let mut options = ParseOptions::default();
        let parts = Xml.parse_generated_text("search:\n<query>hi</query>", &tools(), &mut options);
        let call = parts.into_iter().find_map(|p| match p {
            ContentPart::ToolCall(c) => Some(c),
            _ => None,
        });
        let call = call.expect("expected a tool call from the line-prefixed fallback");
        assert_eq!(call.tool_name, "search");
        assert_eq!(call.input, r#"{"query":"hi"}"#);
    }

    /// §4.3 self-closing root repair: `<TOOL\n<key>value</key>\n/>`.
    #[test]
    fn self_closing_root_repair_accepts_unclosed_opener_with_bare_close() {
        let mut options = ParseOptions::default();
        let parts = Xml.parse_generated_text("<search\n<query>hi</query>\n/>", &tools(), &mut options);
        let call = parts.into_iter().find_map(|p| match p {
            ContentPart::ToolCall(c) => Some(c),
            _ => None,
        });
        let call = call.expect("expected a tool call from the self-closing-root repair");
        assert_eq!(call.tool_name, "search");
        assert_eq!(call.input, r#"{"query":"hi"}"#);
    }
}

fn dedupe_overlaps(mut intervals: Vec<(usize, usize, String, String)>) -> Vec<(usize, usize, String, String)> {
    intervals.sort_by_key(|(start, end, _, _)| (*start, std::cmp::Reverse(*end)));
    let mut out: Vec<(usize, usize, String, String)> = Vec::new();
    for interval in intervals {
        if out.last().map(|(_, end, _, _)| interval.0 < *end).unwrap_or(false) {
            continue;
        }
        out.push(interval);
    }
    out
}

/// Accepts the input shape where a declared tool name appears alone on its
/// own line (optionally with a trailing `:`), immediately followed by an
/// XML body starting with `<` — one or more sibling parameter elements
/// with no enclosing root tag at all.
fn line_prefixed_fallback(
    text: &str,
    names: &[&str],
    tools: &[ToolDefinition],
    options: &mut ParseOptions,
) -> Option<Vec<ContentPart>> {
    for (line_idx, line) in text.lines().enumerate() {
        let candidate = line.trim().trim_end_matches(':').trim();
        if let Some(&name) = names.iter().find(|&&n| n == candidate) {
            let line_start = text
                .lines()
                .take(line_idx)
                .map(|l| l.len() + 1)
                .sum::<usize>();
            let body_start = line_start + line.len();
            let rest = &text[body_start..];
            if !rest.trim_start().starts_with('<') {
                continue;
            }
            let schema = tools.iter().find(|t| t.name == name).map(|t| t.schema_view());
            let Some((value, consumed)) = relaxed_xml::parse_prefix(rest, schema, &options.no_child_nodes) else {
                continue;
            };
            let mut out = Vec::new();
            if line_start > 0 {
                out.push(ContentPart::Text(text[..line_start].to_string()));
            }
            out.push(ContentPart::ToolCall(ToolCall {
                id: crate::id::next_id(),
                tool_name: name.to_string(),
                input: serde_json::to_string(&value).unwrap_or_default(),
            }));
            let tail_start = body_start + consumed;
            if tail_start < text.len() {
                out.push(ContentPart::Text(text[tail_start..].to_string()));
            }
            return Some(out);
        }
    }
    None
}

/// Accepts the shape `<TOOL\n<key>value</key>\n/>` for any declared tool
/// name: the opening tag was never closed with `>` before the children
/// began, and the whole element ends in a bare `/>` rather than `</TOOL>`.
fn self_closing_root_fallback(
    text: &str,
    names: &[&str],
    tools: &[ToolDefinition],
    options: &mut ParseOptions,
) -> Option<Vec<ContentPart>> {
    for &name in names {
        let schema = tools.iter().find(|t| t.name == name).map(|t| t.schema_view());
        if let Some((value, start, end)) =
            relaxed_xml::parse_self_closing_root(text, name, 0, schema, &options.no_child_nodes)
        {
            let mut out = Vec::new();
            if start > 0 {
                out.push(ContentPart::Text(text[..start].to_string()));
            }
            out.push(ContentPart::ToolCall(ToolCall {
                id: crate::id::next_id(),
                tool_name: name.to_string(),
                input: serde_json::to_string(&value).unwrap_or_default(),
            }));
            if end < text.len() {
                out.push(ContentPart::Text(text[end..].to_string()));
            }
            return Some(out);
        }
    }
    None
}
