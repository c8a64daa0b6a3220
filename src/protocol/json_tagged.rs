//! JsonTagged surface protocol: a literal start delimiter (default
//! `<tool_call>`), a JSON document `{"name": ..., "arguments": {...}}`, and
//! a literal end delimiter (default `</tool_call>`). Delimiters are
//! configurable so hosts that prefer Markdown code fences can use those
//! instead.

use serde_json::{json, Value};

use crate::error::MiddlewareError;
use crate::relaxed_json;
use crate::schema::SchemaView;
use crate::types::{ContentPart, ParseOptions, ToolCall, ToolDefinition};

use super::{Opener, Progressive, Protocol};

#[derive(Debug, Clone)]
pub struct JsonTagged {
    pub start: String,
    pub end: String,
}

impl Default for JsonTagged {
    fn default() -> Self {
        Self {
            start: "<tool_call>".to_string(),
            end: "</tool_call>".to_string(),
        }
    }
}

impl Protocol for JsonTagged {
    fn openers(&self, _tools: &[ToolDefinition]) -> Vec<Opener> {
        vec![Opener {
            literal: self.start.clone(),
            tool_name: None,
            self_closing: false,
        }]
    }

    fn closer_for(&self, _tool_name: Option<&str>) -> String {
        self.end.clone()
    }

    /// `body` is the full `{"name": ..., "arguments": {...}}` document
    /// between the delimiters; `tool_name` has already been discovered by
    /// the stream engine via [`Self::progressive`] before this is called.
    fn parse_body(
        &self,
        tool_name: &str,
        body: &str,
        schema: Option<SchemaView<'_>>,
        _options: &ParseOptions,
    ) -> Result<Value, MiddlewareError> {
        let parsed = relaxed_json::parse(body).map_err(|e| MiddlewareError::MalformedToolBody {
            tool_name: tool_name.to_string(),
            raw: body.to_string(),
            source: e.to_string(),
        })?;
        let arguments = parsed.get("arguments").cloned().unwrap_or(Value::Null);
        // A null/absent `arguments` canonicalises to `{}`.
        let arguments = if arguments.is_null() { json!({}) } else { arguments };
        Ok(schema.map(|s| s.coerce(arguments.clone())).unwrap_or(arguments))
    }

    fn progressive(
        &self,
        _known_tool_name: Option<&str>,
        body_so_far: &str,
        schema: Option<SchemaView<'_>>,
    ) -> Progressive {
        let tool_name = extract_complete_string_field(body_so_far, "name");
        let canonical_input = extract_complete_value_field(body_so_far, "arguments").and_then(|raw| {
            relaxed_json::parse(&raw).ok().map(|v| {
                let v = if v.is_null() { json!({}) } else { v };
                let v = schema.map(|s| s.coerce(v.clone())).unwrap_or(v);
                serde_json::to_string(&v).unwrap_or_default()
            })
        });
        Progressive { tool_name, canonical_input }
    }

    fn format_tool_call(&self, call: &ToolCall) -> String {
        let arguments: Value = serde_json::from_str(&call.input).unwrap_or(Value::Null);
        let doc = json!({ "name": call.tool_name, "arguments": arguments });
        format!("{}{}{}", self.start, doc, self.end)
    }

    fn parse_generated_text(
        &self,
        text: &str,
        tools: &[ToolDefinition],
        options: &mut ParseOptions,
    ) -> Vec<ContentPart> {
        let segments = scan_segments(text, &self.start, &self.end);
        if segments.is_empty() {
            return vec![ContentPart::Text(text.to_string())];
        }

        let mut out = Vec::new();
        let mut cursor = 0usize;
        for (start, end, body) in segments {
            if start > cursor {
                out.push(ContentPart::Text(text[cursor..start].to_string()));
            }
            match relaxed_json::parse(&body) {
                Ok(parsed) => {
                    let name = parsed.get("name").and_then(Value::as_str).unwrap_or("").to_string();
                    let schema = tools.iter().find(|t| t.name == name).map(|t| t.schema_view());
                    if schema.is_none() {
                        tracing::warn!(tool_name = %name, "tool call names a tool that was not declared");
                    }
                    let arguments = parsed.get("arguments").cloned().unwrap_or(Value::Null);
                    let arguments = if arguments.is_null() { json!({}) } else { arguments };
                    let arguments = schema.map(|s| s.coerce(arguments.clone())).unwrap_or(arguments);
                    out.push(ContentPart::ToolCall(ToolCall {
                        id: crate::id::next_id(),
                        tool_name: name,
                        input: serde_json::to_string(&arguments).unwrap_or_default(),
                    }));
                }
                Err(e) => {
                    options.report_error(
                        &e.to_string(),
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
        scan_segments(text, &self.start, &self.end)
            .into_iter()
            .map(|(start, end, _)| text[start..end].to_string())
            .collect()
    }

    fn example_usage(&self, tools: &[ToolDefinition]) -> String {
        let name = tools.first().map(|t| t.name.as_str()).unwrap_or("tool_name");
        format!(
            "Call a tool by emitting:\n\n{}{{\"name\": \"{}\", \"arguments\": {{\"param\": \"value\"}}}}{}",
            self.start, name, self.end
        )
    }
}

/// Non-overlapping, in-order `(start, body_start..end, inner_json_text)`
/// segments delimited by a literal start/end pair.
fn scan_segments(text: &str, start_delim: &str, end_delim: &str) -> Vec<(usize, usize, String)> {
    let mut out = Vec::new();
    let mut from = 0usize;
    while let Some(rel_start) = text[from..].find(start_delim) {
        let start = from + rel_start;
        let body_start = start + start_delim.len();
        match text[body_start..].find(end_delim) {
            Some(rel_end) => {
                let body_end = body_start + rel_end;
                let end = body_end + end_delim.len();
                out.push((start, end, text[body_start..body_end].to_string()));
                from = end;
            }
            None => break,
        }
    }
    out
}

/// Extract the value of a complete, already-closed string field (e.g.
/// `"name"`) from a partial JSON document, tolerating the document being
/// otherwise unterminated. Returns `None` until the string's closing quote
/// has actually appeared.
fn extract_complete_string_field(body: &str, field: &str) -> Option<String> {
    let key_pos = find_key(body, field)?;
    let after_colon = skip_to_colon(body, key_pos)?;
    let rest = body[after_colon..].trim_start();
    let quote = rest.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let mut chars = rest.char_indices().skip(1);
    let mut escaped = false;
    for (i, c) in chars.by_ref() {
        if escaped {
            escaped = false;
            continue;
        }
        if c == '\\' {
            escaped = true;
            continue;
        }
        if c == quote {
            return Some(rest[1..i].to_string());
        }
    }
    None
}

/// Extract the raw text of a field's value once it forms a complete JSON
/// value (object/array fully balanced, string fully closed). Returns
/// `None` while still partial.
fn extract_complete_value_field(body: &str, field: &str) -> Option<String> {
    let key_pos = find_key(body, field)?;
    let after_colon = skip_to_colon(body, key_pos)?;
    let rest = body[after_colon..].trim_start();
    let end = scan_balanced_value(rest)?;
    Some(rest[..end].to_string())
}

fn find_key(body: &str, field: &str) -> Option<usize> {
    for quote in ['"', '\''] {
        let needle = format!("{quote}{field}{quote}");
        if let Some(pos) = body.find(&needle) {
            return Some(pos + needle.len());
        }
    }
    None
}

fn skip_to_colon(body: &str, from: usize) -> Option<usize> {
    let rest = &body[from..];
    let colon = rest.find(':')?;
    Some(from + colon + 1)
}

/// Scan a single complete JSON value at the start of `text`. Succeeds only
/// when the value is unambiguously finished: a balanced object/array, a
/// closed string, or a bareword/number followed by a delimiter character
/// still present in the buffer (never just end-of-buffer, which could be a
/// truncated literal).
fn scan_balanced_value(text: &str) -> Option<usize> {
    let chars: Vec<char> = text.chars().collect();
    let first = *chars.first()?;
    match first {
        '{' | '[' => {
            let (open, close) = if first == '{' { ('{', '}') } else { ('[', ']') };
            let mut depth = 0i32;
            let mut in_string: Option<char> = None;
            let mut escaped = false;
            for (i, &c) in chars.iter().enumerate() {
                if let Some(q) = in_string {
                    if escaped {
                        escaped = false;
                    } else if c == '\\' {
                        escaped = true;
                    } else if c == q {
                        in_string = None;
                    }
                    continue;
                }
                match c {
                    '"' | '\'' => in_string = Some(c),
                    c if c == open => depth += 1,
                    c if c == close => {
                        depth -= 1;
                        if depth == 0 {
                            let end_byte: usize = chars[..=i].iter().map(|c| c.len_utf8()).sum();
                            return Some(end_byte);
                        }
                    }
                    _ => {}
                }
            }
            None
        }
        '"' | '\'' => {
            let mut escaped = false;
            for (i, &c) in chars.iter().enumerate().skip(1) {
                if escaped {
                    escaped = false;
                    continue;
                }
                if c == '\\' {
                    escaped = true;
                    continue;
                }
                if c == first {
                    let end_byte: usize = chars[..=i].iter().map(|c| c.len_utf8()).sum();
                    return Some(end_byte);
                }
            }
            None
        }
        _ => {
            let end = chars.iter().position(|c| matches!(c, ',' | '}' | ']'))?;
            let text: String = chars[..end].iter().collect();
            if text.trim().is_empty() {
                return None;
            }
            Some(text.len())
        }
    }
}
