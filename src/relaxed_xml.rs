//! An LLM-tolerant XML parser with a `repair` mode.
//!
//! Strict XML parsers (`quick-xml`, `roxmltree`) reject exactly the inputs
//! this module exists to handle: unbalanced tags, a missing closer at
//! end-of-stream, a lone `<` that isn't the start of a real tag, and
//! malformed close tags with stray whitespace (`</ name >`). None of that
//! is optional here — it is what the model actually emits under
//! truncation and formatting drift, so this module is a small hand-rolled
//! character scanner rather than a wrapper around a conformant parser.
//!
//! Repair heuristics applied:
//! - repeated child elements of the same name become an ordered array
//! - `<0>..<N>` or `<item>` children become a tuple/array, ignoring their
//!   tag names
//! - a lone invalid `<` (not the start of a tag) is treated as literal text
//! - `</ name >` (stray internal whitespace) is accepted as `</name>`
//! - an element with no closing tag takes the rest of the buffer as its
//!   body (the "balance tags" heuristic)
//!
//! What repair does *not* paper over: prose trailing after a structured
//! element (`<location>Seoul</location> done`) is rejected rather than
//! silently dropped — a body that mixes structure and leftover free text
//! is treated as malformed, matching how the rest of the corpus draws the
//! line between "recoverable formatting noise" and "not a tool call".

use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::relaxed_json;
use crate::schema::{SchemaKind, SchemaView};

#[derive(Debug)]
pub struct XmlRepairError(pub String);

impl std::fmt::Display for XmlRepairError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for XmlRepairError {}

type XResult<T> = Result<T, XmlRepairError>;

/// One sibling element discovered while scanning a fragment of XML.
struct Child {
    name: String,
    inner: String,
    self_closing: bool,
}

/// Parse the inner content of an element (already stripped of its own
/// opening/closing tags) into a `serde_json::Value`, guided by an optional
/// schema and the set of element names whose content must never be parsed
/// as nested XML (treated as opaque text even if it contains `<`).
pub fn parse_value(
    own_name: &str,
    inner: &str,
    schema: Option<SchemaView<'_>>,
    no_child_nodes: &HashSet<String>,
) -> XResult<Value> {
    let trimmed = inner.trim();

    if trimmed.is_empty() {
        return Ok(Value::String(String::new()));
    }

    if no_child_nodes.contains(own_name) || !trimmed.contains('<') {
        return Ok(parse_scalar(trimmed));
    }

    let (children, trailing) = scan_children(trimmed);
    if children.is_empty() {
        return Ok(parse_scalar(trimmed));
    }
    if !trailing.trim().is_empty() {
        return Err(XmlRepairError(format!(
            "trailing content after last recognised element in `{own_name}`: `{}`",
            trailing.trim()
        )));
    }

    children_to_value(children, schema, no_child_nodes)
}

fn children_to_value(
    children: Vec<Child>,
    schema: Option<SchemaView<'_>>,
    no_child_nodes: &HashSet<String>,
) -> XResult<Value> {
    if is_tuple_shape(&children) {
        let item_schema = schema.and_then(|s| s.items());
        let mut values = Vec::with_capacity(children.len());
        for (i, c) in children.iter().enumerate() {
            let prop = schema.and_then(|s| s.prefix_item(i)).or(item_schema);
            values.push(parse_value(&c.name, &c.inner, prop, no_child_nodes)?);
        }
        return Ok(Value::Array(values));
    }

    build_object(children, schema, no_child_nodes)
}

/// Parse as many leading sibling elements of `text` as form a complete,
/// contiguous run (ignoring any leading whitespace), without requiring the
/// whole string to be consumed. Returns the parsed value and the byte
/// offset just past the last recognised element.
///
/// Used by the Xml protocol's non-streaming repair paths (§4.3
/// line-prefixed fallback, self-closing-root repair), where the caller
/// knows only where the body *starts*, not where it ends.
pub(crate) fn parse_prefix(
    text: &str,
    schema: Option<SchemaView<'_>>,
    no_child_nodes: &HashSet<String>,
) -> Option<(Value, usize)> {
    let leading_ws = text.len() - text.trim_start().len();
    let rest = &text[leading_ws..];
    let (children, trailing) = scan_children(rest);
    if children.is_empty() {
        return None;
    }
    let consumed = rest.len() - trailing.len();
    let value = children_to_value(children, schema, no_child_nodes).ok()?;
    Some((value, leading_ws + consumed))
}

/// Repairs the shape `<TOOL\n<key>value</key>\n/>`: the model never closed
/// `TOOL`'s own opening tag with `>` before writing its children, and
/// terminated the whole element with a bare `/>` instead of `</TOOL>`.
/// Returns the parsed value and the byte offset just past the closing
/// `/>`, scanning from `search_from` in `text`.
pub(crate) fn parse_self_closing_root(
    text: &str,
    tool_name: &str,
    search_from: usize,
    schema: Option<SchemaView<'_>>,
    no_child_nodes: &HashSet<String>,
) -> Option<(Value, usize, usize)> {
    let opener = format!("<{tool_name}");
    let rel = text[search_from..].find(&opener)?;
    let start = search_from + rel;
    let after = start + opener.len();
    // A properly closed or regular self-closing opener (`<TOOL>`, `<TOOL/>`,
    // `<TOOL attr...>`) is handled elsewhere; this repair only applies when
    // the name is immediately followed by whitespace/newline with no `>`.
    let next = text[after..].chars().next()?;
    if !next.is_whitespace() {
        return None;
    }
    let rel_close = text[after..].find("/>")?;
    let close_pos = after + rel_close;
    let inner = &text[after..close_pos];
    let (value, _) = parse_prefix(inner, schema, no_child_nodes)?;
    Some((value, start, close_pos + 2))
}

fn build_object(
    children: Vec<Child>,
    schema: Option<SchemaView<'_>>,
    no_child_nodes: &HashSet<String>,
) -> XResult<Value> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: Map<String, Vec<Value>> = Map::new();

    for child in &children {
        let prop_schema = schema.and_then(|s| s.property(&child.name));
        let value = if child.self_closing {
            Value::String(String::new())
        } else {
            parse_value(&child.name, &child.inner, prop_schema, no_child_nodes)?
        };
        if !grouped.contains_key(&child.name) {
            order.push(child.name.clone());
        }
        grouped
            .entry(child.name.clone())
            .or_insert_with(Vec::new)
            .push(value);
    }

    let mut out = Map::new();
    for name in order {
        let values = grouped.remove(&name).unwrap_or_default();
        let prop_schema = schema.and_then(|s| s.property(&name));
        let value = if values.len() == 1 && prop_schema.map(|s| s.kind()) != Some(SchemaKind::Array)
        {
            values.into_iter().next().unwrap()
        } else {
            let mut arr = values;
            if prop_schema.map(|s| s.kind()) == Some(SchemaKind::Array)
                && prop_schema.and_then(|s| s.items()).map(|i| i.kind()) == Some(SchemaKind::String)
            {
                arr = dedupe_shell_array(arr);
            }
            Value::Array(arr)
        };
        out.insert(name, value);
    }
    Ok(Value::Object(out))
}

/// Last-occurrence-wins deduplication for duplicate string scalars inside
/// array-shaped parameters (the "shell command" heuristic):
/// `["rm", "rm", "-rf"]` becomes `["rm", "-rf"]` because the first `"rm"`
/// is shadowed by the later identical one.
fn dedupe_shell_array(values: Vec<Value>) -> Vec<Value> {
    if !values.iter().all(|v| v.is_string()) {
        return values;
    }
    let mut last_index: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for (i, v) in values.iter().enumerate() {
        if let Some(s) = v.as_str() {
            last_index.insert(s.to_string(), i);
        }
    }
    let mut kept: Vec<(usize, Value)> = values
        .into_iter()
        .enumerate()
        .filter(|(i, v)| {
            v.as_str()
                .map(|s| last_index.get(s) == Some(i))
                .unwrap_or(true)
        })
        .collect();
    kept.sort_by_key(|(i, _)| *i);
    kept.into_iter().map(|(_, v)| v).collect()
}

fn is_tuple_shape(children: &[Child]) -> bool {
    children
        .iter()
        .all(|c| c.name == "item" || c.name.parse::<usize>().is_ok())
}

pub(crate) fn parse_scalar(trimmed: &str) -> Value {
    // Only hand off to the relaxed-JSON parser for shapes it can actually
    // own end-to-end (objects, arrays, quoted strings) — a bare numeric
    // prefix like "5 < 10" must not be silently truncated to `5`.
    let looks_structural = matches!(trimmed.chars().next(), Some('{') | Some('['))
        || (trimmed.len() >= 2
            && ((trimmed.starts_with('"') && trimmed.ends_with('"'))
                || (trimmed.starts_with('\'') && trimmed.ends_with('\''))));
    if looks_structural {
        if let Ok(v) = relaxed_json::parse(trimmed) {
            return v;
        }
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    if let Ok(b) = trimmed.parse::<bool>() {
        return Value::Bool(b);
    }
    Value::String(trimmed.to_string())
}

/// Scan a fragment for top-level sibling elements, tolerating malformed
/// input. Interleaving whitespace between elements is dropped (it is
/// never meaningful in this tool-call grammar); anything left over after
/// the last recognised element is returned as `trailing` so the caller can
/// decide whether it is disqualifying prose.
fn scan_children(fragment: &str) -> (Vec<Child>, String) {
    let chars: Vec<char> = fragment.chars().collect();
    let len = chars.len();
    let mut i = 0;
    let mut out = Vec::new();
    let mut last_end = 0usize;

    while i < len {
        if chars[i] != '<' {
            i += 1;
            continue;
        }
        // A lone invalid `<` — not followed by a name character or `/` —
        // is literal text, not the start of a tag.
        if i + 1 >= len || !(chars[i + 1].is_alphabetic() || chars[i + 1] == '_') {
            i += 1;
            continue;
        }

        let tag_begin = i;
        let name_start = i + 1;
        let mut name_end = name_start;
        while name_end < len
            && (chars[name_end].is_alphanumeric()
                || chars[name_end] == '_'
                || chars[name_end] == '-'
                || chars[name_end] == '.')
        {
            name_end += 1;
        }
        let name: String = chars[name_start..name_end].iter().collect();
        if name.is_empty() {
            i += 1;
            continue;
        }

        // Skip to the end of the opening tag, noting self-closing `/>`.
        let mut j = name_end;
        let mut self_closing = false;
        while j < len && chars[j] != '>' {
            if chars[j] == '/' && j + 1 < len && chars[j + 1] == '>' {
                self_closing = true;
            }
            j += 1;
        }
        if j >= len {
            // Unterminated opening tag: nothing more to parse.
            break;
        }
        if self_closing {
            out.push(Child {
                name,
                inner: String::new(),
                self_closing: true,
            });
            i = j + 1;
            last_end = i;
            continue;
        }

        let content_start = j + 1;
        match find_close_tag(&chars, &name, content_start) {
            Some((inner_end, after_close)) => {
                let inner: String = chars[content_start..inner_end].iter().collect();
                out.push(Child {
                    name,
                    inner,
                    self_closing: false,
                });
                i = after_close;
                last_end = i;
            }
            None => {
                // Balance-tags heuristic: no closer anywhere — take the
                // rest of the fragment as this element's body.
                let inner: String = chars[content_start..len].iter().collect();
                out.push(Child {
                    name,
                    inner,
                    self_closing: false,
                });
                i = len;
                last_end = len;
            }
        }
        let _ = tag_begin;
    }

    let trailing: String = chars[last_end.min(len)..len].iter().collect();
    (out, trailing)
}

/// Find `</name>`, tolerating stray whitespace inside the closing tag
/// (`</ name >`) and case differences. Returns (content end, index past
/// the closer) on success.
fn find_close_tag(chars: &[char], name: &str, from: usize) -> Option<(usize, usize)> {
    let len = chars.len();
    let mut i = from;
    while i < len {
        if chars[i] != '<' {
            i += 1;
            continue;
        }
        let mut j = i + 1;
        if j < len && chars[j] == '/' {
            j += 1;
            while j < len && chars[j].is_whitespace() {
                j += 1;
            }
            let tag_start = j;
            while j < len
                && (chars[j].is_alphanumeric() || chars[j] == '_' || chars[j] == '-' || chars[j] == '.')
            {
                j += 1;
            }
            let tag_name: String = chars[tag_start..j].iter().collect();
            while j < len && chars[j].is_whitespace() {
                j += 1;
            }
            if j < len && chars[j] == '>' && tag_name.eq_ignore_ascii_case(name) {
                return Some((i, j + 1));
            }
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_object() {
        let nc = HashSet::new();
        let v = parse_value("search", "<query>hi</query><limit>5</limit>", None, &nc).unwrap();
        assert_eq!(v["query"], "hi");
        assert_eq!(v["limit"], 5);
    }

    #[test]
    fn repeated_children_become_array() {
        let nc = HashSet::new();
        let v = parse_value(
            "shell",
            "<command>rm</command><command>rm</command><command>-rf</command>",
            None,
            &nc,
        )
        .unwrap();
        let arr = v["command"].as_array().unwrap();
        assert_eq!(arr, &vec![Value::from("rm"), Value::from("rm"), Value::from("-rf")]);
    }

    /// The shell-array dedup heuristic only fires when the schema actually
    /// declares the property as `array<string>` — without a schema, a
    /// repeated child is just an ordered array (see
    /// `repeated_children_become_array` above).
    #[test]
    fn repeated_string_children_deduped_when_schema_declares_array_of_string() {
        let nc = HashSet::new();
        let schema_value = serde_json::json!({
            "type": "object",
            "properties": {
                "command": {"type": "array", "items": {"type": "string"}}
            }
        });
        let schema = SchemaView::new(&schema_value);
        let v = parse_value(
            "shell",
            "<command>rm</command><command>rm</command><command>-rf</command>",
            Some(schema),
            &nc,
        )
        .unwrap();
        let arr = v["command"].as_array().unwrap();
        assert_eq!(arr, &vec![Value::from("rm"), Value::from("-rf")]);
    }

    #[test]
    fn tuple_shape_from_numeric_children() {
        let nc = HashSet::new();
        let v = parse_value("point", "<0>1</0><1>2</1>", None, &nc).unwrap();
        assert_eq!(v, Value::Array(vec![Value::from(1), Value::from(2)]));
    }

    #[test]
    fn unclosed_tag_takes_rest_of_buffer() {
        let nc = HashSet::new();
        let v = parse_value("search", "<query>test query</query><limit>5", None, &nc).unwrap();
        assert_eq!(v["query"], "test query");
        assert_eq!(v["limit"], 5);
    }

    #[test]
    fn malformed_close_tag_whitespace_is_tolerated() {
        let nc = HashSet::new();
        let v = parse_value("a", "<x>hello</ x >", None, &nc).unwrap();
        assert_eq!(v["x"], "hello");
    }

    #[test]
    fn lone_invalid_angle_bracket_is_literal() {
        let nc = HashSet::new();
        let v = parse_value("a", "<msg>5 < 10</msg>", None, &nc).unwrap();
        assert_eq!(v["msg"], "5 < 10");
    }

    #[test]
    fn empty_body_is_empty_string() {
        let nc = HashSet::new();
        let v = parse_value("final", "", None, &nc).unwrap();
        assert_eq!(v, Value::String(String::new()));
    }

    #[test]
    fn trailing_prose_after_structured_body_is_rejected() {
        let nc = HashSet::new();
        let err = parse_value("get_weather", "<location>Seoul</location> done", None, &nc);
        assert!(err.is_err());
    }

    #[test]
    fn parse_prefix_stops_after_last_recognised_element() {
        let nc = HashSet::new();
        let (value, consumed) = parse_prefix("<query>hi</query> trailing junk", None, &nc).unwrap();
        assert_eq!(value["query"], "hi");
        assert_eq!(&"<query>hi</query> trailing junk"[..consumed], "<query>hi</query>");
    }

    #[test]
    fn parse_self_closing_root_repairs_unclosed_opener() {
        let nc = HashSet::new();
        let text = "<search\n<query>hi</query>\n/>";
        let (value, start, end) = parse_self_closing_root(text, "search", 0, None, &nc).unwrap();
        assert_eq!(value["query"], "hi");
        assert_eq!(start, 0);
        assert_eq!(end, text.len());
    }
}
