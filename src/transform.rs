//! The parameter-transform shell: the thin glue a host provider uses to
//! inject tool definitions into a system prompt and collapse tool results
//! back into a plain text message. The transform itself — merging
//! consecutive same-role messages, rewriting a provider's call-parameter
//! bundle — is host-specific plumbing and out of scope here; what this
//! module supplies are the protocol-independent building blocks the
//! transform is built out of.

use serde_json::Value;

use crate::error::MiddlewareError;
use crate::types::{PromptPlacement, ToolDefinition, ToolResponseMessage};

/// The default `templateFn` passed to `Protocol::format_tools`: renders
/// each declared tool as a name, an optional description, and a bullet
/// list of its parameters with required/optional and type, the way
/// `distri-parsers::summary::get_available_tools` renders tools for a
/// model-facing prompt.
pub fn default_system_prompt_template(tools: &[ToolDefinition]) -> String {
    let mut out = String::from("You have access to the following tools:\n\n");
    for tool in tools {
        out.push_str(&format!("- {}", tool.name));
        if let Some(desc) = &tool.description {
            out.push_str(&format!(": {desc}"));
        }
        out.push('\n');

        let view = tool.schema_view();
        let required = view.required();
        for (name, prop) in view.properties() {
            let marker = if required.contains(name) { "required" } else { "optional" };
            let kind = prop.description().unwrap_or("");
            if kind.is_empty() {
                out.push_str(&format!("    - {name} ({marker})\n"));
            } else {
                out.push_str(&format!("    - {name} ({marker}): {kind}\n"));
            }
        }
    }
    out.trim_end().to_string()
}

/// Collapses an ordered list of tool-result records into a single
/// user-facing text block, one line per result.
pub fn default_format_tool_response(responses: &[ToolResponseMessage]) -> String {
    responses
        .iter()
        .map(|r| format!("Tool result for {} ({}): {}", r.tool_name, r.tool_call_id, r.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `{protocol, toolSystemPromptTemplate, placement}`. The protocol
/// selection itself lives behind `SurfaceProtocolKind`, constructed by the
/// caller; this struct only carries the placement/template knobs that are
/// protocol-agnostic.
pub struct MiddlewareConfig {
    pub placement: PromptPlacement,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self { placement: PromptPlacement::Last }
    }
}

/// `toolChoice.type` as recognised by the tool-choice coercion path.
#[derive(Debug, Clone)]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Tool(String),
}

/// When `toolChoice` forces a specific tool or any tool, build the JSON
/// schema the host should constrain generation to (either the named
/// tool's `{name: const, arguments: <schema>}` shape, or a discriminated
/// union over every declared tool). Returns `Ok(None)` for `Auto`/`None`,
/// where the normal streaming path applies unchanged. Errs with
/// `UnknownToolName` if `ToolChoice::Tool` names a tool that was never
/// declared to this middleware.
pub fn response_format_for_tool_choice(
    tools: &[ToolDefinition],
    choice: &ToolChoice,
) -> Result<Option<Value>, MiddlewareError> {
    let shape_for = |tool: &ToolDefinition| {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": { "const": tool.name },
                "arguments": tool.input_schema,
            },
            "required": ["name", "arguments"],
        })
    };

    match choice {
        ToolChoice::Auto | ToolChoice::None => Ok(None),
        ToolChoice::Tool(name) => match tools.iter().find(|t| &t.name == name) {
            Some(tool) => Ok(Some(shape_for(tool))),
            None => {
                tracing::warn!(tool_name = %name, "toolChoice names a tool that was not declared");
                Err(MiddlewareError::UnknownToolName(name.clone()))
            }
        },
        ToolChoice::Required => {
            let variants: Vec<Value> = tools.iter().map(shape_for).collect();
            Ok(Some(serde_json::json!({ "oneOf": variants })))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "get_weather",
                serde_json::json!({
                    "type": "object",
                    "properties": {"location": {"type": "string", "description": "city name"}},
                    "required": ["location"],
                }),
            )
            .with_description("Look up the current weather"),
            ToolDefinition::new("get_location", serde_json::json!({"type": "object"})),
        ]
    }

    #[test]
    fn default_template_lists_required_and_optional_params() {
        let rendered = default_system_prompt_template(&tools());
        assert!(rendered.contains("get_weather: Look up the current weather"));
        assert!(rendered.contains("location (required): city name"));
        assert!(rendered.contains("get_location"));
    }

    #[test]
    fn tool_choice_auto_and_none_bypass_response_format() {
        assert!(response_format_for_tool_choice(&tools(), &ToolChoice::Auto).unwrap().is_none());
        assert!(response_format_for_tool_choice(&tools(), &ToolChoice::None).unwrap().is_none());
    }

    #[test]
    fn tool_choice_named_tool_constrains_to_its_schema() {
        let format = response_format_for_tool_choice(&tools(), &ToolChoice::Tool("get_weather".to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(format["properties"]["name"]["const"], "get_weather");
    }

    #[test]
    fn tool_choice_required_unions_every_declared_tool() {
        let format = response_format_for_tool_choice(&tools(), &ToolChoice::Required).unwrap().unwrap();
        assert_eq!(format["oneOf"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn tool_choice_unknown_tool_name_is_an_error() {
        let err = response_format_for_tool_choice(&tools(), &ToolChoice::Tool("does_not_exist".to_string()))
            .unwrap_err();
        assert!(matches!(err, MiddlewareError::UnknownToolName(name) if name == "does_not_exist"));
    }

    #[test]
    fn format_tool_response_joins_one_line_per_result() {
        let responses = vec![
            ToolResponseMessage { tool_call_id: "call_1".to_string(), tool_name: "get_weather".to_string(), content: "Sunny, 18C".to_string() },
            ToolResponseMessage { tool_call_id: "call_2".to_string(), tool_name: "get_location".to_string(), content: "Seoul".to_string() },
        ];
        let rendered = default_format_tool_response(&responses);
        assert_eq!(rendered.lines().count(), 2);
        assert!(rendered.contains("get_weather"));
        assert!(rendered.contains("Sunny, 18C"));
    }
}
