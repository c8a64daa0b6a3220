//! Middleware that teaches tool/function calling to language models whose
//! wire format has no native structured tool-call support.
//!
//! It transforms model input: the caller's declared tool schemas are
//! lifted into a textual system-prompt fragment in a chosen surface
//! protocol ([`protocol::SurfaceProtocolKind`]). More importantly it
//! transforms model output: a streamed character sequence interleaving
//! free prose with tool-call markup is reparsed, chunk-boundary-agnostic,
//! into a typed event stream of text and tool-call parts
//! ([`stream_parser::StreamParser`]), plus a non-streaming counterpart for
//! a single complete generation ([`generate_parser::GenerateParser`]).
//!
//! Four surface protocols are supported out of the box: `JsonTagged`
//! (`<tool_call>{...}</tool_call>`), `Xml` (one element per tool call),
//! `YamlInXml` (the XML envelope with a YAML body), and `MixedJsonXml`
//! (the Qwen3Coder-style `<function=NAME><parameter=KEY>` grammar).

pub mod error;
pub mod generate_parser;
pub mod id;
pub mod protocol;
pub mod relaxed_json;
pub mod relaxed_xml;
pub mod schema;
pub mod stream_parser;
pub mod transform;
pub mod types;

pub use error::MiddlewareError;
pub use generate_parser::GenerateParser;
pub use protocol::{Protocol, SurfaceProtocolKind};
pub use schema::SchemaView;
pub use stream_parser::StreamParser;
pub use types::{
    ContentPart, DownstreamPart, ParseOptions, PromptPlacement, StreamPart, ToolCall, ToolDefinition,
    ToolResponseMessage,
};
