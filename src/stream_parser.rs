//! The streaming engine shared by every surface protocol: a push-driven
//! state machine that reads upstream [`StreamPart`]s and emits the typed
//! downstream event stream (`text-start/delta/end`,
//! `tool-input-start/delta/end`, `tool-call`).
//!
//! One instance owns one [`StreamState`] exclusively; nothing here is
//! shared across concurrent streams. Tool-call ids come from
//! [`crate::id::next_id`], which holds no shared state of its own.

use std::collections::HashSet;

use serde_json::Value;

use crate::error::{ErrorMetadata, MiddlewareError};
use crate::protocol::{validate_unique_names, Opener, Protocol};
use crate::schema::SchemaView;
use crate::types::{DownstreamPart, ParseOptions, StreamPart, ToolDefinition};

#[derive(Debug)]
enum Mode {
    Outside,
    Inside(InsideState),
}

#[derive(Debug)]
struct InsideState {
    tool_name: Option<String>,
    id: Option<String>,
    emitted_prefix: String,
    opener_literal: String,
    reparse_attempts: usize,
}

/// Owns the buffer, the tool-call/text-block state machines, and the
/// tool-input progress tracker for one model call. Parameterised over the
/// surface protocol it is recognising tags for.
pub struct StreamParser<P: Protocol> {
    protocol: P,
    tools: Vec<ToolDefinition>,
    options: ParseOptions,
    buffer: String,
    mode: Mode,
    current_text_id: Option<String>,
    started_text_ids: HashSet<String>,
    started_tool_ids: HashSet<String>,
}

impl<P: Protocol> StreamParser<P> {
    pub fn new(protocol: P, tools: Vec<ToolDefinition>, options: ParseOptions) -> Result<Self, MiddlewareError> {
        validate_unique_names(&tools)?;
        Ok(Self {
            protocol,
            tools,
            options,
            buffer: String::new(),
            mode: Mode::Outside,
            current_text_id: None,
            started_text_ids: HashSet::new(),
            started_tool_ids: HashSet::new(),
        })
    }

    fn schema_for(&self, name: &str) -> Option<SchemaView<'_>> {
        self.tools.iter().find(|t| t.name == name).map(|t| t.schema_view())
    }

    fn flush_text(&mut self, text: &str, out: &mut Vec<DownstreamPart>) {
        if text.is_empty() {
            return;
        }
        if self.current_text_id.is_none() {
            let id = crate::id::next_id();
            out.push(DownstreamPart::TextStart { id: id.clone() });
            self.current_text_id = Some(id);
        }
        out.push(DownstreamPart::TextDelta {
            id: self.current_text_id.clone().unwrap(),
            delta: text.to_string(),
        });
    }

    fn close_text(&mut self, out: &mut Vec<DownstreamPart>) {
        if let Some(id) = self.current_text_id.take() {
            out.push(DownstreamPart::TextEnd { id });
        }
    }

    /// Feed one upstream part; returns the downstream events it produced.
    pub fn push(&mut self, part: StreamPart) -> Vec<DownstreamPart> {
        let mut out = match part {
            StreamPart::TextDelta { delta, .. } => self.handle_text_delta(delta),
            StreamPart::Finish { reason, usage } => self.handle_finish(reason, usage),
            StreamPart::Error { error } => self.handle_other(DownstreamPart::Error { error }),
            StreamPart::PassThrough(v) => self.handle_other(DownstreamPart::PassThrough(v)),
        };
        self.check_id_invariants(&mut out);
        out
    }

    /// Equivalent to `Finish` handling for any still-open tool call or text
    /// block, for hosts that close the downstream pipe without an explicit
    /// upstream `Finish` part.
    pub fn flush(&mut self) -> Vec<DownstreamPart> {
        let mut out = self.handle_finish("stop".to_string(), None);
        self.check_id_invariants(&mut out);
        out
    }

    /// §3 invariant 6: no event may reference an `id` never introduced by a
    /// prior `*-start` event for that stream kind. This can only happen if
    /// the state machine above has a bug — every id in this module is
    /// generated once via [`crate::id::next_id`] and threaded through the
    /// matching `*Start`/`*Delta`/`*End`/`ToolCall` events by construction.
    /// Kept as a runtime check rather than dropped, since it is the one
    /// place §7 kind 4 (`InvariantViolation`) is actually detectable.
    fn check_id_invariants(&mut self, out: &mut Vec<DownstreamPart>) {
        let mut violation: Option<String> = None;
        for part in out.iter() {
            match part {
                DownstreamPart::TextStart { id } => {
                    self.started_text_ids.insert(id.clone());
                }
                DownstreamPart::TextDelta { id, .. } | DownstreamPart::TextEnd { id } => {
                    if !self.started_text_ids.contains(id) {
                        violation = Some(id.clone());
                        break;
                    }
                }
                DownstreamPart::ToolInputStart { id, .. } => {
                    self.started_tool_ids.insert(id.clone());
                }
                DownstreamPart::ToolInputDelta { id, .. }
                | DownstreamPart::ToolInputEnd { id }
                | DownstreamPart::ToolCall { id, .. } => {
                    if !self.started_tool_ids.contains(id) {
                        violation = Some(id.clone());
                        break;
                    }
                }
                _ => {}
            }
        }
        if let Some(id) = violation {
            let err = MiddlewareError::InvariantViolation { id: id.clone() };
            tracing::error!(id = %id, "{err}");
            out.push(DownstreamPart::Error { error: err.to_string() });
        }
    }

    fn handle_other(&mut self, extra: DownstreamPart) -> Vec<DownstreamPart> {
        let mut out = Vec::new();
        if matches!(self.mode, Mode::Outside) {
            let openers = self.protocol.openers(&self.tools);
            let safe_end = safe_prefix_end(&self.buffer, &openers);
            if safe_end > 0 {
                let text: String = self.buffer[..safe_end].to_string();
                self.buffer.drain(..safe_end);
                self.flush_text(&text, &mut out);
            }
        }
        out.push(extra);
        out
    }

    fn handle_text_delta(&mut self, delta: String) -> Vec<DownstreamPart> {
        self.buffer.push_str(&delta);
        let mut out = Vec::new();

        loop {
            let mode = std::mem::replace(&mut self.mode, Mode::Outside);
            match mode {
                Mode::Outside => {
                    let openers = self.protocol.openers(&self.tools);
                    if let Some((idx, opener)) = earliest_opener_match(&self.buffer, &openers) {
                        if idx > 0 {
                            let text: String = self.buffer[..idx].to_string();
                            self.buffer.drain(..idx);
                            self.flush_text(&text, &mut out);
                        }
                        self.buffer.drain(..opener.literal.len());

                        if opener.self_closing {
                            self.close_text(&mut out);
                            self.emit_self_closing_call(&opener, &mut out);
                            self.mode = Mode::Outside;
                            continue;
                        }

                        self.close_text(&mut out);
                        let mut inside = InsideState {
                            tool_name: opener.tool_name.clone(),
                            id: None,
                            emitted_prefix: String::new(),
                            opener_literal: opener.literal.clone(),
                            reparse_attempts: 0,
                        };
                        if let Some(name) = inside.tool_name.clone() {
                            let id = crate::id::next_id();
                            out.push(DownstreamPart::ToolInputStart {
                                id: id.clone(),
                                tool_name: name,
                            });
                            inside.id = Some(id);
                        }
                        self.mode = Mode::Inside(inside);
                        continue;
                    } else {
                        let safe_end = safe_prefix_end(&self.buffer, &openers);
                        if safe_end > 0 {
                            let text: String = self.buffer[..safe_end].to_string();
                            self.buffer.drain(..safe_end);
                            self.flush_text(&text, &mut out);
                        }
                        self.mode = Mode::Outside;
                        break;
                    }
                }
                Mode::Inside(mut inside) => {
                    let closer = self.protocol.closer_for(inside.tool_name.as_deref());
                    if let Some(rel) = self.buffer.find(&closer) {
                        let body: String = self.buffer[..rel].to_string();
                        self.buffer.drain(..rel + closer.len());
                        self.finalize_tool_call(inside, &body, &closer, &mut out);
                        self.mode = Mode::Outside;
                        continue;
                    } else {
                        let cut = partial_suffix_len(&self.buffer, &closer);
                        let body_for_progress = self.buffer[..self.buffer.len() - cut].to_string();
                        self.advance_progress(&mut inside, &body_for_progress, &mut out);
                        self.mode = Mode::Inside(inside);
                        break;
                    }
                }
            }
        }

        out
    }

    fn emit_self_closing_call(&mut self, opener: &Opener, out: &mut Vec<DownstreamPart>) {
        let tool_name = opener.tool_name.clone().unwrap_or_default();
        let id = crate::id::next_id();
        out.push(DownstreamPart::ToolInputStart {
            id: id.clone(),
            tool_name: tool_name.clone(),
        });
        let value = self.protocol.self_closing_input();
        let canonical = serde_json::to_string(&value).unwrap_or_else(|_| "{}".to_string());
        if !canonical.is_empty() {
            out.push(DownstreamPart::ToolInputDelta {
                id: id.clone(),
                delta: canonical.clone(),
            });
        }
        out.push(DownstreamPart::ToolInputEnd { id: id.clone() });
        out.push(DownstreamPart::ToolCall {
            id,
            tool_name,
            input: canonical,
        });
    }

    fn advance_progress(&mut self, inside: &mut InsideState, body_so_far: &str, out: &mut Vec<DownstreamPart>) {
        // Re-attempting a full structural reparse of the growing body on
        // every single appended chunk is O(n^2) over a long tool call; once
        // `max_reparses` attempts have been spent without the body closing,
        // stop trying and just keep accumulating. The final attempt still
        // happens at finalisation (closer found, or end-of-stream).
        if inside.reparse_attempts >= self.options.max_reparses {
            return;
        }
        inside.reparse_attempts += 1;

        let schema = inside.tool_name.as_ref().and_then(|n| self.schema_for(n));
        let progress = self.protocol.progressive(inside.tool_name.as_deref(), body_so_far, schema);

        if inside.tool_name.is_none() {
            if let Some(name) = progress.tool_name {
                inside.tool_name = Some(name.clone());
                if inside.id.is_none() {
                    let id = crate::id::next_id();
                    out.push(DownstreamPart::ToolInputStart { id: id.clone(), tool_name: name });
                    inside.id = Some(id);
                }
            }
        }

        if let (Some(id), Some(full)) = (inside.id.clone(), progress.canonical_input) {
            if full.len() > inside.emitted_prefix.len() && full.starts_with(&inside.emitted_prefix) {
                let delta = full[inside.emitted_prefix.len()..].to_string();
                out.push(DownstreamPart::ToolInputDelta { id, delta });
                inside.emitted_prefix = full;
            }
        }
    }

    fn finalize_tool_call(&mut self, inside: InsideState, body: &str, closer: &str, out: &mut Vec<DownstreamPart>) {
        self.close_text(out);

        let tool_name = match inside.tool_name.clone() {
            Some(n) => n,
            None => self
                .protocol
                .progressive(None, body, None)
                .tool_name
                .unwrap_or_default(),
        };

        let id = match inside.id.clone() {
            Some(id) => id,
            None => {
                let id = crate::id::next_id();
                out.push(DownstreamPart::ToolInputStart {
                    id: id.clone(),
                    tool_name: tool_name.clone(),
                });
                id
            }
        };

        let schema = self.schema_for(&tool_name);
        match self.protocol.parse_body(&tool_name, body, schema, &self.options) {
            Ok(value) => {
                let canonical = serde_json::to_string(&value).unwrap_or_default();
                if canonical.len() > inside.emitted_prefix.len() {
                    out.push(DownstreamPart::ToolInputDelta {
                        id: id.clone(),
                        delta: canonical[inside.emitted_prefix.len()..].to_string(),
                    });
                }
                out.push(DownstreamPart::ToolInputEnd { id: id.clone() });
                out.push(DownstreamPart::ToolCall { id, tool_name, input: canonical });
            }
            Err(e) => {
                tracing::debug!(tool_name = %tool_name, error = %e, "malformed tool call body suppressed");
                self.options.report_error(
                    &e.to_string(),
                    ErrorMetadata::new()
                        .with_tool_name(tool_name.clone())
                        .with_raw_segment(body.to_string()),
                );
                out.push(DownstreamPart::ToolInputEnd { id });
                if self.options.emit_raw_tool_call_text_on_error {
                    let raw = format!("{}{}{}", inside.opener_literal, body, closer);
                    self.flush_text(&raw, out);
                }
            }
        }
    }

    fn handle_finish(&mut self, reason: String, usage: Option<Value>) -> Vec<DownstreamPart> {
        let mut out = Vec::new();
        let mode = std::mem::replace(&mut self.mode, Mode::Outside);
        match mode {
            Mode::Outside => {
                if !self.buffer.is_empty() {
                    let text = std::mem::take(&mut self.buffer);
                    self.flush_text(&text, &mut out);
                }
            }
            Mode::Inside(inside) => {
                let body = std::mem::take(&mut self.buffer);
                let tool_name = inside.tool_name.clone();
                let closer = self.protocol.closer_for(tool_name.as_deref());
                let schema = tool_name.as_ref().and_then(|n| self.schema_for(n));

                let resolved_name = tool_name.clone().or_else(|| {
                    self.protocol.progressive(None, &body, None).tool_name
                });

                let parsed = resolved_name
                    .as_deref()
                    .and_then(|n| self.protocol.parse_body(n, &body, schema, &self.options).ok());

                let parsed = parsed.or_else(|| {
                    let cut = partial_suffix_len(&body, &closer);
                    if cut == 0 {
                        return None;
                    }
                    let truncated = &body[..body.len() - cut];
                    resolved_name
                        .as_deref()
                        .and_then(|n| self.protocol.parse_body(n, truncated, schema, &self.options).ok())
                });

                match parsed {
                    Some(value) => {
                        let tool_name = resolved_name.unwrap_or_default();
                        let id = inside.id.clone().unwrap_or_else(|| {
                            let id = crate::id::next_id();
                            out.push(DownstreamPart::ToolInputStart {
                                id: id.clone(),
                                tool_name: tool_name.clone(),
                            });
                            id
                        });
                        let canonical = serde_json::to_string(&value).unwrap_or_default();
                        if canonical.len() > inside.emitted_prefix.len() {
                            out.push(DownstreamPart::ToolInputDelta {
                                id: id.clone(),
                                delta: canonical[inside.emitted_prefix.len()..].to_string(),
                            });
                        }
                        out.push(DownstreamPart::ToolInputEnd { id: id.clone() });
                        out.push(DownstreamPart::ToolCall { id, tool_name, input: canonical });
                    }
                    None => {
                        let tool_name = resolved_name.unwrap_or_default();
                        let err = MiddlewareError::UnterminatedToolCall {
                            tool_name: tool_name.clone(),
                            raw: body.clone(),
                            source: "body still unparseable at end of stream".to_string(),
                        };
                        self.options.report_error(
                            &err.to_string(),
                            ErrorMetadata::new()
                                .with_tool_name(tool_name.clone())
                                .with_raw_segment(body.clone()),
                        );
                        if let Some(id) = inside.id.clone() {
                            out.push(DownstreamPart::ToolInputEnd { id });
                        }
                        if self.options.emit_raw_tool_call_text_on_error {
                            let raw = format!("{}{}", inside.opener_literal, body);
                            self.flush_text(&raw, &mut out);
                        }
                    }
                }
            }
        }
        self.close_text(&mut out);
        out.push(DownstreamPart::Finish { reason, usage });
        out
    }
}

/// Find the earliest occurrence, over every recognised opener, of its
/// literal anywhere in `buffer`. Ties (same start index) prefer the
/// longest literal, since a longer match is always the more specific one.
fn earliest_opener_match<'a>(buffer: &str, openers: &'a [Opener]) -> Option<(usize, &'a Opener)> {
    openers
        .iter()
        .filter_map(|o| buffer.find(&o.literal).map(|idx| (idx, o)))
        .min_by_key(|(idx, o)| (*idx, std::cmp::Reverse(o.literal.len())))
}

/// The partial-tag look-ahead rule: the earliest byte index `i` such that
/// `buffer[i..]` is a non-empty, strict prefix of some opener's literal.
/// Only called once a full match has already failed, so any match found
/// here is necessarily partial.
fn safe_prefix_end(buffer: &str, openers: &[Opener]) -> usize {
    for (i, _) in buffer.char_indices() {
        let suffix = &buffer[i..];
        if openers.iter().any(|o| o.literal.starts_with(suffix)) {
            return i;
        }
    }
    buffer.len()
}

/// Longest suffix of `buffer` that is a strict, non-empty prefix of
/// `literal` — used to keep a partially-typed closer out of the body text
/// handed to progressive parsing.
fn partial_suffix_len(buffer: &str, literal: &str) -> usize {
    let max = literal.len().saturating_sub(1).min(buffer.len());
    for k in (1..=max).rev() {
        if buffer.ends_with(&literal[..k]) {
            return k;
        }
    }
    0
}
