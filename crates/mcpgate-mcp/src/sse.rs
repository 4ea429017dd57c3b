//! Server-Sent Events framing for MCP streams.
//!
//! Network reads do not respect event boundaries, so bytes are buffered until
//! complete lines are available and lines are accumulated until a blank line
//! closes the event.

use std::fmt;

use serde_json::Value;

/// Event type an MCP server uses to announce its POST endpoint.
pub const ENDPOINT_EVENT: &str = "endpoint";

/// Event type carrying JSON-RPC messages.
pub const MESSAGE_EVENT: &str = "message";

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    /// The event type (from "event:" line)
    pub event: Option<String>,
    /// The event data ("data:" lines joined with newlines)
    pub data: String,
    /// The event ID (from "id:" line)
    pub id: Option<String>,
    /// Retry value (from "retry:" line)
    pub retry: Option<u64>,
}

impl SseEvent {
    /// The event type, defaulting to "message".
    pub fn kind(&self) -> &str {
        self.event.as_deref().unwrap_or(MESSAGE_EVENT)
    }

    /// Whether this event announces the POST endpoint.
    pub fn is_endpoint(&self) -> bool {
        self.kind() == ENDPOINT_EVENT
    }

    /// The data parsed as JSON, if it is JSON.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.data).ok()
    }
}

/// Incremental SSE parser.
#[derive(Default)]
pub struct SseParser {
    /// Bytes not yet terminated by a newline
    buffer: Vec<u8>,
    current_event: Option<String>,
    current_data: Vec<String>,
    current_id: Option<String>,
    current_retry: Option<u64>,
}

impl SseParser {
    /// Create a new SSE parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes into the parser and return any complete events.
    ///
    /// Bytes are buffered raw so a multi-byte character split across two
    /// reads is decoded intact.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.trim_end_matches('\r');

            if line.is_empty() {
                if let Some(event) = self.finalize_event() {
                    events.push(event);
                }
                continue;
            }

            self.process_line(line);
        }

        events
    }

    /// Flush a trailing event that was not followed by a blank line.
    ///
    /// Used when a finite body (e.g. a streamable HTTP reply) ends.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let raw = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&raw).into_owned();
            let line = line.trim_end_matches('\r');
            if !line.is_empty() {
                self.process_line(line);
            }
        }
        self.finalize_event()
    }

    fn process_line(&mut self, line: &str) {
        // Heartbeat comment: never completes an event.
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.current_event = Some(value.to_string()),
            "data" => self.current_data.push(value.to_string()),
            "id" => self.current_id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.parse() {
                    self.current_retry = Some(ms);
                }
            }
            _ => {}
        }
    }

    fn finalize_event(&mut self) -> Option<SseEvent> {
        if self.current_data.is_empty() {
            self.current_event = None;
            self.current_id = None;
            self.current_retry = None;
            return None;
        }

        let event = SseEvent {
            event: self.current_event.take(),
            data: self.current_data.join("\n"),
            id: self.current_id.take(),
            retry: self.current_retry.take(),
        };

        self.current_data.clear();
        Some(event)
    }

    /// Check if there's any buffered data.
    pub fn has_buffered_data(&self) -> bool {
        !self.buffer.is_empty() || !self.current_data.is_empty()
    }
}

impl fmt::Debug for SseParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseParser")
            .field("buffer_len", &self.buffer.len())
            .field("current_data_lines", &self.current_data.len())
            .finish()
    }
}
