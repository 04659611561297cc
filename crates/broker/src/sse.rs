// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Renders a [`crate::event::Event`] as an `axum` server-sent-event frame,
//! per spec.md §4.5's framing rules: `id:` only when non-zero, `event:`
//! only when the kind is non-empty, one or more `data:` lines with LF
//! splitting and CRLF normalization, and a JSON-encoding fallback for
//! payloads that are not valid UTF-8 text.

use axum::response::sse::Event as SseEvent;

use crate::event::Event;

/// Convert one hub event into an `axum` SSE event. `axum`'s `Event::data`
/// already emits one `data:` line per `\n` in the string it is given, so
/// producing the normalized, newline-joined text in [`data_text`] is all
/// the framing work this function needs to do.
pub fn to_sse_event(event: &Event) -> SseEvent {
    let mut sse = SseEvent::default();
    if event.id != 0 {
        sse = sse.id(event.id.to_string());
    }
    if !event.kind.is_empty() {
        sse = sse.event(event.kind.clone());
    }
    sse.data(data_text(&event.payload))
}

/// Render an event payload as the text handed to `data()`: valid UTF-8 is
/// passed through with CRLF normalized to LF (so each logical line becomes
/// its own `data:` line); non-UTF-8 bytes are lossily decoded and then
/// JSON-string-encoded so the payload still survives as a single line,
/// falling back to an escaped error object if that encoding somehow fails.
pub fn data_text(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.replace("\r\n", "\n"),
        Err(_) => match serde_json::to_string(&String::from_utf8_lossy(payload)) {
            Ok(encoded) => encoded,
            Err(err) => format!("{{\"error\":\"{}\"}}", escape_json_string(&err.to_string())),
        },
    }
}

fn escape_json_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
#[path = "sse_tests.rs"]
mod tests;
