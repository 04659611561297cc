// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use bytes::Bytes;

#[test]
fn multi_line_text_payload_passes_through_with_embedded_newlines() {
    assert_eq!(data_text(b"line one\nline two"), "line one\nline two");
}

#[test]
fn crlf_is_normalized_to_lf() {
    assert_eq!(data_text(b"a\r\nb"), "a\nb");
}

#[test]
fn non_utf8_payload_falls_back_to_json_encoded_string() {
    let rendered = data_text(&[0xff, 0xfe, b'a']);
    // Lossily decoded and JSON-string-encoded: quoted, single line, no raw
    // invalid bytes remain.
    assert!(rendered.starts_with('"') && rendered.ends_with('"'));
    assert!(!rendered.contains('\n'));
}

#[test]
fn to_sse_event_does_not_panic_on_any_field_combination() {
    let zero_id = Event { id: 0, kind: String::new(), payload: Bytes::from_static(b"{}") };
    let with_id_and_kind =
        Event { id: 5, kind: "child_stdout".to_owned(), payload: Bytes::from_static(b"{}") };
    let _ = to_sse_event(&zero_id);
    let _ = to_sse_event(&with_id_and_kind);
}
