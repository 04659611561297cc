// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn http_status_matches_spec() {
    assert_eq!(ErrorCode::BadRequest.http_status(), 400);
    assert_eq!(ErrorCode::Unauthorized.http_status(), 401);
    assert_eq!(ErrorCode::MaxSessions.http_status(), 429);
    assert_eq!(ErrorCode::SpawnFailed.http_status(), 500);
    assert_eq!(ErrorCode::RPCFailed.http_status(), 500);
    assert_eq!(ErrorCode::Internal.http_status(), 500);
    assert_eq!(ErrorCode::Timeout.http_status(), 500);
    assert_eq!(ErrorCode::NotRunning.http_status(), 500);
}

#[test]
fn timeout_shares_rpc_failed_wire_code() {
    assert_eq!(ErrorCode::Timeout.as_str(), "rpc_failed");
    assert_eq!(ErrorCode::RPCFailed.as_str(), "rpc_failed");
}

#[test]
fn max_sessions_wire_code() {
    assert_eq!(ErrorCode::MaxSessions.as_str(), "max_sessions");
}

#[test]
fn error_body_carries_code_and_message() {
    let body = ErrorCode::BadRequest.to_error_body("empty body");
    assert_eq!(body.code, "bad_request");
    assert_eq!(body.message, "empty body");
}
