// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Extracts the stable client identifier from an incoming HTTP request.
//!
//! Identity is transport-dependent by design (spec.md §4.4/§9): the
//! loopback listener and the overlay listener are each handed their own
//! [`IdentityProvider`] at construction, so a client-supplied header can
//! never leak onto the overlay listener as if it were an authenticated
//! peer. This generalizes the teacher's `transport/auth.rs` middleware
//! (a single shared bearer-token check) into a pluggable per-listener
//! extraction step instead.

use std::net::SocketAddr;

use axum::http::HeaderMap;
use futures_util::future::BoxFuture;

use crate::error::ErrorCode;
use crate::overlay::OverlayNode;

/// Everything an [`IdentityProvider`] needs to resolve a client key,
/// decoupled from any particular HTTP framework type so providers are
/// trivially unit-testable.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub headers: HeaderMap,
    pub remote_addr: Option<SocketAddr>,
}

/// A single-method capability: resolve the stable client key for one
/// request, or fail closed. Object-safe so the HTTP bridge can hold one
/// trait object per listener.
pub trait IdentityProvider: Send + Sync {
    fn client_key<'a>(&'a self, ctx: &'a RequestContext) -> BoxFuture<'a, Result<String, ErrorCode>>;
}

/// Test/dev provider: always returns the same fixed key. An empty key is
/// rejected at construction time's call site (callers should not build one
/// with an empty key), but `client_key` also re-checks defensively.
pub struct StaticProvider {
    key: String,
}

impl StaticProvider {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl IdentityProvider for StaticProvider {
    fn client_key<'a>(&'a self, _ctx: &'a RequestContext) -> BoxFuture<'a, Result<String, ErrorCode>> {
        Box::pin(async move {
            if self.key.is_empty() {
                Err(ErrorCode::Unauthorized)
            } else {
                Ok(self.key.clone())
            }
        })
    }
}

/// Loopback/dev provider: reads a configurable request header; if absent,
/// falls back to the request's remote host (port stripped) as a
/// best-effort stable key.
pub struct HeaderProvider {
    header_name: String,
}

impl HeaderProvider {
    pub fn new(header_name: impl Into<String>) -> Self {
        Self { header_name: header_name.into() }
    }
}

impl IdentityProvider for HeaderProvider {
    fn client_key<'a>(&'a self, ctx: &'a RequestContext) -> BoxFuture<'a, Result<String, ErrorCode>> {
        Box::pin(async move {
            if let Some(value) = ctx.headers.get(self.header_name.as_str()) {
                let key = value.to_str().map_err(|_| ErrorCode::Unauthorized)?;
                if !key.is_empty() {
                    return Ok(key.to_owned());
                }
            }
            let host = ctx
                .remote_addr
                .map(|addr| addr.ip().to_string())
                .ok_or(ErrorCode::Unauthorized)?;
            if host.is_empty() {
                Err(ErrorCode::Unauthorized)
            } else {
                Ok(host)
            }
        })
    }
}

/// Overlay provider: the only authoritative identity source on the public
/// surface. Queries the overlay node's "who is the peer at this remote
/// address" interface; no request header participates.
pub struct OverlayProvider<N: OverlayNode> {
    overlay: std::sync::Arc<N>,
}

impl<N: OverlayNode> OverlayProvider<N> {
    pub fn new(overlay: std::sync::Arc<N>) -> Self {
        Self { overlay }
    }
}

impl<N: OverlayNode + 'static> IdentityProvider for OverlayProvider<N> {
    fn client_key<'a>(&'a self, ctx: &'a RequestContext) -> BoxFuture<'a, Result<String, ErrorCode>> {
        Box::pin(async move {
            let addr = ctx.remote_addr.ok_or(ErrorCode::Unauthorized)?;
            self.overlay.whois(addr).await.map_err(|_| ErrorCode::Unauthorized)
        })
    }
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
