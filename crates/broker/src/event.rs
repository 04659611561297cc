// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use bytes::Bytes;

/// One entry on a client's event hub. Ids are assigned strictly increasing
/// by one within a hub; no id is ever reused or skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: u64,
    pub kind: String,
    pub payload: Bytes,
}
