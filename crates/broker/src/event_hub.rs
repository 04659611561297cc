// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-client bounded ring of events plus live subscriber fan-out.
//!
//! Generalizes the byte-oriented ring buffer pattern (assign an
//! ever-increasing offset, evict the oldest slice once full, let a
//! reader request replay from an arbitrary past offset) to whole
//! [`Event`] values, and adds non-blocking per-subscriber fan-out so a
//! slow subscriber drops events instead of stalling the publisher or
//! lagging every other subscriber.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::event::Event;

const MIN_CAPACITY: usize = 16;
const SUBSCRIBER_HEADROOM: usize = 16;

struct HubInner {
    ring: VecDeque<Event>,
    next_id: u64,
    subscribers: HashMap<u64, mpsc::Sender<Event>>,
    next_sub_id: u64,
    closed: bool,
}

/// A per-client event bus with bounded replay and monotonic ids.
pub struct EventHub {
    inner: Mutex<HubInner>,
    capacity: usize,
}

impl EventHub {
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(MIN_CAPACITY);
        Arc::new(Self {
            capacity,
            inner: Mutex::new(HubInner {
                ring: VecDeque::with_capacity(capacity),
                next_id: 1,
                subscribers: HashMap::new(),
                next_sub_id: 0,
                closed: false,
            }),
        })
    }

    /// Assign the next id, append to the ring, and fan out to live
    /// subscribers. Never blocks: a subscriber whose queue is full is
    /// skipped for this event, not stalled on.
    pub fn publish(&self, kind: impl Into<String>, payload: Bytes) -> u64 {
        let mut inner = self.inner.lock();
        if inner.closed {
            return inner.next_id.saturating_sub(1);
        }

        let id = inner.next_id;
        inner.next_id += 1;
        let event = Event { id, kind: kind.into(), payload };

        if inner.ring.len() == self.capacity {
            inner.ring.pop_front();
        }
        inner.ring.push_back(event.clone());

        inner.subscribers.retain(|_, tx| {
            // try_send either delivers or drops on a full/closed queue;
            // a closed queue is pruned here instead of waiting for the
            // subscriber's own cancel handle to run.
            !matches!(tx.try_send(event.clone()), Err(mpsc::error::TrySendError::Closed(_)))
        });

        id
    }

    /// Subscribe for events with id strictly greater than `last_seen_id`.
    /// Buffered events newer than `last_seen_id` are enqueued synchronously
    /// in id order before the subscription starts receiving live events.
    /// If a requested id lies below the ring floor, replay silently starts
    /// from the floor (the gap is never fabricated) and `Subscription::gap`
    /// reports the floor id so the caller can surface the loss to the
    /// client instead of pretending the replay was complete (spec.md §9
    /// Open Question, resolved: surface it).
    pub fn subscribe_from(self: &Arc<Self>, last_seen_id: u64) -> Subscription {
        let mut inner = self.inner.lock();
        let (tx, rx) = mpsc::channel(self.capacity + SUBSCRIBER_HEADROOM);

        if inner.closed {
            drop(tx);
            return Subscription { rx, hub: Arc::clone(self), id: None, gap: None };
        }

        let floor = inner.ring.front().map(|e| e.id);
        let gap = match floor {
            Some(floor) if last_seen_id + 1 < floor => Some(floor),
            _ => None,
        };

        for event in inner.ring.iter().filter(|e| e.id > last_seen_id) {
            let _ = tx.try_send(event.clone());
        }

        let id = inner.next_sub_id;
        inner.next_sub_id += 1;
        inner.subscribers.insert(id, tx);
        Subscription { rx, hub: Arc::clone(self), id: Some(id), gap }
    }

    /// Greatest id assigned so far (0 if none).
    pub fn high_water_mark(&self) -> u64 {
        let inner = self.inner.lock();
        inner.next_id.saturating_sub(1)
    }

    /// Idempotent: marks the hub closed, drops the ring, and drops every
    /// live subscriber's sender so each observes EOF once its buffered
    /// events are drained.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.ring.clear();
        inner.subscribers.clear();
    }

    fn remove_subscriber(&self, id: u64) {
        let mut inner = self.inner.lock();
        inner.subscribers.remove(&id);
    }
}

/// A live subscription to a hub. Dropping it removes and closes the
/// subscriber queue exactly once.
pub struct Subscription {
    rx: mpsc::Receiver<Event>,
    hub: Arc<EventHub>,
    id: Option<u64>,
    /// Set to the ring floor id when the caller's requested replay point
    /// was older than the oldest buffered event, i.e. some events were
    /// permanently lost between what the caller last saw and the floor.
    gap: Option<u64>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// The ring floor id, if replay was clamped because the caller asked
    /// for a point older than the oldest buffered event.
    pub fn gap(&self) -> Option<u64> {
        self.gap
    }

    pub fn poll_recv(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Event>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.hub.remove_subscriber(id);
        }
    }
}

#[cfg(test)]
#[path = "event_hub_tests.rs"]
mod tests;
