// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::Utc;
use tokio::sync::mpsc;

use crate::events::{AgentEvent, EventEnvelope};

/// Ordered single-producer / single-consumer event stream for one session.
///
/// The producer (the agent run) never blocks: emission appends to a bounded
/// retention ring and forwards to the live consumer if one is attached.
/// A consumer that disconnects mid-run loses nothing within the retention
/// window; on reconnect it replays the backlog and learns whether events
/// beyond the window were dropped.
pub struct EventBus {
    inner: Mutex<Inner>,
}

struct Inner {
    seq: u64,
    retention: VecDeque<EventEnvelope>,
    capacity: usize,
    /// Count of envelopes evicted from the retention ring.
    evicted: u64,
    live: Option<mpsc::UnboundedSender<EventEnvelope>>,
}

/// Result of (re)subscribing: the retained backlog, whether a gap precedes
/// it (events aged out of retention), and the live receiver.
pub struct Subscription {
    pub backlog: Vec<EventEnvelope>,
    pub gap: bool,
    pub receiver: mpsc::UnboundedReceiver<EventEnvelope>,
}

impl EventBus {
    pub fn new(retention: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                seq: 0,
                retention: VecDeque::new(),
                capacity: retention.max(1),
                evicted: 0,
                live: None,
            }),
        }
    }

    /// Emit one event.  Returns its sequence number.
    pub fn emit(&self, event: AgentEvent) -> u64 {
        let mut inner = self.inner.lock().expect("event bus poisoned");
        inner.seq += 1;
        let envelope = EventEnvelope {
            seq: inner.seq,
            timestamp: Utc::now(),
            event,
        };
        if inner.retention.len() == inner.capacity {
            inner.retention.pop_front();
            inner.evicted += 1;
        }
        inner.retention.push_back(envelope.clone());
        if let Some(tx) = &inner.live {
            if tx.send(envelope).is_err() {
                // Consumer went away; production continues into retention.
                inner.live = None;
            }
        }
        inner.seq
    }

    /// Attach (or re-attach) the consumer, replaying everything retained
    /// after `after_seq` (0 for a fresh consumer).  `gap` is true when
    /// events between `after_seq` and the replayed backlog were evicted.
    pub fn subscribe_after(&self, after_seq: u64) -> Subscription {
        let mut inner = self.inner.lock().expect("event bus poisoned");
        let (tx, rx) = mpsc::unbounded_channel();
        let backlog: Vec<EventEnvelope> = inner
            .retention
            .iter()
            .filter(|e| e.seq > after_seq)
            .cloned()
            .collect();
        let earliest_retained = inner.retention.front().map(|e| e.seq).unwrap_or(inner.seq + 1);
        let gap = inner.evicted > 0 && after_seq + 1 < earliest_retained;
        inner.live = Some(tx);
        Subscription {
            backlog,
            gap,
            receiver: rx,
        }
    }

    /// Attach a fresh consumer from the beginning of the retention window.
    pub fn subscribe(&self) -> Subscription {
        self.subscribe_after(0)
    }

    /// Detach the live consumer; retention keeps filling.
    pub fn detach(&self) {
        self.inner.lock().expect("event bus poisoned").live = None;
    }

    /// Sequence number of the most recent event.
    pub fn last_seq(&self) -> u64 {
        self.inner.lock().expect("event bus poisoned").seq
    }

    /// Snapshot of the retained envelopes (tests and diagnostics).
    pub fn retained(&self) -> Vec<EventEnvelope> {
        self.inner
            .lock()
            .expect("event bus poisoned")
            .retention
            .iter()
            .cloned()
            .collect()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn status(msg: &str) -> AgentEvent {
        AgentEvent::Status {
            message: msg.into(),
        }
    }

    #[test]
    fn emission_order_is_preserved() {
        let bus = EventBus::new(100);
        bus.emit(status("a"));
        bus.emit(status("b"));
        bus.emit(status("c"));
        let seqs: Vec<u64> = bus.retained().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn live_consumer_receives_events_in_order() {
        let bus = EventBus::new(100);
        let mut sub = bus.subscribe();
        bus.emit(status("one"));
        bus.emit(status("two"));
        let first = sub.receiver.recv().await.unwrap();
        let second = sub.receiver.recv().await.unwrap();
        assert!(first.seq < second.seq);
        assert_eq!(first.event, status("one"));
    }

    #[tokio::test]
    async fn disconnect_then_reconnect_replays_backlog() {
        let bus = EventBus::new(100);
        let sub = bus.subscribe();
        drop(sub.receiver);
        bus.emit(status("missed-1"));
        bus.emit(status("missed-2"));
        let again = bus.subscribe_after(0);
        assert_eq!(again.backlog.len(), 2);
        assert!(!again.gap);
    }

    #[tokio::test]
    async fn reconnect_resumes_after_seen_seq() {
        let bus = EventBus::new(100);
        bus.emit(status("seen"));
        let seen = bus.last_seq();
        bus.emit(status("unseen"));
        let sub = bus.subscribe_after(seen);
        assert_eq!(sub.backlog.len(), 1);
        assert_eq!(sub.backlog[0].event, status("unseen"));
    }

    #[test]
    fn overflow_evicts_oldest_and_flags_gap() {
        let bus = EventBus::new(3);
        for i in 0..6 {
            bus.emit(status(&format!("e{i}")));
        }
        let sub = bus.subscribe_after(0);
        assert_eq!(sub.backlog.len(), 3);
        assert!(sub.gap, "evicted events must surface as a gap");
        assert_eq!(sub.backlog[0].seq, 4);
    }

    #[test]
    fn no_gap_when_reconnect_is_within_retention() {
        let bus = EventBus::new(10);
        for i in 0..6 {
            bus.emit(status(&format!("e{i}")));
        }
        let sub = bus.subscribe_after(3);
        assert!(!sub.gap);
        assert_eq!(sub.backlog.len(), 3);
    }

    #[test]
    fn producer_never_blocks_without_consumer() {
        let bus = EventBus::new(4);
        for i in 0..10_000 {
            bus.emit(status(&format!("e{i}")));
        }
        assert_eq!(bus.last_seq(), 10_000);
    }
}
