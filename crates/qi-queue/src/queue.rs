// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: Apache-2.0
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::{Message, MessageId, Payload, Priority};

/// Queue failures.  Codes are stable strings used in user-facing `Error`
/// messages.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("message queue is closed")]
    Closed,
    #[error("message queue is full (capacity {0})")]
    Full(usize),
    #[error("another consumer is already iterating this queue")]
    AlreadyIterating,
}

impl QueueError {
    pub fn code(&self) -> &'static str {
        match self {
            QueueError::Closed => "QUEUE_CLOSED",
            QueueError::Full(_) => "QUEUE_FULL",
            QueueError::AlreadyIterating => "QUEUE_ALREADY_ITERATING",
        }
    }
}

/// Best-effort counters; reading them never blocks the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dequeued: u64,
    pub expired: u64,
    pub cancelled: u64,
    /// Response messages sent while no subscriber was attached.
    pub undelivered: u64,
}

/// Heap entry ordered by (priority desc, seq asc).
struct Entry(Message);

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority == other.0.priority && self.0.seq == other.0.seq
    }
}
impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.seq.cmp(&self.0.seq))
    }
}

struct Inner {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    closed: bool,
    iterating: bool,
    capacity: Option<usize>,
    cancelled: HashSet<MessageId>,
    stats: QueueStats,
}

/// The single-writer, single-reader message queue.
///
/// Consumer-bound kinds buffer in a priority heap drained by the one
/// [`MessageIter`]; response kinds bypass the buffer and fan out over a
/// broadcast channel in enqueue order, so subscribers observe responses
/// exactly as the handlers produced them.
pub struct MessageQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    outbound: broadcast::Sender<Message>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// A bounded queue rejects enqueues past `capacity` with `QUEUE_FULL`.
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        let (outbound, _) = broadcast::channel(1024);
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                next_seq: 0,
                closed: false,
                iterating: false,
                capacity,
                cancelled: HashSet::new(),
                stats: QueueStats::default(),
            }),
            notify: Notify::new(),
            outbound,
        }
    }

    /// Enqueue a message, assigning its sequence number atomically.
    pub fn enqueue(&self, payload: Payload, priority: Priority) -> Result<MessageId, QueueError> {
        self.enqueue_with(payload, priority, None, None)
    }

    /// Enqueue a response correlated with the request that produced it.
    pub fn enqueue_correlated(
        &self,
        payload: Payload,
        priority: Priority,
        correlation_id: MessageId,
    ) -> Result<MessageId, QueueError> {
        self.enqueue_with(payload, priority, Some(correlation_id), None)
    }

    pub fn enqueue_with(
        &self,
        payload: Payload,
        priority: Priority,
        correlation_id: Option<MessageId>,
        ttl: Option<Duration>,
    ) -> Result<MessageId, QueueError> {
        let message = {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            if inner.closed {
                return Err(QueueError::Closed);
            }
            let is_response = payload.kind().is_response();
            if !is_response {
                if let Some(cap) = inner.capacity {
                    if inner.heap.len() >= cap {
                        return Err(QueueError::Full(cap));
                    }
                }
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            let message = Message {
                id: Uuid::new_v4(),
                seq,
                priority,
                payload,
                correlation_id,
                enqueued_at: Utc::now(),
                ttl,
            };
            inner.stats.enqueued += 1;
            if is_response {
                if self.outbound.send(message.clone()).is_err() {
                    inner.stats.undelivered += 1;
                }
                trace!(kind = ?message.kind(), seq, "response fanned out");
                return Ok(message.id);
            }
            inner.heap.push(Entry(message.clone()));
            message
        };
        trace!(kind = ?message.kind(), seq = message.seq, "message buffered");
        self.notify.notify_one();
        Ok(message.id)
    }

    /// Subscribe to the derived read-only stream of response messages.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.outbound.subscribe()
    }

    /// Mark a buffered message cancelled; the consumer will skip it.
    /// Returns `false` when the queue is already closed.
    pub fn cancel(&self, id: MessageId) -> bool {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if inner.closed {
            return false;
        }
        inner.cancelled.insert(id);
        true
    }

    /// Obtain the single consumer handle.  A second concurrent call fails
    /// with `QUEUE_ALREADY_ITERATING` — loudly, because two consumers would
    /// reintroduce the duplicate-dispatch bug this queue exists to prevent.
    pub fn iterate(&self) -> Result<MessageIter<'_>, QueueError> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if inner.closed {
            return Err(QueueError::Closed);
        }
        if inner.iterating {
            return Err(QueueError::AlreadyIterating);
        }
        inner.iterating = true;
        Ok(MessageIter { queue: self })
    }

    /// Close the queue: rejects further enqueues, wakes pending readers,
    /// drops unconsumed messages.  Idempotent.
    pub fn destroy(&self) {
        {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.heap.clear();
            inner.cancelled.clear();
        }
        debug!("message queue destroyed");
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("queue lock poisoned").closed
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.lock().expect("queue lock poisoned").stats
    }

    /// Pop the highest-priority, lowest-sequence live message, dropping
    /// expired and cancelled entries on the way.
    fn pop_ready(&self) -> Option<Message> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let now = Utc::now();
        while let Some(Entry(msg)) = inner.heap.pop() {
            if msg.is_expired(now) {
                inner.stats.expired += 1;
                trace!(seq = msg.seq, "message expired in buffer");
                continue;
            }
            if inner.cancelled.remove(&msg.id) {
                inner.stats.cancelled += 1;
                trace!(seq = msg.seq, "message cancelled in buffer");
                continue;
            }
            inner.stats.dequeued += 1;
            return Some(msg);
        }
        None
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// The lazy single-consumer sequence of messages.
pub struct MessageIter<'a> {
    queue: &'a MessageQueue,
}

impl std::fmt::Debug for MessageIter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageIter").finish_non_exhaustive()
    }
}

impl MessageIter<'_> {
    /// Return the next live message, suspending until one arrives or the
    /// queue is destroyed (then `None`).
    pub async fn next(&mut self) -> Option<Message> {
        loop {
            // Arm the notification before checking the buffer so an enqueue
            // between check and await cannot be lost.
            let notified = self.queue.notify.notified();
            if let Some(msg) = self.queue.pop_ready() {
                return Some(msg);
            }
            if self.queue.is_closed() {
                return None;
            }
            notified.await;
        }
    }
}

impl Drop for MessageIter<'_> {
    fn drop(&mut self) {
        let mut inner = self.queue.inner.lock().expect("queue lock poisoned");
        inner.iterating = false;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageKind;

    fn user(text: &str) -> Payload {
        Payload::UserInput { text: text.into() }
    }

    #[tokio::test]
    async fn fifo_within_same_priority() {
        let q = MessageQueue::new();
        q.enqueue(user("a"), Priority::Normal).unwrap();
        q.enqueue(user("b"), Priority::Normal).unwrap();
        q.enqueue(user("c"), Priority::Normal).unwrap();

        let mut it = q.iterate().unwrap();
        for expected in ["a", "b", "c"] {
            let m = it.next().await.unwrap();
            match m.payload {
                Payload::UserInput { text } => assert_eq!(text, expected),
                _ => panic!("wrong payload"),
            }
        }
    }

    #[tokio::test]
    async fn higher_priority_dequeues_first() {
        let q = MessageQueue::new();
        q.enqueue(user("low"), Priority::Normal).unwrap();
        q.enqueue(Payload::Cancel { target: None }, Priority::Critical)
            .unwrap();

        let mut it = q.iterate().unwrap();
        assert_eq!(it.next().await.unwrap().kind(), MessageKind::Cancel);
        assert_eq!(it.next().await.unwrap().kind(), MessageKind::UserInput);
    }

    #[tokio::test]
    async fn sequence_numbers_are_monotone() {
        let q = MessageQueue::new();
        let mut last = None;
        for i in 0..5 {
            q.enqueue(user(&i.to_string()), Priority::Normal).unwrap();
        }
        let mut it = q.iterate().unwrap();
        for _ in 0..5 {
            let m = it.next().await.unwrap();
            if let Some(prev) = last {
                assert!(m.seq > prev);
            }
            last = Some(m.seq);
        }
    }

    #[tokio::test]
    async fn second_iterator_fails_loudly() {
        let q = MessageQueue::new();
        let _first = q.iterate().unwrap();
        let err = q.iterate().unwrap_err();
        assert_eq!(err, QueueError::AlreadyIterating);
        assert_eq!(err.code(), "QUEUE_ALREADY_ITERATING");
    }

    #[tokio::test]
    async fn iterator_slot_freed_on_drop() {
        let q = MessageQueue::new();
        {
            let _it = q.iterate().unwrap();
        }
        assert!(q.iterate().is_ok());
    }

    #[tokio::test]
    async fn enqueue_after_destroy_is_closed() {
        let q = MessageQueue::new();
        q.destroy();
        let err = q.enqueue(user("late"), Priority::Normal).unwrap_err();
        assert_eq!(err, QueueError::Closed);
        assert_eq!(err.code(), "QUEUE_CLOSED");
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let q = MessageQueue::new();
        q.enqueue(user("dropped"), Priority::Normal).unwrap();
        q.destroy();
        q.destroy();
        assert!(q.is_closed());
        assert!(q.iterate().is_err());
    }

    #[tokio::test]
    async fn pending_reader_wakes_on_destroy() {
        let q = std::sync::Arc::new(MessageQueue::new());
        let q2 = q.clone();
        let reader = tokio::spawn(async move {
            let mut it = q2.iterate().unwrap();
            it.next().await
        });
        tokio::task::yield_now().await;
        q.destroy();
        let got = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("reader must wake")
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn bounded_queue_rejects_overflow() {
        let q = MessageQueue::with_capacity(Some(2));
        q.enqueue(user("1"), Priority::Normal).unwrap();
        q.enqueue(user("2"), Priority::Normal).unwrap();
        let err = q.enqueue(user("3"), Priority::Normal).unwrap_err();
        assert_eq!(err, QueueError::Full(2));
        assert_eq!(err.code(), "QUEUE_FULL");
    }

    #[tokio::test]
    async fn cancelled_message_is_skipped() {
        let q = MessageQueue::new();
        let id1 = q.enqueue(user("first"), Priority::Normal).unwrap();
        q.enqueue(user("second"), Priority::Normal).unwrap();
        assert!(q.cancel(id1));

        let mut it = q.iterate().unwrap();
        let m = it.next().await.unwrap();
        match m.payload {
            Payload::UserInput { text } => assert_eq!(text, "second"),
            _ => panic!("wrong payload"),
        }
        assert_eq!(q.stats().cancelled, 1);
    }

    #[tokio::test]
    async fn expired_message_is_dropped_silently() {
        let q = MessageQueue::new();
        q.enqueue_with(
            user("stale"),
            Priority::Normal,
            None,
            Some(Duration::from_millis(1)),
        )
        .unwrap();
        q.enqueue(user("fresh"), Priority::Normal).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut it = q.iterate().unwrap();
        let m = it.next().await.unwrap();
        match m.payload {
            Payload::UserInput { text } => assert_eq!(text, "fresh"),
            _ => panic!("wrong payload"),
        }
        assert_eq!(q.stats().expired, 1);
    }

    #[tokio::test]
    async fn responses_fan_out_in_enqueue_order() {
        let q = MessageQueue::new();
        let mut rx = q.subscribe();
        let corr = Uuid::new_v4();
        for i in 0..3 {
            q.enqueue_correlated(
                Payload::PartialResult {
                    text: format!("d{i}"),
                },
                Priority::Normal,
                corr,
            )
            .unwrap();
        }
        q.enqueue_correlated(
            Payload::FinalResult {
                success: true,
                content: "done".into(),
                data: None,
            },
            Priority::Normal,
            corr,
        )
        .unwrap();

        for expected in ["d0", "d1", "d2"] {
            let m = rx.recv().await.unwrap();
            assert_eq!(m.correlation_id, Some(corr));
            match m.payload {
                Payload::PartialResult { text } => assert_eq!(text, expected),
                _ => panic!("wrong payload"),
            }
        }
        assert_eq!(rx.recv().await.unwrap().kind(), MessageKind::FinalResult);
    }

    #[tokio::test]
    async fn responses_do_not_reach_the_consumer() {
        let q = MessageQueue::new();
        q.enqueue(
            Payload::Progress {
                stage: "x".into(),
                detail: None,
            },
            Priority::Normal,
        )
        .unwrap();
        q.enqueue(user("real"), Priority::Normal).unwrap();

        let mut it = q.iterate().unwrap();
        assert_eq!(it.next().await.unwrap().kind(), MessageKind::UserInput);
    }

    #[tokio::test]
    async fn stats_track_enqueue_and_dequeue() {
        let q = MessageQueue::new();
        q.enqueue(user("a"), Priority::Normal).unwrap();
        q.enqueue(user("b"), Priority::Normal).unwrap();
        let mut it = q.iterate().unwrap();
        it.next().await.unwrap();
        let stats = q.stats();
        assert_eq!(stats.enqueued, 2);
        assert_eq!(stats.dequeued, 1);
    }

    #[tokio::test]
    async fn reader_suspends_until_message_arrives() {
        let q = std::sync::Arc::new(MessageQueue::new());
        let q2 = q.clone();
        let reader = tokio::spawn(async move {
            let mut it = q2.iterate().unwrap();
            it.next().await
        });
        tokio::task::yield_now().await;
        q.enqueue(user("wake"), Priority::Normal).unwrap();
        let got = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("reader must wake")
            .unwrap()
            .unwrap();
        assert_eq!(got.kind(), MessageKind::UserInput);
    }
}
