//! Per-session outbound notification queue.
//!
//! Sampling tasks push notifications, the session task pops and sends them.
//! The queue is bounded: when it is full, older queued notifications for the
//! same (subscription, variable) are replaced by the newest one instead of
//! growing the buffer. Order per variable is preserved.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::Notify;
use uanode_core::NodeId;

use crate::subscription::Notification;

/// The queue was closed by its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("notification queue closed")]
pub struct QueueClosed;

/// What happened to a pushed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Replaced an older queued value of the same variable.
    Coalesced,
}

#[derive(Clone)]
pub struct NotificationQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    state: Mutex<QueueState>,
    not_empty: Notify,
    capacity: usize,
}

#[derive(Default)]
struct QueueState {
    buf: VecDeque<Notification>,
    closed: bool,
    coalesced: u64,
}

fn same_key(a: &Notification, b: &Notification) -> bool {
    a.subscription_id == b.subscription_id && a.node_id == b.node_id
}

impl QueueState {
    /// Keep only the newest entry per (subscription, variable).
    fn compact(&mut self) -> usize {
        let before = self.buf.len();
        let mut seen: HashSet<(u32, NodeId)> = HashSet::with_capacity(before);
        let mut kept: VecDeque<Notification> = VecDeque::with_capacity(before);
        while let Some(n) = self.buf.pop_back() {
            if seen.insert((n.subscription_id, n.node_id.clone())) {
                kept.push_front(n);
            }
        }
        self.buf = kept;
        before - self.buf.len()
    }
}

impl NotificationQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                not_empty: Notify::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue a notification, coalescing when the queue is full.
    ///
    /// The buffer can exceed `capacity` only by the number of distinct
    /// monitored variables, since after compaction each holds one entry.
    pub fn push(&self, notification: Notification) -> Result<PushOutcome, QueueClosed> {
        let mut state = self.lock();
        if state.closed {
            return Err(QueueClosed);
        }

        let mut outcome = PushOutcome::Queued;
        if state.buf.len() >= self.inner.capacity {
            let removed = state.compact() as u64;
            state.coalesced += removed;
            if removed > 0 {
                outcome = PushOutcome::Coalesced;
            }
            if let Some(pos) = state.buf.iter().position(|n| same_key(n, &notification)) {
                state.buf.remove(pos);
                state.coalesced += 1;
                outcome = PushOutcome::Coalesced;
            }
        }
        state.buf.push_back(notification);
        drop(state);

        self.inner.not_empty.notify_one();
        Ok(outcome)
    }

    /// Wait for the next notification. Returns `None` once closed.
    pub async fn recv(&self) -> Option<Notification> {
        loop {
            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                if let Some(n) = state.buf.pop_front() {
                    return Some(n);
                }
            }
            self.inner.not_empty.notified().await;
        }
    }

    /// Pop without waiting.
    pub fn try_recv(&self) -> Option<Notification> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        state.buf.pop_front()
    }

    /// Drop every queued notification of one subscription.
    pub fn purge(&self, subscription_id: u32) -> usize {
        let mut state = self.lock();
        let before = state.buf.len();
        state.buf.retain(|n| n.subscription_id != subscription_id);
        before - state.buf.len()
    }

    /// Close the queue, discarding anything queued and waking the receiver.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            state.buf.clear();
        }
        self.inner.not_empty.notify_waiters();
        self.inner.not_empty.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total notifications replaced by coalescing since creation.
    pub fn coalesced(&self) -> u64 {
        self.lock().coalesced
    }
}
