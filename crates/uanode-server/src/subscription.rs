//! Subscription state and change detection.
//!
//! This module holds the runtime-agnostic part of a subscription: its
//! monitored items, the last-value cache, and the sampling step that turns
//! fresh reads into change notifications. The timer that drives sampling
//! lives in [`crate::engine`].

use std::time::Duration;

use uanode_core::{DataValue, NodeId, NodeStore};

/// Lifecycle of a subscription.
///
/// `Created -> Active -> (Suspended) -> Closed`. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SubscriptionState {
    Created = 0,
    Active = 1,
    Suspended = 2,
    Closed = 3,
}

impl SubscriptionState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => SubscriptionState::Created,
            1 => SubscriptionState::Active,
            2 => SubscriptionState::Suspended,
            _ => SubscriptionState::Closed,
        }
    }

    /// Whether moving from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: SubscriptionState) -> bool {
        use SubscriptionState::*;
        matches!(
            (self, next),
            (Created, Active)
                | (Created, Suspended)
                | (Active, Suspended)
                | (Suspended, Active)
                | (Created, Closed)
                | (Active, Closed)
                | (Suspended, Closed)
        )
    }
}

/// A change notification produced by a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub subscription_id: u32,
    pub sequence_number: u32,
    pub node_id: NodeId,
    pub value: DataValue,
}

/// Shortest interval a sampling timer can run at, whatever the configuration.
pub const MIN_TIMER_PERIOD: Duration = Duration::from_millis(1);

/// Pick the sampling interval actually used for one item.
///
/// The requested interval (or `default`) is raised to the server floor and to
/// the variable's own minimum sampling interval. The result is never below
/// [`MIN_TIMER_PERIOD`].
pub fn revise_interval(
    requested: Option<Duration>,
    default: Duration,
    floor: Duration,
    variable_minimum: Option<Duration>,
) -> Duration {
    let mut interval = requested
        .unwrap_or(default)
        .max(floor)
        .max(MIN_TIMER_PERIOD);
    if let Some(min) = variable_minimum {
        interval = interval.max(min);
    }
    interval
}

/// One variable monitored by a subscription.
#[derive(Debug, Clone)]
pub struct MonitoredItem {
    pub node_id: NodeId,
    pub interval: Duration,
    /// Offset from subscription start at which the item is next sampled.
    next_due: Duration,
    last: Option<DataValue>,
}

impl MonitoredItem {
    pub fn new(node_id: NodeId, interval: Duration) -> Self {
        Self {
            node_id,
            interval,
            next_due: Duration::ZERO,
            last: None,
        }
    }
}

/// A client's standing request to be notified of value changes.
///
/// The subscription and its cache are owned by exactly one sampling task;
/// nothing here is shared.
#[derive(Debug)]
pub struct Subscription {
    pub id: u32,
    pub session_id: String,
    items: Vec<MonitoredItem>,
    epsilon: Option<f64>,
    next_sequence: u32,
}

impl Subscription {
    pub fn new(
        id: u32,
        session_id: impl Into<String>,
        items: Vec<MonitoredItem>,
        epsilon: Option<f64>,
    ) -> Self {
        Self {
            id,
            session_id: session_id.into(),
            items,
            epsilon,
            next_sequence: 1,
        }
    }

    /// Timer period: the fastest item interval.
    pub fn interval(&self) -> Duration {
        self.items
            .iter()
            .map(|i| i.interval)
            .min()
            .unwrap_or(Duration::from_secs(1))
            .max(MIN_TIMER_PERIOD)
    }

    pub fn items(&self) -> &[MonitoredItem] {
        &self.items
    }

    /// Sample every item that is due at `elapsed` and return the changes.
    ///
    /// The first sample of an item always reports its value. After that a
    /// notification is produced only when the status or the value changed.
    pub fn sample<S: NodeStore + ?Sized>(&mut self, elapsed: Duration, store: &S) -> Vec<Notification> {
        let mut out = Vec::new();

        for item in &mut self.items {
            if elapsed < item.next_due {
                continue;
            }
            item.next_due += item.interval;
            if item.next_due <= elapsed {
                // fell behind; resume from now rather than bursting
                item.next_due = elapsed + item.interval;
            }

            let value = match store.read(&item.node_id) {
                Ok(dv) => dv,
                Err(e) => DataValue::bad(e.status_code(), chrono::Utc::now()),
            };

            let changed = match &item.last {
                None => true,
                Some(prev) => prev.differs_from(&value, self.epsilon),
            };
            if !changed {
                continue;
            }

            if value.status.is_bad() {
                tracing::debug!(
                    subscription = self.id,
                    node = %item.node_id,
                    "sampled bad status {}",
                    value.status
                );
            }

            out.push(Notification {
                subscription_id: self.id,
                sequence_number: self.next_sequence,
                node_id: item.node_id.clone(),
                value: value.clone(),
            });
            self.next_sequence = self.next_sequence.wrapping_add(1).max(1);
            item.last = Some(value);
        }

        out
    }
}
