//! Subscription engine.
//!
//! Each subscription gets its own sampling task driven by a tokio interval
//! at the subscription's revised rate. Tasks share the read-only node store
//! and push changes into the owning session's [`NotificationQueue`]. No lock
//! is held across evaluations, so subscriptions sample independently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use uanode_core::{MemoryNodeStore, NodeId, NodeStore, StatusCode, StoreError};

use crate::queue::{NotificationQueue, PushOutcome};
use crate::subscription::{revise_interval, MonitoredItem, Subscription, SubscriptionState};
use crate::timer::{TimerError, TimerSet};

/// Errors from subscription management.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("subscription {0} not found")]
    SubscriptionNotFound(u32),

    #[error("none of the requested variables can be monitored")]
    NoItems(Vec<StatusCode>),

    #[error("engine is shut down")]
    Closed,
}

impl EngineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::SubscriptionNotFound(_) => StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
            EngineError::NoItems(_) => StatusCode::BAD_NOTHING_TO_DO,
            EngineError::Closed => StatusCode::BAD_SHUTDOWN,
        }
    }
}

/// Sampling policy shared by all subscriptions.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// No item is sampled faster than this.
    pub min_sampling_interval: Duration,
    /// Used when neither the item nor the subscription requests an interval.
    pub default_sampling_interval: Duration,
    /// Numeric changes within this bound are not reported.
    pub change_epsilon: Option<f64>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            min_sampling_interval: Duration::from_millis(100),
            default_sampling_interval: Duration::from_millis(1000),
            change_epsilon: None,
        }
    }
}

/// A variable to monitor, with an optional per-item interval.
#[derive(Debug, Clone)]
pub struct ItemRequest {
    pub node_id: NodeId,
    pub sampling_interval: Option<Duration>,
}

/// Parameters of a CreateSubscription call.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRequest {
    pub items: Vec<ItemRequest>,
    /// Applies to items that do not request their own interval.
    pub sampling_interval: Option<Duration>,
}

impl SubscriptionRequest {
    /// Monitor `node_ids` at one shared interval.
    pub fn uniform(node_ids: impl IntoIterator<Item = NodeId>, interval: Option<Duration>) -> Self {
        Self {
            items: node_ids
                .into_iter()
                .map(|node_id| ItemRequest {
                    node_id,
                    sampling_interval: None,
                })
                .collect(),
            sampling_interval: interval,
        }
    }
}

/// Result of a successful CreateSubscription.
#[derive(Debug, Clone)]
pub struct CreatedSubscription {
    pub subscription_id: u32,
    pub revised_sampling_interval: Duration,
    /// Per-item status in request order.
    pub item_results: Vec<StatusCode>,
}

struct SubscriptionTask {
    session_id: String,
    state: Arc<AtomicU8>,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
    queue: NotificationQueue,
}

impl SubscriptionTask {
    fn state(&self) -> SubscriptionState {
        SubscriptionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Mark closed and stop the timer; the caller awaits `handle`.
    fn signal_close(&self) {
        self.state
            .store(SubscriptionState::Closed as u8, Ordering::SeqCst);
        let _ = self.stop.send(true);
    }
}

/// Tracks subscriptions, runs their sampling tasks, and owns the named timers.
pub struct SubscriptionEngine {
    store: Arc<MemoryNodeStore>,
    timers: TimerSet,
    options: EngineOptions,
    next_id: AtomicU32,
    subscriptions: Mutex<HashMap<u32, SubscriptionTask>>,
    closed: AtomicBool,
}

impl SubscriptionEngine {
    pub fn new(store: Arc<MemoryNodeStore>, timers: TimerSet, options: EngineOptions) -> Self {
        Self {
            store,
            timers,
            options,
            next_id: AtomicU32::new(1),
            subscriptions: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, SubscriptionTask>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn timers(&self) -> &TimerSet {
        &self.timers
    }

    pub fn store(&self) -> &Arc<MemoryNodeStore> {
        &self.store
    }

    /// Run `tick` every `period` until cancelled or the engine shuts down.
    pub fn spawn_timer<F>(&self, name: &str, period: Duration, tick: F) -> Result<(), TimerError>
    where
        F: FnMut() + Send + 'static,
    {
        self.timers.spawn(name, period, tick)
    }

    pub async fn cancel_timer(&self, name: &str) -> bool {
        self.timers.cancel(name).await
    }

    /// Validate one item and compute its interval.
    fn prepare_item(
        &self,
        item: &ItemRequest,
        subscription_interval: Option<Duration>,
    ) -> Result<MonitoredItem, StatusCode> {
        let node = self.store.get(&item.node_id).map_err(|e| e.status_code())?;
        let var = node
            .as_variable()
            .ok_or_else(|| StoreError::NotReadable(item.node_id.clone()).status_code())?;
        if !var.access.readable {
            return Err(StatusCode::BAD_NOT_READABLE);
        }

        let interval = revise_interval(
            item.sampling_interval.or(subscription_interval),
            self.options.default_sampling_interval,
            self.options.min_sampling_interval,
            var.minimum_sampling_interval_ms.map(Duration::from_millis),
        );
        Ok(MonitoredItem::new(item.node_id.clone(), interval))
    }

    /// Create a subscription for `session_id` and start sampling it.
    ///
    /// Unknown or unreadable variables are reported per item and skipped; if
    /// none remain the call fails.
    pub fn create_subscription(
        &self,
        session_id: &str,
        request: SubscriptionRequest,
        queue: NotificationQueue,
    ) -> Result<CreatedSubscription, EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }

        let mut items = Vec::new();
        let mut item_results = Vec::with_capacity(request.items.len());
        for item in &request.items {
            match self.prepare_item(item, request.sampling_interval) {
                Ok(monitored) => {
                    items.push(monitored);
                    item_results.push(StatusCode::GOOD);
                }
                Err(status) => {
                    debug!(node = %item.node_id, "cannot monitor: {}", status);
                    item_results.push(status);
                }
            }
        }
        if items.is_empty() {
            return Err(EngineError::NoItems(item_results));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let subscription = Subscription::new(id, session_id, items, self.options.change_epsilon);
        let interval = subscription.interval();

        let state = Arc::new(AtomicU8::new(SubscriptionState::Created as u8));
        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_sampling(
            subscription,
            Arc::clone(&self.store),
            Arc::clone(&state),
            stop_rx,
            queue.clone(),
        ));

        self.lock().insert(
            id,
            SubscriptionTask {
                session_id: session_id.to_string(),
                state,
                stop,
                handle,
                queue,
            },
        );

        info!(
            subscription = id,
            session = %session_id,
            ?interval,
            "subscription created"
        );
        Ok(CreatedSubscription {
            subscription_id: id,
            revised_sampling_interval: interval,
            item_results,
        })
    }

    /// Close a subscription owned by `session_id`.
    ///
    /// Returns once the sampling task has stopped and any of its queued
    /// notifications have been discarded.
    pub async fn cancel_subscription(&self, session_id: &str, id: u32) -> Result<(), EngineError> {
        let task = {
            let mut subs = self.lock();
            match subs.get(&id) {
                Some(t) if t.session_id == session_id => subs.remove(&id),
                _ => None,
            }
        };
        let task = task.ok_or(EngineError::SubscriptionNotFound(id))?;
        close_task(id, task).await;
        Ok(())
    }

    /// Pause (`enabled == false`) or resume sampling.
    pub fn set_publishing_mode(
        &self,
        session_id: &str,
        id: u32,
        enabled: bool,
    ) -> Result<SubscriptionState, EngineError> {
        let subs = self.lock();
        let task = subs
            .get(&id)
            .filter(|t| t.session_id == session_id)
            .ok_or(EngineError::SubscriptionNotFound(id))?;

        let target = if enabled {
            SubscriptionState::Active
        } else {
            SubscriptionState::Suspended
        };
        let current = task.state();
        if current == target {
            return Ok(current);
        }
        if !current.can_transition_to(target) {
            return Err(EngineError::SubscriptionNotFound(id));
        }
        task.state.store(target as u8, Ordering::SeqCst);
        debug!(subscription = id, ?target, "publishing mode changed");
        Ok(target)
    }

    /// Close every subscription belonging to a session (client disconnect).
    pub async fn close_session(&self, session_id: &str) -> usize {
        let tasks: Vec<(u32, SubscriptionTask)> = {
            let mut subs = self.lock();
            let ids: Vec<u32> = subs
                .iter()
                .filter(|(_, t)| t.session_id == session_id)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| subs.remove(&id).map(|t| (id, t)))
                .collect()
        };
        let count = tasks.len();
        for (id, task) in tasks {
            close_task(id, task).await;
        }
        if count > 0 {
            debug!(session = %session_id, count, "closed session subscriptions");
        }
        count
    }

    pub fn subscription_state(&self, id: u32) -> Option<SubscriptionState> {
        self.lock().get(&id).map(|t| t.state())
    }

    pub fn subscription_count(&self) -> usize {
        self.lock().len()
    }

    /// Close all subscriptions and stop all timers.
    ///
    /// New subscriptions are refused from this point. Returns `false` if the
    /// tasks did not finish within `timeout` and had to be aborted.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.closed.store(true, Ordering::SeqCst);

        let tasks: Vec<(u32, SubscriptionTask)> = self.lock().drain().collect();
        for (_, task) in &tasks {
            task.signal_close();
        }

        let deadline = Instant::now() + timeout;
        let mut clean = true;
        for (id, mut task) in tasks {
            if tokio::time::timeout_at(deadline, &mut task.handle)
                .await
                .is_err()
            {
                warn!(subscription = id, "sampling task did not stop in time, aborting");
                task.handle.abort();
                clean = false;
            }
            task.queue.purge(id);
        }

        if tokio::time::timeout_at(deadline, self.timers.shutdown())
            .await
            .is_err()
        {
            warn!("timers did not stop in time");
            clean = false;
        }
        clean
    }
}

async fn close_task(id: u32, task: SubscriptionTask) {
    task.signal_close();
    let _ = task.handle.await;
    // The task has stopped, so nothing can be pushed after this purge.
    let dropped = task.queue.purge(id);
    debug!(subscription = id, dropped, "subscription closed");
}

/// Sampling loop for one subscription.
async fn run_sampling(
    mut subscription: Subscription,
    store: Arc<MemoryNodeStore>,
    state: Arc<AtomicU8>,
    mut stop_rx: watch::Receiver<bool>,
    queue: NotificationQueue,
) {
    let period = subscription.interval();
    let start = Instant::now();
    let mut interval = interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let at = tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            at = interval.tick() => at,
        };

        match SubscriptionState::from_u8(state.load(Ordering::SeqCst)) {
            SubscriptionState::Closed => break,
            SubscriptionState::Suspended => continue,
            SubscriptionState::Created | SubscriptionState::Active => {}
        }

        let notifications = subscription.sample(at.duration_since(start), store.as_ref());
        for n in notifications {
            // Re-check so a cancel racing this tick emits nothing further.
            if SubscriptionState::from_u8(state.load(Ordering::SeqCst)) == SubscriptionState::Closed {
                break;
            }
            match queue.push(n) {
                Ok(PushOutcome::Queued) => {}
                Ok(PushOutcome::Coalesced) => {
                    debug!(
                        subscription = subscription.id,
                        total = queue.coalesced(),
                        "session queue full, coalesced older values"
                    );
                }
                Err(_) => {
                    debug!(subscription = subscription.id, "queue closed, stopping");
                    state.store(SubscriptionState::Closed as u8, Ordering::SeqCst);
                    return;
                }
            }
        }

        let _ = state.compare_exchange(
            SubscriptionState::Created as u8,
            SubscriptionState::Active as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    debug!(subscription = subscription.id, "sampling stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use uanode_core::{DataType, SourceError, ValueSource, Variant, VariableSpec, APP_NAMESPACE};

    /// Store with a counter variable that changes on every read.
    fn counting_store() -> (Arc<MemoryNodeStore>, NodeId, NodeId) {
        let mut store = MemoryNodeStore::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let ticking = store
            .add_variable(
                &NodeId::objects_folder(),
                VariableSpec::new(
                    "Counter",
                    DataType::Int64,
                    ValueSource::computed(move || {
                        Ok(Variant::Int64(c.fetch_add(1, Ordering::SeqCst) as i64))
                    }),
                ),
            )
            .unwrap();
        let fixed = store
            .add_variable(
                &NodeId::objects_folder(),
                VariableSpec::new("Fixed", DataType::String, ValueSource::fixed("constant")),
            )
            .unwrap();
        (Arc::new(store), ticking, fixed)
    }

    fn engine(store: Arc<MemoryNodeStore>) -> SubscriptionEngine {
        SubscriptionEngine::new(
            store,
            TimerSet::new(),
            EngineOptions {
                min_sampling_interval: Duration::from_millis(50),
                ..Default::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_becomes_active_and_notifies() {
        let (store, ticking, _) = counting_store();
        let engine = engine(store);
        let queue = NotificationQueue::new(64);

        let created = engine
            .create_subscription(
                "s1",
                SubscriptionRequest::uniform([ticking.clone()], Some(Duration::from_millis(100))),
                queue.clone(),
            )
            .unwrap();
        assert_eq!(created.revised_sampling_interval, Duration::from_millis(100));

        let first = queue.recv().await.unwrap();
        assert_eq!(first.subscription_id, created.subscription_id);
        assert_eq!(first.node_id, ticking);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            engine.subscription_state(created.subscription_id),
            Some(SubscriptionState::Active)
        );
        engine.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_value_notifies_once() {
        let (store, _, fixed) = counting_store();
        let engine = engine(store);
        let queue = NotificationQueue::new(64);
        engine
            .create_subscription(
                "s1",
                SubscriptionRequest::uniform([fixed], Some(Duration::from_millis(100))),
                queue.clone(),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1050)).await;
        assert_eq!(queue.len(), 1);
        engine.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_floor_applied() {
        let (store, ticking, _) = counting_store();
        let engine = engine(store);
        let created = engine
            .create_subscription(
                "s1",
                SubscriptionRequest::uniform([ticking], Some(Duration::from_millis(1))),
                NotificationQueue::new(8),
            )
            .unwrap();
        assert_eq!(created.revised_sampling_interval, Duration::from_millis(50));
        engine.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_floor_and_zero_request_still_sample() {
        let (store, ticking, _) = counting_store();
        let engine = SubscriptionEngine::new(
            store,
            TimerSet::new(),
            EngineOptions {
                min_sampling_interval: Duration::ZERO,
                default_sampling_interval: Duration::ZERO,
                change_epsilon: None,
            },
        );
        let queue = NotificationQueue::new(64);
        let created = engine
            .create_subscription(
                "s1",
                SubscriptionRequest::uniform([ticking], Some(Duration::ZERO)),
                queue.clone(),
            )
            .unwrap();
        assert_eq!(created.revised_sampling_interval, Duration::from_millis(1));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            engine.subscription_state(created.subscription_id),
            Some(SubscriptionState::Active)
        );
        assert!(queue.len() > 1);
        assert!(engine.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_items_reported() {
        let (store, ticking, _) = counting_store();
        let engine = engine(store);
        let missing = NodeId::string(APP_NAMESPACE, "missing");

        let created = engine
            .create_subscription(
                "s1",
                SubscriptionRequest::uniform(
                    [missing.clone(), ticking, NodeId::objects_folder()],
                    None,
                ),
                NotificationQueue::new(8),
            )
            .unwrap();
        assert_eq!(
            created.item_results,
            vec![
                StatusCode::BAD_NODE_ID_UNKNOWN,
                StatusCode::GOOD,
                StatusCode::BAD_NOT_READABLE
            ]
        );

        let err = engine
            .create_subscription(
                "s1",
                SubscriptionRequest::uniform([missing], None),
                NotificationQueue::new(8),
            )
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_NOTHING_TO_DO);
        engine.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_then_tick_emits_nothing() {
        let (store, ticking, _) = counting_store();
        let engine = engine(store);
        let queue = NotificationQueue::new(64);
        let created = engine
            .create_subscription(
                "s1",
                SubscriptionRequest::uniform([ticking], Some(Duration::from_millis(100))),
                queue.clone(),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        engine
            .cancel_subscription("s1", created.subscription_id)
            .await
            .unwrap();
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(queue.is_empty());
        assert_eq!(engine.subscription_state(created.subscription_id), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_requires_owning_session() {
        let (store, ticking, _) = counting_store();
        let engine = engine(store);
        let created = engine
            .create_subscription(
                "owner",
                SubscriptionRequest::uniform([ticking], None),
                NotificationQueue::new(8),
            )
            .unwrap();

        assert_eq!(
            engine
                .cancel_subscription("intruder", created.subscription_id)
                .await,
            Err(EngineError::SubscriptionNotFound(created.subscription_id))
        );
        assert_eq!(engine.subscription_count(), 1);
        engine.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_and_resume() {
        let (store, ticking, _) = counting_store();
        let engine = engine(store);
        let queue = NotificationQueue::new(64);
        let id = engine
            .create_subscription(
                "s1",
                SubscriptionRequest::uniform([ticking], Some(Duration::from_millis(100))),
                queue.clone(),
            )
            .unwrap()
            .subscription_id;

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(
            engine.set_publishing_mode("s1", id, false).unwrap(),
            SubscriptionState::Suspended
        );
        while queue.try_recv().is_some() {}

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(queue.is_empty());

        engine.set_publishing_mode("s1", id, true).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!queue.is_empty());
        engine.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_source_keeps_subscription_active() {
        let mut store = MemoryNodeStore::new();
        let failing = store
            .add_variable(
                &NodeId::objects_folder(),
                VariableSpec::new(
                    "Broken",
                    DataType::Double,
                    ValueSource::computed(|| Err(SourceError::Unavailable("no stats".into()))),
                ),
            )
            .unwrap();
        let engine = engine(Arc::new(store));
        let queue = NotificationQueue::new(8);
        let id = engine
            .create_subscription(
                "s1",
                SubscriptionRequest::uniform([failing], Some(Duration::from_millis(100))),
                queue.clone(),
            )
            .unwrap()
            .subscription_id;

        let n = queue.recv().await.unwrap();
        assert_eq!(n.value.status, StatusCode::BAD_SOURCE);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(
            engine.subscription_state(id),
            Some(SubscriptionState::Active)
        );
        // repeated failures are not re-reported
        assert!(queue.is_empty());
        engine.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_streams_stay_ordered() {
        let (store, ticking, _) = counting_store();
        let engine = engine(store);
        let queue = NotificationQueue::new(1024);

        let intervals = [50u64, 70, 110, 130];
        let mut ids = Vec::new();
        for ms in intervals {
            let created = engine
                .create_subscription(
                    "s1",
                    SubscriptionRequest::uniform([ticking.clone()], Some(Duration::from_millis(ms))),
                    queue.clone(),
                )
                .unwrap();
            ids.push(created.subscription_id);
        }

        tokio::time::sleep(Duration::from_millis(1000)).await;

        let mut last_seq: HashMap<u32, u32> = HashMap::new();
        let mut counts: HashMap<u32, usize> = HashMap::new();
        while let Some(n) = queue.try_recv() {
            let prev = last_seq.insert(n.subscription_id, n.sequence_number);
            if let Some(prev) = prev {
                assert!(n.sequence_number > prev, "stream {} out of order", n.subscription_id);
            }
            *counts.entry(n.subscription_id).or_default() += 1;
        }
        for id in ids {
            assert!(counts.get(&id).copied().unwrap_or(0) > 0);
        }
        engine.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_everything() {
        let (store, ticking, _) = counting_store();
        let engine = engine(store);
        let queue = NotificationQueue::new(64);
        engine
            .create_subscription(
                "s1",
                SubscriptionRequest::uniform([ticking.clone()], Some(Duration::from_millis(100))),
                queue.clone(),
            )
            .unwrap();
        engine
            .spawn_timer("noop", Duration::from_millis(100), || {})
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(engine.shutdown(Duration::from_secs(1)).await);
        while queue.try_recv().is_some() {}

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(queue.is_empty());
        assert!(engine.timers().is_empty());
        assert_eq!(
            engine
                .create_subscription("s1", SubscriptionRequest::uniform([ticking], None), queue)
                .unwrap_err(),
            EngineError::Closed
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_aborts_stuck_sampling_task() {
        let entered = Arc::new(AtomicBool::new(false));
        let hold = Arc::new(AtomicBool::new(false));
        let mut store = MemoryNodeStore::new();
        let (e, h) = (Arc::clone(&entered), Arc::clone(&hold));
        let stuck = store
            .add_variable(
                &NodeId::objects_folder(),
                VariableSpec::new(
                    "Stuck",
                    DataType::Double,
                    ValueSource::computed(move || {
                        if h.load(Ordering::SeqCst) {
                            e.store(true, Ordering::SeqCst);
                            while h.load(Ordering::SeqCst) {
                                std::thread::sleep(Duration::from_millis(5));
                            }
                        }
                        Ok(Variant::Double(1.0))
                    }),
                ),
            )
            .unwrap();
        let engine = engine(Arc::new(store));
        let queue = NotificationQueue::new(8);

        hold.store(true, Ordering::SeqCst);
        let id = engine
            .create_subscription(
                "s1",
                SubscriptionRequest::uniform([stuck], Some(Duration::from_millis(50))),
                queue.clone(),
            )
            .unwrap()
            .subscription_id;
        while !entered.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(!engine.shutdown(Duration::from_millis(50)).await);
        assert_eq!(engine.subscription_count(), 0);
        assert_eq!(engine.subscription_state(id), None);

        // the read completes after shutdown; its value must not be delivered
        hold.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_session_only_affects_that_session() {
        let (store, ticking, _) = counting_store();
        let engine = engine(store);
        for session in ["a", "a", "b"] {
            engine
                .create_subscription(
                    session,
                    SubscriptionRequest::uniform([ticking.clone()], None),
                    NotificationQueue::new(8),
                )
                .unwrap();
        }
        assert_eq!(engine.close_session("a").await, 2);
        assert_eq!(engine.subscription_count(), 1);
        engine.shutdown(Duration::from_secs(1)).await;
    }
}
