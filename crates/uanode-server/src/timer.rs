//! Named periodic timers.
//!
//! Timers advance application state (toggles, counters) on their own
//! schedule. Each one is a separate task that can be cancelled by name, and
//! the whole set is stopped when the server shuts down.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimerError {
    #[error("timer '{0}' already exists")]
    Duplicate(String),

    #[error("timer '{0}' has a zero interval")]
    ZeroInterval(String),
}

struct TimerTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// A set of named, independently cancellable timers.
#[derive(Default)]
pub struct TimerSet {
    timers: Mutex<HashMap<String, TimerTask>>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TimerTask>> {
        self.timers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `tick` every `period`, first after one full period.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(&self, name: &str, period: Duration, mut tick: F) -> Result<(), TimerError>
    where
        F: FnMut() + Send + 'static,
    {
        if period.is_zero() {
            return Err(TimerError::ZeroInterval(name.to_string()));
        }
        let mut timers = self.lock();
        if timers.contains_key(name) {
            return Err(TimerError::Duplicate(name.to_string()));
        }

        let (stop, mut stop_rx) = watch::channel(false);
        let timer_name = name.to_string();
        let handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = interval.tick() => tick(),
                }
            }
            debug!(timer = %timer_name, "timer stopped");
        });

        debug!(timer = %name, ?period, "timer started");
        timers.insert(name.to_string(), TimerTask { stop, handle });
        Ok(())
    }

    /// Stop one timer and wait for its task to finish.
    ///
    /// Returns `false` if no timer has that name.
    pub async fn cancel(&self, name: &str) -> bool {
        let task = self.lock().remove(name);
        match task {
            Some(task) => {
                let _ = task.stop.send(true);
                let _ = task.handle.await;
                true
            }
            None => false,
        }
    }

    /// Stop every timer.
    pub async fn shutdown(&self) {
        let tasks: Vec<TimerTask> = self.lock().drain().map(|(_, t)| t).collect();
        for task in &tasks {
            let _ = task.stop.send(true);
        }
        for task in tasks {
            let _ = task.handle.await;
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
