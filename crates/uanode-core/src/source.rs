//! Value sources.
//!
//! Every variable owns a [`ValueSource`] that produces its current value:
//! - `Static`: a stored value replaced by the owner (or a client write)
//! - `Computed`: a closure evaluated on every read
//!
//! Reads never fail loudly. Any evaluation problem is reported as a
//! [`DataValue`] carrying [`StatusCode::BAD_SOURCE`].

use crate::model::{DataValue, StatusCode, Variant};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Failure of a value source evaluation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    /// A host statistic could not be obtained.
    #[error("host metric unavailable: {0}")]
    Unavailable(String),

    /// The evaluation itself failed.
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// Internal state was poisoned by a panicking writer.
    #[error("source state poisoned")]
    Poisoned,
}

type EvalFn = dyn Fn() -> Result<Variant, SourceError> + Send + Sync;

/// A stored value with the time it was last set.
#[derive(Debug)]
pub struct StaticValue {
    inner: RwLock<(Variant, DateTime<Utc>)>,
}

impl StaticValue {
    pub fn new(value: Variant) -> Self {
        Self {
            inner: RwLock::new((value, Utc::now())),
        }
    }

    pub fn read(&self) -> DataValue {
        match self.inner.read() {
            Ok(guard) => DataValue::good(guard.0.clone(), guard.1),
            Err(_) => DataValue::bad(StatusCode::BAD_SOURCE, Utc::now()),
        }
    }

    pub fn set(&self, value: Variant) -> Result<(), SourceError> {
        let mut guard = self.inner.write().map_err(|_| SourceError::Poisoned)?;
        *guard = (value, Utc::now());
        Ok(())
    }

    /// Peek at the stored value without a timestamp.
    pub fn value(&self) -> Option<Variant> {
        self.inner.read().ok().map(|g| g.0.clone())
    }
}

/// A value evaluated on every read.
///
/// The closure must be pure with respect to the address space: it may read
/// ambient state (clock, host statistics, [`StateReader`]s) but must not
/// mutate anything shared, because it runs concurrently from any number of
/// sampling loops.
#[derive(Clone)]
pub struct ComputedValue {
    eval: Arc<EvalFn>,
}

impl ComputedValue {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> Result<Variant, SourceError> + Send + Sync + 'static,
    {
        Self { eval: Arc::new(f) }
    }

    pub fn read(&self) -> DataValue {
        let now = Utc::now();
        match (self.eval)() {
            Ok(value) => DataValue::good(value, now),
            Err(e) => {
                tracing::warn!("computed source failed: {}", e);
                DataValue::bad(StatusCode::BAD_SOURCE, now)
            }
        }
    }
}

impl fmt::Debug for ComputedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedValue").finish_non_exhaustive()
    }
}

/// The mechanism producing a variable's current value.
#[derive(Debug)]
pub enum ValueSource {
    Static(StaticValue),
    Computed(ComputedValue),
}

impl ValueSource {
    pub fn fixed(value: impl Into<Variant>) -> Self {
        ValueSource::Static(StaticValue::new(value.into()))
    }

    pub fn computed<F>(f: F) -> Self
    where
        F: Fn() -> Result<Variant, SourceError> + Send + Sync + 'static,
    {
        ValueSource::Computed(ComputedValue::new(f))
    }

    pub fn read(&self) -> DataValue {
        match self {
            ValueSource::Static(s) => s.read(),
            ValueSource::Computed(c) => c.read(),
        }
    }
}

// ============================================================================
// Single-writer state cells
// ============================================================================

/// Create a state cell with one writer and any number of readers.
///
/// The writer is meant to be moved into the one timer task that advances the
/// state; computed sources capture readers.
pub fn state_cell<T: Clone + Send + Sync>(init: T) -> (StateWriter<T>, StateReader<T>) {
    let shared = Arc::new(RwLock::new(init));
    (
        StateWriter {
            shared: Arc::clone(&shared),
        },
        StateReader { shared },
    )
}

/// The only handle that can change a state cell. Not `Clone`.
#[derive(Debug)]
pub struct StateWriter<T> {
    shared: Arc<RwLock<T>>,
}

impl<T> StateWriter<T> {
    /// Apply `f` to the state in place.
    pub fn update(&mut self, f: impl FnOnce(&mut T)) -> Result<(), SourceError> {
        let mut guard = self.shared.write().map_err(|_| SourceError::Poisoned)?;
        f(&mut *guard);
        Ok(())
    }
}

/// Read-only handle to a state cell.
#[derive(Debug)]
pub struct StateReader<T> {
    shared: Arc<RwLock<T>>,
}

impl<T> Clone for StateReader<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone> StateReader<T> {
    pub fn get(&self) -> Result<T, SourceError> {
        self.shared
            .read()
            .map(|g| g.clone())
            .map_err(|_| SourceError::Poisoned)
    }
}
