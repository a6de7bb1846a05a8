//! Process-wide map from breaker name to breaker.
//!
//! The registry is an ordinary value: construct one at startup, share it
//! (usually behind an `Arc`) with every call site, and call
//! [`CircuitRegistry::reset`] between tests. Breakers are created lazily on
//! first reference to a name; the configuration passed at that moment is the
//! one the breaker keeps for its lifetime.
//!
//! Steady-state lookups take only the read side of the map lock. The write
//! side is held briefly on the lazy-creation path. Each breaker then
//! serialises its own state behind its own lock.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bulwark_common::error::ErrorClassification;
use bulwark_common::time::{Clock, SystemClock};
use parking_lot::RwLock;
use tracing::debug;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitOpenError, CircuitStats};
use crate::observability::{default_sink, SharedSink};

/// Named circuit breakers sharing one clock and one event sink.
pub struct CircuitRegistry<C: Clock + Clone = SystemClock> {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker<C>>>>,
    clock: C,
    sink: SharedSink,
}

impl<C: Clock + Clone> fmt::Debug for CircuitRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitRegistry").field("names", &self.names()).finish_non_exhaustive()
    }
}

impl CircuitRegistry<SystemClock> {
    /// Empty registry on the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for CircuitRegistry<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock + Clone> CircuitRegistry<C> {
    /// Empty registry whose breakers read time from `clock`.
    pub fn with_clock(clock: C) -> Self {
        Self { breakers: RwLock::new(HashMap::new()), clock, sink: default_sink() }
    }

    /// Event sink handed to every breaker created from now on.
    #[must_use]
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Breaker for `config.name()`, created from `config` if absent.
    ///
    /// An existing breaker is returned as-is even if `config` differs from
    /// the one it was created with.
    pub fn get_or_create(&self, config: &CircuitBreakerConfig) -> Arc<CircuitBreaker<C>> {
        if let Some(existing) = self.breakers.read().get(config.name()) {
            return Arc::clone(existing);
        }

        let mut breakers = self.breakers.write();
        let breaker = breakers.entry(config.name().to_owned()).or_insert_with(|| {
            debug!(breaker = %config.name(), "creating circuit breaker");
            Arc::new(
                CircuitBreaker::with_clock(config.clone(), self.clock.clone())
                    .with_sink(Arc::clone(&self.sink)),
            )
        });
        Arc::clone(breaker)
    }

    /// Breaker registered under `name`, if any.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker<C>>> {
        self.breakers.read().get(name).cloned()
    }

    /// Snapshot of one breaker, `None` for unknown names.
    pub fn stats(&self, name: &str) -> Option<CircuitStats> {
        self.get(name).map(|breaker| breaker.stats())
    }

    /// Snapshot of every breaker, ordered by name.
    pub fn all_stats(&self) -> BTreeMap<String, CircuitStats> {
        let breakers: Vec<Arc<CircuitBreaker<C>>> = self.breakers.read().values().cloned().collect();
        breakers.into_iter().map(|breaker| (breaker.name().to_owned(), breaker.stats())).collect()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered breakers.
    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    /// Whether no breaker has been created yet.
    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }

    /// Drop every breaker. Handles already held by callers keep working but
    /// are no longer reachable through the registry.
    pub fn reset(&self) {
        let removed = {
            let mut breakers = self.breakers.write();
            let count = breakers.len();
            breakers.clear();
            count
        };
        debug!(removed, "circuit registry reset");
    }

    /// Run async `work` under the breaker named by `config`.
    pub async fn call<F, Fut, T, E>(&self, config: &CircuitBreakerConfig, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ErrorClassification + From<CircuitOpenError>,
    {
        self.get_or_create(config).call(work).await
    }

    /// Run blocking `work` under the breaker named by `config`.
    pub fn call_blocking<F, T, E>(&self, config: &CircuitBreakerConfig, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: ErrorClassification + From<CircuitOpenError>,
    {
        self.get_or_create(config).call_blocking(work)
    }

    /// Run async `work` under the breaker named by `config`, substituting
    /// `fallback` for rejections and counted failures.
    pub async fn call_with_fallback<F, Fut, T, E, FB>(
        &self,
        config: &CircuitBreakerConfig,
        work: F,
        fallback: FB,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ErrorClassification + From<CircuitOpenError>,
        FB: FnOnce(E) -> T,
    {
        self.get_or_create(config).call_with_fallback(work, fallback).await
    }

    /// Blocking counterpart of [`call_with_fallback`](Self::call_with_fallback).
    pub fn call_blocking_with_fallback<F, T, E, FB>(
        &self,
        config: &CircuitBreakerConfig,
        work: F,
        fallback: FB,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: ErrorClassification + From<CircuitOpenError>,
        FB: FnOnce(E) -> T,
    {
        self.get_or_create(config).call_blocking_with_fallback(work, fallback)
    }
}
