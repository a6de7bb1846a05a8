//! Stacking wrappers in a fixed order.
//!
//! ```text
//! caller
//!   └─ retry            (outermost: repeats the whole stack below)
//!        └─ circuit breaker   (fast-fails or records each attempt)
//!             └─ timeout      (innermost: bounds one attempt)
//!                  └─ work
//! ```
//!
//! The order is fixed by [`ResiliencePipeline`] whatever order the builder
//! methods are called in. Consequences worth knowing:
//!
//! - each attempt gets its own deadline, and a deadline overrun counts as a
//!   breaker failure (kind `deadline_exceeded`) unless that kind is ignored;
//! - a rejection by an open breaker is an ordinary failure to the retry
//!   loop (kind `circuit_open`); list it as non-retryable to stop at once;
//! - kinds the breaker ignores are never retried;
//! - with a fallback configured, counted failures and rejections are
//!   replaced by the fallback value *inside* the retry loop, so the retry
//!   sees a success.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bulwark_common::error::{ConfigError, ConfigResult, ErrorClassification};
use bulwark_common::time::{Clock, SystemClock};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitOpenError};
use crate::observability::{default_sink, SharedSink};
use crate::registry::CircuitRegistry;
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::timeout::{self, DeadlineExceeded};

/// Substitute result produced from a failure.
pub type Fallback<T, E> = Arc<dyn Fn(E) -> T + Send + Sync>;

/// One layer of a pipeline, outermost first in [`ResiliencePipeline::layers`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    /// Retry executor
    Retry,
    /// Circuit breaker (with or without fallback)
    CircuitBreaker,
    /// Per-attempt deadline
    Timeout,
}

/// A composed resilience stack for work returning `Result<T, E>`.
pub struct ResiliencePipeline<T, E, C: Clock = SystemClock> {
    timeout: Option<Duration>,
    breaker: Option<Arc<CircuitBreaker<C>>>,
    fallback: Option<Fallback<T, E>>,
    retry: Option<RetryExecutor<E>>,
}

impl<T, E, C: Clock> fmt::Debug for ResiliencePipeline<T, E, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResiliencePipeline")
            .field("layers", &self.layers())
            .field("timeout", &self.timeout)
            .field("breaker", &self.breaker.as_ref().map(|breaker| breaker.name().to_owned()))
            .field("fallback", &self.fallback.is_some())
            .field("retry", &self.retry)
            .finish()
    }
}

impl<T, E> ResiliencePipeline<T, E, SystemClock> {
    /// Start composing a pipeline.
    pub fn builder() -> ResiliencePipelineBuilder<T, E, SystemClock> {
        ResiliencePipelineBuilder {
            name: None,
            timeout: None,
            breaker: None,
            fallback: None,
            retry: None,
            sink: default_sink(),
        }
    }
}

impl<T, E, C: Clock> ResiliencePipeline<T, E, C> {
    /// Configured layers, outermost first.
    pub fn layers(&self) -> Vec<Layer> {
        let mut layers = Vec::with_capacity(3);
        if self.retry.is_some() {
            layers.push(Layer::Retry);
        }
        if self.breaker.is_some() {
            layers.push(Layer::CircuitBreaker);
        }
        if self.timeout.is_some() {
            layers.push(Layer::Timeout);
        }
        layers
    }

    /// Per-attempt deadline.
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Breaker guarding each attempt.
    pub const fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker<C>>> {
        self.breaker.as_ref()
    }

    /// Effective retry policy, including kinds the breaker ignores.
    pub fn retry_policy(&self) -> Option<&RetryPolicy<E>> {
        self.retry.as_ref().map(RetryExecutor::policy)
    }
}

impl<T, E, C> ResiliencePipeline<T, E, C>
where
    C: Clock,
    E: ErrorClassification + From<CircuitOpenError> + From<DeadlineExceeded>,
{
    /// Run async `work` through the stack.
    ///
    /// `work` is called once per admitted attempt and must produce a fresh
    /// future each time. It is not called for attempts the breaker rejects.
    #[cfg(feature = "runtime")]
    pub async fn run<F, Fut>(&self, work: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        match &self.retry {
            Some(retry) => retry.run(|| self.attempt(&work)).await,
            None => self.attempt(&work).await,
        }
    }

    #[cfg(feature = "runtime")]
    async fn attempt<F, Fut>(&self, work: &F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        match (&self.breaker, &self.fallback) {
            (Some(breaker), Some(fallback)) => {
                breaker.call_with_fallback(|| self.guarded(work()), |error| fallback(error)).await
            }
            (Some(breaker), None) => breaker.call(|| self.guarded(work())).await,
            (None, _) => self.guarded(work()).await,
        }
    }

    #[cfg(feature = "runtime")]
    async fn guarded<Fut>(&self, work: Fut) -> Result<T, E>
    where
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        match self.timeout {
            Some(deadline) => timeout::with_timeout(work, deadline).await,
            None => work.await,
        }
    }

    /// Run blocking `work` through the stack.
    ///
    /// With a timeout configured each attempt runs on a worker thread, hence
    /// the `Send + Sync + 'static` bounds.
    pub fn run_blocking<F>(&self, work: F) -> Result<T, E>
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let work = Arc::new(work);
        let attempt = || self.attempt_blocking(&work);

        match &self.retry {
            Some(retry) => retry.run_blocking(attempt),
            None => attempt(),
        }
    }

    fn attempt_blocking<F>(&self, work: &Arc<F>) -> Result<T, E>
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let guarded = || match self.timeout {
            Some(deadline) => {
                let work = Arc::clone(work);
                timeout::with_timeout_blocking(move || work(), deadline)
            }
            None => work(),
        };

        match (&self.breaker, &self.fallback) {
            (Some(breaker), Some(fallback)) => {
                breaker.call_blocking_with_fallback(guarded, |error| fallback(error))
            }
            (Some(breaker), None) => breaker.call_blocking(guarded),
            (None, _) => guarded(),
        }
    }
}

/// Builder for [`ResiliencePipeline`].
pub struct ResiliencePipelineBuilder<T, E, C: Clock = SystemClock> {
    name: Option<String>,
    timeout: Option<Duration>,
    breaker: Option<Arc<CircuitBreaker<C>>>,
    fallback: Option<Fallback<T, E>>,
    retry: Option<RetryPolicy<E>>,
    sink: SharedSink,
}

impl<T, E, C: Clock> fmt::Debug for ResiliencePipelineBuilder<T, E, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResiliencePipelineBuilder")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("fallback", &self.fallback.is_some())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl<T, E, C: Clock> ResiliencePipelineBuilder<T, E, C> {
    /// Name used for retry events; defaults to the breaker name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Bound every attempt by `timeout`.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Guard every attempt with `breaker`.
    #[must_use]
    pub fn circuit_breaker<C2: Clock>(self, breaker: Arc<CircuitBreaker<C2>>) -> ResiliencePipelineBuilder<T, E, C2> {
        ResiliencePipelineBuilder {
            name: self.name,
            timeout: self.timeout,
            breaker: Some(breaker),
            fallback: self.fallback,
            retry: self.retry,
            sink: self.sink,
        }
    }

    /// Guard every attempt with the registry's breaker for `config`.
    #[must_use]
    pub fn circuit_breaker_from<C2: Clock + Clone>(
        self,
        registry: &CircuitRegistry<C2>,
        config: &CircuitBreakerConfig,
    ) -> ResiliencePipelineBuilder<T, E, C2> {
        self.circuit_breaker(registry.get_or_create(config))
    }

    /// Replace counted failures and rejections with `fallback(error)`.
    /// Requires a circuit breaker.
    #[must_use]
    pub fn fallback<FB>(mut self, fallback: FB) -> Self
    where
        FB: Fn(E) -> T + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    /// Retry the whole stack under `policy`.
    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy<E>) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Sink for retry events. Breaker events go to the breaker's own sink.
    #[must_use]
    pub fn sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Assemble the pipeline.
    pub fn build(self) -> ConfigResult<ResiliencePipeline<T, E, C>> {
        if self.fallback.is_some() && self.breaker.is_none() {
            return Err(ConfigError::invalid("a fallback requires a circuit breaker"));
        }
        if self.timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(ConfigError::invalid("timeout must be greater than zero"));
        }

        let name = self
            .name
            .or_else(|| self.breaker.as_ref().map(|breaker| breaker.name().to_owned()))
            .unwrap_or_else(|| "pipeline".to_owned());

        let retry = self.retry.map(|policy| {
            let mut executor = RetryExecutor::new(name, policy).with_sink(self.sink);
            if let Some(breaker) = &self.breaker {
                executor.policy_mut().extend_non_retryable(breaker.config().ignored_kinds().iter().cloned());
            }
            executor
        });

        Ok(ResiliencePipeline { timeout: self.timeout, breaker: self.breaker, fallback: self.fallback, retry })
    }
}
