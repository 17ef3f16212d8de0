//! # Natours Runtime
//!
//! The Store runtime that drives Natours reducers.
//!
//! A [`store::Store`] owns the in-memory workflow state, runs the reducer for
//! every action, executes the returned effects on the tokio runtime and feeds
//! their results back in as new actions. Every fed-back action is also
//! broadcast so HTTP handlers can wait for the terminal action of the request
//! they started.
//!
//! ## Example
//!
//! ```ignore
//! use natours_runtime::Store;
//!
//! let store = Store::new(CheckoutState::default(), CheckoutReducer, env);
//!
//! let result = store
//!     .send_and_wait_for(
//!         CheckoutAction::StartCheckout { .. },
//!         |a| a.is_terminal_for(request_id),
//!         Duration::from_secs(10),
//!     )
//!     .await?;
//! ```

use natours_core::{effect::Effect, reducer::Reducer};
use std::sync::Arc;
use tokio::sync::RwLock;

pub use store::{EffectHandle, Store};

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug)]
    pub enum StoreError {
        /// Store is shutting down and not accepting new actions
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown timed out waiting for effects to complete
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),

        /// Timeout waiting for terminal action
        ///
        /// Returned by `send_and_wait_for` when the timeout expires before
        /// a matching action is received.
        #[error("Timeout waiting for action")]
        Timeout,

        /// Action broadcast channel closed
        #[error("Action broadcast channel closed")]
        ChannelClosed,
    }
}

/// Health check status levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,

    /// Component is operational but draining or otherwise impaired
    Degraded,

    /// Component is not operational
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Get the worst status between two statuses
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
            (Self::Degraded, _) | (_, Self::Degraded) => Self::Degraded,
            _ => Self::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check result for a component
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthCheck {
    /// Name of the component being checked
    pub component: String,

    /// Current health status
    pub status: HealthStatus,

    /// Optional message providing details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthCheck {
    /// Create a healthy check result
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    /// Create a degraded check result
    #[must_use]
    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
        }
    }

    /// Create an unhealthy check result
    #[must_use]
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }
}

/// Aggregated health report
///
/// Combines multiple health checks into an overall system status.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    /// Overall system status (worst of all checks)
    pub status: HealthStatus,

    /// Individual component checks
    pub checks: Vec<HealthCheck>,

    /// Timestamp when report was generated
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthReport {
    /// Create a new health report from checks
    #[must_use]
    pub fn new(checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .fold(HealthStatus::Healthy, HealthStatus::worst);

        Self {
            status,
            checks,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Check if overall system is healthy
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }
}

/// Store module - the runtime for reducers
pub mod store {
    use super::{Arc, Effect, Reducer, RwLock};
    use crate::error::StoreError;
    use crate::HealthCheck;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::{broadcast, watch};

    /// Default capacity of the action broadcast channel.
    pub const DEFAULT_BROADCAST_CAPACITY: usize = 256;

    /// Handle for waiting on the effects started by one `send`.
    ///
    /// Tracking cascades: actions fed back by those effects, and the effects
    /// they in turn produce, are counted against the same handle.
    #[derive(Clone)]
    pub struct EffectHandle {
        pending: watch::Receiver<usize>,
    }

    impl EffectHandle {
        /// Wait until every tracked effect has finished.
        pub async fn wait(&mut self) {
            // Err only when every tracker is gone, which also means zero pending.
            let _ = self.pending.wait_for(|pending| *pending == 0).await;
        }

        /// Wait for all effects to complete with a timeout
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::Timeout`] if effects are still running when
        /// the timeout expires.
        pub async fn wait_with_timeout(&mut self, timeout: Duration) -> Result<(), StoreError> {
            tokio::time::timeout(timeout, self.wait())
                .await
                .map_err(|_| StoreError::Timeout)
        }
    }

    impl std::fmt::Debug for EffectHandle {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("EffectHandle")
                .field("pending_effects", &*self.pending.borrow())
                .finish()
        }
    }

    /// Counter of in-flight effects shared between a handle and the tasks it tracks.
    #[derive(Clone)]
    struct EffectTracking {
        pending: Arc<watch::Sender<usize>>,
    }

    impl EffectTracking {
        fn new() -> (Self, EffectHandle) {
            let (tx, rx) = watch::channel(0_usize);
            (
                Self {
                    pending: Arc::new(tx),
                },
                EffectHandle { pending: rx },
            )
        }

        fn increment(&self) {
            self.pending.send_modify(|pending| *pending += 1);
        }

        fn decrement(&self) {
            self.pending
                .send_modify(|pending| *pending = pending.saturating_sub(1));
        }

        fn guard(&self) -> DecrementGuard {
            self.increment();
            DecrementGuard(self.clone())
        }
    }

    /// Decrements the tracking counter on drop, so a panicking effect still completes.
    struct DecrementGuard(EffectTracking);

    impl Drop for DecrementGuard {
        fn drop(&mut self) {
            self.0.decrement();
        }
    }

    /// The Store - runtime coordinator for a reducer
    ///
    /// Cloning a store is cheap; all clones share state, reducer, environment
    /// and the action broadcast channel.
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        state: Arc<RwLock<S>>,
        reducer: Arc<R>,
        environment: Arc<E>,
        shutdown: Arc<AtomicBool>,
        /// Every effect started by this store, across all sends.
        in_flight: EffectTracking,
        in_flight_rx: watch::Receiver<usize>,
        /// Actions produced by effects, for request-response handlers.
        action_broadcast: broadcast::Sender<A>,
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        fn clone(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
                reducer: Arc::clone(&self.reducer),
                environment: Arc::clone(&self.environment),
                shutdown: Arc::clone(&self.shutdown),
                in_flight: self.in_flight.clone(),
                in_flight_rx: self.in_flight_rx.clone(),
                action_broadcast: self.action_broadcast.clone(),
            }
        }
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
        A: Send + Clone + std::fmt::Debug + 'static,
        S: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        /// Create a new store with initial state, reducer, and environment
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            Self::with_broadcast_capacity(
                initial_state,
                reducer,
                environment,
                DEFAULT_BROADCAST_CAPACITY,
            )
        }

        /// Create a store with a custom action broadcast capacity
        ///
        /// Raise the capacity when many concurrent HTTP requests wait on the
        /// same store, so slow observers do not lag past their terminal action.
        #[must_use]
        pub fn with_broadcast_capacity(
            initial_state: S,
            reducer: R,
            environment: E,
            capacity: usize,
        ) -> Self {
            let (action_broadcast, _) = broadcast::channel(capacity.max(1));
            let (in_flight, in_flight_rx) = EffectTracking::new();
            Self {
                state: Arc::new(RwLock::new(initial_state)),
                reducer: Arc::new(reducer),
                environment: Arc::new(environment),
                shutdown: Arc::new(AtomicBool::new(false)),
                in_flight,
                in_flight_rx: in_flight_rx.pending,
                action_broadcast,
            }
        }

        /// Send an action to the store
        ///
        /// Runs the reducer under the state write lock, then starts the
        /// returned effects. The returned handle resolves once those effects
        /// and everything they cascade into have finished.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownInProgress`] once shutdown has begun.
        #[tracing::instrument(skip(self, action), name = "store_send")]
        pub async fn send(&self, action: A) -> Result<EffectHandle, StoreError> {
            if self.shutdown.load(Ordering::SeqCst) {
                tracing::warn!("Rejected action during shutdown");
                return Err(StoreError::ShutdownInProgress);
            }

            let (tracking, handle) = EffectTracking::new();
            self.dispatch(action, &tracking).await;
            Ok(handle)
        }

        /// Send an action and wait for a matching action produced by its effects
        ///
        /// Subscribes to the action broadcast before sending, so a terminal
        /// action emitted immediately is not missed.
        ///
        /// # Errors
        ///
        /// - [`StoreError::ShutdownInProgress`] if the store is shutting down
        /// - [`StoreError::Timeout`] if no matching action arrives in time
        /// - [`StoreError::ChannelClosed`] if the broadcast channel closes
        pub async fn send_and_wait_for<F>(
            &self,
            action: A,
            predicate: F,
            timeout: Duration,
        ) -> Result<A, StoreError>
        where
            F: Fn(&A) -> bool,
        {
            let mut rx = self.action_broadcast.subscribe();

            self.send(action).await?;

            tokio::time::timeout(timeout, async {
                loop {
                    match rx.recv().await {
                        Ok(action) if predicate(&action) => return Ok(action),
                        Ok(_) => {},
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Action observer lagged");
                        },
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(StoreError::ChannelClosed);
                        },
                    }
                }
            })
            .await
            .map_err(|_| StoreError::Timeout)?
        }

        /// Subscribe to every action produced by effects
        #[must_use]
        pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
            self.action_broadcast.subscribe()
        }

        /// Read state via a closure
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.state.read().await;
            f(&state)
        }

        /// Report the store's health
        ///
        /// A draining store is degraded; one that has finished shutting down
        /// is unhealthy.
        #[must_use]
        pub fn health(&self, component: &str) -> HealthCheck {
            let pending = *self.in_flight_rx.borrow();
            if !self.shutdown.load(Ordering::SeqCst) {
                HealthCheck::healthy(component)
            } else if pending > 0 {
                HealthCheck::degraded(component, format!("draining {pending} effects"))
            } else {
                HealthCheck::unhealthy(component, "shut down")
            }
        }

        /// Stop accepting actions and wait for in-flight effects to finish
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownTimeout`] with the number of effects
        /// still running when the timeout elapses.
        pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
            self.shutdown.store(true, Ordering::SeqCst);
            tracing::info!("Store shutdown initiated");

            let mut rx = self.in_flight_rx.clone();
            let drained = tokio::time::timeout(timeout, async move {
                let _ = rx.wait_for(|pending| *pending == 0).await;
            })
            .await
            .is_ok();

            if drained {
                tracing::info!("Store shutdown complete");
                Ok(())
            } else {
                let remaining = *self.in_flight_rx.borrow();
                tracing::warn!(remaining, "Store shutdown timed out");
                Err(StoreError::ShutdownTimeout(remaining))
            }
        }

        async fn dispatch(&self, action: A, tracking: &EffectTracking) {
            metrics::counter!("store.actions.sent").increment(1);
            tracing::trace!(?action, "Reducing action");

            let effects = {
                let mut state = self.state.write().await;
                self.reducer.reduce(&mut state, action, &self.environment)
            };

            for effect in effects {
                self.execute_effect(effect, tracking.clone());
            }
        }

        /// Broadcast an effect's action, then feed it back through the reducer.
        ///
        /// Shutdown only closes [`Store::send`]; actions from effects already
        /// in flight are still reduced until the effect count drains to zero.
        async fn feed_back(&self, action: A, tracking: &EffectTracking) {
            let _ = self.action_broadcast.send(action.clone());
            Box::pin(self.dispatch(action, tracking)).await;
        }

        fn execute_effect(&self, effect: Effect<A>, tracking: EffectTracking) {
            match effect {
                Effect::None => {},
                Effect::Parallel(effects) => {
                    metrics::counter!("store.effects.executed", "type" => "parallel").increment(1);
                    for effect in effects {
                        self.execute_effect(effect, tracking.clone());
                    }
                },
                Effect::Sequential(effects) => {
                    metrics::counter!("store.effects.executed", "type" => "sequential")
                        .increment(1);
                    let store = self.clone();
                    let guards = (tracking.guard(), self.in_flight.guard());
                    tokio::spawn(async move {
                        let _guards = guards;
                        for effect in effects {
                            // Each step gets its own tracker so the next one
                            // starts only after this one fully settles.
                            let (step, mut handle) = EffectTracking::new();
                            store.execute_effect(effect, step);
                            handle.wait().await;
                        }
                    });
                },
                Effect::Delay { duration, action } => {
                    metrics::counter!("store.effects.executed", "type" => "delay").increment(1);
                    let store = self.clone();
                    let guards = (tracking.guard(), self.in_flight.guard());
                    tokio::spawn(async move {
                        let _guards = guards;
                        tokio::time::sleep(duration).await;
                        store.feed_back(*action, &tracking).await;
                    });
                },
                Effect::Future(fut) => {
                    metrics::counter!("store.effects.executed", "type" => "future").increment(1);
                    let store = self.clone();
                    let guards = (tracking.guard(), self.in_flight.guard());
                    tokio::spawn(async move {
                        let _guards = guards;
                        if let Some(action) = fut.await {
                            store.feed_back(action, &tracking).await;
                        }
                    });
                },
            }
        }
    }
}
