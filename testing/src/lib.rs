//! # Natours Testing
//!
//! Testing utilities for Natours reducers and stores.
//!
//! This crate provides:
//! - A deterministic [`FixedClock`]
//! - The Given-When-Then [`ReducerTest`] builder
//! - [`effects::resolve`] to drive effect futures without a Store
//! - Assertion helpers for effects
//!
//! ## Example
//!
//! ```ignore
//! use natours_testing::{test_clock, ReducerTest};
//!
//! ReducerTest::new(RefundReducer)
//!     .with_env(test_environment())
//!     .given_state(RefundState::default())
//!     .when_action(RefundAction::RequestRefund { .. })
//!     .then_state(|state| assert_eq!(state.in_flight.len(), 1))
//!     .run();
//! ```

use chrono::{DateTime, Duration, Utc};
use natours_core::environment::Clock;
use std::sync::{Arc, Mutex};

pub mod reducer_test;

pub use reducer_test::{assertions, ReducerTest};

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Arc, Clock, DateTime, Duration, Mutex, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Returns the same time until moved with [`FixedClock::advance`].
    /// Clones share the same instant.
    ///
    /// # Example
    ///
    /// ```
    /// use natours_testing::mocks::FixedClock;
    /// use natours_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2);
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, by: Duration) {
            if let Ok(mut time) = self.time.lock() {
                *time += by;
            }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
                .lock()
                .map_or_else(|poisoned| *poisoned.into_inner(), |time| *time)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Drive effect descriptions by hand.
pub mod effects {
    use natours_core::effect::Effect;

    /// Execute effects in order and collect the actions they produce.
    ///
    /// Parallel effects are run one after another, delays are skipped, and
    /// produced actions are returned instead of being fed back into a reducer.
    pub async fn resolve<A, I>(effects: I) -> Vec<A>
    where
        A: Send + 'static,
        I: IntoIterator<Item = Effect<A>>,
    {
        let mut actions = Vec::new();
        let mut queue: Vec<Effect<A>> = effects.into_iter().collect();
        queue.reverse();

        while let Some(effect) = queue.pop() {
            match effect {
                Effect::None => {},
                Effect::Parallel(children) | Effect::Sequential(children) => {
                    queue.extend(children.into_iter().rev());
                },
                Effect::Delay { action, .. } => actions.push(*action),
                Effect::Future(fut) => {
                    if let Some(action) = fut.await {
                        actions.push(action);
                    }
                },
            }
        }

        actions
    }
}

// Re-export commonly used items
pub use mocks::{test_clock, FixedClock};
