//! Given-When-Then harness for a single reducer step.
//!
//! A reducer test fixes the environment and starting state, feeds one
//! action, then checks the resulting state and the effects returned.
//! Effects are not run; pass them to [`crate::effects::resolve`] from
//! [`ReducerTest::run_with_effects`] when their output matters.

#![allow(clippy::module_name_repetitions)]

use natours_core::{effect::Effect, reducer::Reducer, SmallVec};

type StateCheck<S> = Box<dyn FnOnce(&S)>;
type EffectCheck<A> = Box<dyn FnOnce(&[Effect<A>])>;

/// Builder for one reducer step.
///
/// ```ignore
/// ReducerTest::new(RefundReducer::new())
///     .with_env(env)
///     .given_state(RefundState::default())
///     .when_action(RefundAction::ProcessRefund { request_id, refund_id })
///     .then_state(|state| assert_eq!(state.in_flight.len(), 1))
///     .then_effects(|effects| assertions::assert_effects_count(effects, 1))
///     .run();
/// ```
pub struct ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    reducer: R,
    environment: Option<E>,
    state: Option<S>,
    action: Option<A>,
    state_checks: Vec<StateCheck<S>>,
    effect_checks: Vec<EffectCheck<A>>,
}

impl<R, S, A, E> ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    /// Start a test for `reducer`.
    #[must_use]
    pub const fn new(reducer: R) -> Self {
        Self {
            reducer,
            environment: None,
            state: None,
            action: None,
            state_checks: Vec::new(),
            effect_checks: Vec::new(),
        }
    }

    /// Environment passed to the reducer.
    #[must_use]
    pub fn with_env(mut self, env: E) -> Self {
        self.environment = Some(env);
        self
    }

    /// Given: the state before the action.
    #[must_use]
    pub fn given_state(mut self, state: S) -> Self {
        self.state = Some(state);
        self
    }

    /// When: the action to reduce.
    #[must_use]
    pub fn when_action(mut self, action: A) -> Self {
        self.action = Some(action);
        self
    }

    /// Then: a check on the state after the action.
    #[must_use]
    pub fn then_state(mut self, check: impl FnOnce(&S) + 'static) -> Self {
        self.state_checks.push(Box::new(check));
        self
    }

    /// Then: a check on the returned effects.
    #[must_use]
    pub fn then_effects(mut self, check: impl FnOnce(&[Effect<A>]) + 'static) -> Self {
        self.effect_checks.push(Box::new(check));
        self
    }

    /// Reduce and run every check.
    ///
    /// # Panics
    ///
    /// When the environment, state or action is missing, or a check fails.
    pub fn run(self) {
        drop(self.run_with_effects());
    }

    /// Reduce, run every check and return the effects.
    ///
    /// # Panics
    ///
    /// When the environment, state or action is missing, or a check fails.
    #[allow(clippy::expect_used)]
    pub fn run_with_effects(self) -> SmallVec<[Effect<A>; 4]> {
        let env = self.environment.expect("call with_env() before running");
        let mut state = self.state.expect("call given_state() before running");
        let action = self.action.expect("call when_action() before running");

        let effects = self.reducer.reduce(&mut state, action, &env);

        for check in self.state_checks {
            check(&state);
        }
        for check in self.effect_checks {
            check(&effects);
        }
        effects
    }
}

/// Assertions over returned effects.
pub mod assertions {
    use natours_core::effect::Effect;

    /// Nothing to run: no effects, or a single [`Effect::None`].
    ///
    /// # Panics
    ///
    /// When any real effect was returned.
    pub fn assert_no_effects<A: std::fmt::Debug>(effects: &[Effect<A>]) {
        assert!(
            effects.iter().all(|e| matches!(e, Effect::None)),
            "expected no effects, got {effects:?}"
        );
    }

    /// Exactly `expected` top-level effects.
    ///
    /// # Panics
    ///
    /// When the count differs.
    pub fn assert_effects_count<A>(effects: &[Effect<A>], expected: usize) {
        assert_eq!(effects.len(), expected, "unexpected number of effects");
    }

    /// At least one [`Effect::Future`].
    ///
    /// # Panics
    ///
    /// When no future effect was returned.
    pub fn assert_has_future_effect<A>(effects: &[Effect<A>]) {
        assert!(
            effects.iter().any(|e| matches!(e, Effect::Future(_))),
            "expected a future effect"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use natours_core::smallvec;

    #[derive(Debug, Clone, PartialEq)]
    enum DepartureAction {
        Book(u32),
        Cancel(u32),
        Cancelled(u32),
    }

    #[derive(Debug, Clone, Default)]
    struct Departure {
        booked: u32,
    }

    struct DepartureReducer;

    struct Capacity(u32);

    impl Reducer for DepartureReducer {
        type State = Departure;
        type Action = DepartureAction;
        type Environment = Capacity;

        fn reduce(
            &self,
            state: &mut Departure,
            action: DepartureAction,
            env: &Capacity,
        ) -> SmallVec<[Effect<DepartureAction>; 4]> {
            match action {
                DepartureAction::Book(n) if state.booked + n <= env.0 => {
                    state.booked += n;
                    SmallVec::new()
                },
                DepartureAction::Book(_) | DepartureAction::Cancelled(_) => {
                    smallvec![Effect::None]
                },
                DepartureAction::Cancel(n) => {
                    state.booked = state.booked.saturating_sub(n);
                    smallvec![Effect::send(DepartureAction::Cancelled(n))]
                },
            }
        }
    }

    #[test]
    fn test_state_and_effect_checks_run() {
        ReducerTest::new(DepartureReducer)
            .with_env(Capacity(10))
            .given_state(Departure { booked: 8 })
            .when_action(DepartureAction::Book(2))
            .then_state(|d| assert_eq!(d.booked, 10))
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn test_overbooking_leaves_state_alone() {
        ReducerTest::new(DepartureReducer)
            .with_env(Capacity(10))
            .given_state(Departure { booked: 9 })
            .when_action(DepartureAction::Book(2))
            .then_state(|d| assert_eq!(d.booked, 9))
            .then_effects(|effects| assertions::assert_effects_count(effects, 1))
            .run();
    }

    #[tokio::test]
    async fn test_returned_effects_can_be_resolved() {
        let effects = ReducerTest::new(DepartureReducer)
            .with_env(Capacity(10))
            .given_state(Departure { booked: 4 })
            .when_action(DepartureAction::Cancel(3))
            .then_state(|d| assert_eq!(d.booked, 1))
            .then_effects(assertions::assert_has_future_effect)
            .run_with_effects();

        let produced = crate::effects::resolve(effects).await;
        assert_eq!(produced, vec![DepartureAction::Cancelled(3)]);
    }

    #[test]
    #[should_panic(expected = "call when_action()")]
    fn test_missing_action_panics() {
        ReducerTest::new(DepartureReducer)
            .with_env(Capacity(10))
            .given_state(Departure::default())
            .run();
    }
}
