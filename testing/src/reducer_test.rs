//! Ergonomic testing utilities for reducers
//!
//! This module provides a fluent API for testing reducers with readable Given-When-Then syntax.

#![allow(clippy::module_name_repetitions)] // ReducerTest is the natural name

use classbook_core::lifecycle::Reducer;
use std::fmt::Debug;

/// Type alias for state assertion functions
type StateAssertion<S> = Box<dyn FnOnce(&S)>;

/// Type alias for effect assertion functions
type EffectAssertion<F> = Box<dyn FnOnce(&[F])>;

/// Type alias for rejection assertion functions
type ErrorAssertion<E> = Box<dyn FnOnce(&E)>;

enum Expectation<F, E> {
    Accepted(Vec<EffectAssertion<F>>),
    Rejected(Vec<ErrorAssertion<E>>),
}

/// Fluent API for testing reducers with Given-When-Then syntax
///
/// # Example
///
/// ```ignore
/// use classbook_testing::ReducerTest;
///
/// ReducerTest::new(BookingReducer)
///     .with_env(LifecycleEnvironment::new(Arc::new(test_clock())))
///     .given_state(active_booking)
///     .when_action(BookingAction::MoveToWaitingList)
///     .then_state(|booking| {
///         assert_eq!(booking.status, BookingStatus::WaitingList);
///     })
///     .then_effects(|effects| {
///         assert_eq!(effects.len(), 3);
///     })
///     .run();
/// ```
pub struct ReducerTest<R>
where
    R: Reducer,
{
    reducer: R,
    environment: Option<R::Environment>,
    initial_state: Option<R::State>,
    action: Option<R::Action>,
    state_assertions: Vec<StateAssertion<R::State>>,
    expectation: Expectation<R::Effect, R::Error>,
}

impl<R> ReducerTest<R>
where
    R: Reducer,
    R::State: Clone + PartialEq + Debug,
    R::Effect: Debug,
    R::Error: Debug,
{
    /// Create a new reducer test with the given reducer
    #[must_use]
    pub const fn new(reducer: R) -> Self {
        Self {
            reducer,
            environment: None,
            initial_state: None,
            action: None,
            state_assertions: Vec::new(),
            expectation: Expectation::Accepted(Vec::new()),
        }
    }

    /// Set the environment for the test
    #[must_use]
    pub fn with_env(mut self, env: R::Environment) -> Self {
        self.environment = Some(env);
        self
    }

    /// Set the initial state (Given)
    #[must_use]
    pub fn given_state(mut self, state: R::State) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Set the action to test (When)
    #[must_use]
    pub fn when_action(mut self, action: R::Action) -> Self {
        self.action = Some(action);
        self
    }

    /// Add an assertion about the resulting state (Then)
    #[must_use]
    pub fn then_state<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&R::State) + 'static,
    {
        self.state_assertions.push(Box::new(assertion));
        self
    }

    /// Add an assertion about the resulting effects (Then)
    ///
    /// Expects the action to be accepted.
    #[must_use]
    pub fn then_effects<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&[R::Effect]) + 'static,
    {
        match &mut self.expectation {
            Expectation::Accepted(assertions) => assertions.push(Box::new(assertion)),
            Expectation::Rejected(_) => {
                self.expectation = Expectation::Accepted(vec![Box::new(assertion)]);
            },
        }
        self
    }

    /// Expect the action to be rejected, and assert on the error (Then)
    ///
    /// A rejected action must leave the state untouched; `run` checks this.
    #[must_use]
    pub fn then_rejected<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&R::Error) + 'static,
    {
        match &mut self.expectation {
            Expectation::Rejected(assertions) => assertions.push(Box::new(assertion)),
            Expectation::Accepted(_) => {
                self.expectation = Expectation::Rejected(vec![Box::new(assertion)]);
            },
        }
        self
    }

    /// Run the test and execute all assertions
    ///
    /// # Panics
    ///
    /// Panics if initial state, action, or environment is not set,
    /// or if any assertions fail.
    #[allow(clippy::panic)] // Test code can panic
    #[allow(clippy::expect_used)] // Test code can use expect
    pub fn run(self) {
        let mut state = self
            .initial_state
            .expect("Initial state must be set with given_state()");

        let action = self.action.expect("Action must be set with when_action()");

        let env = self
            .environment
            .expect("Environment must be set with with_env()");

        let before = state.clone();

        // Execute reducer
        let result = self.reducer.reduce(&mut state, action, &env);

        match (result, self.expectation) {
            (Ok(effects), Expectation::Accepted(assertions)) => {
                for assertion in assertions {
                    assertion(&effects);
                }
            },
            (Err(error), Expectation::Rejected(assertions)) => {
                assert_eq!(state, before, "Rejected action must not mutate state");
                for assertion in assertions {
                    assertion(&error);
                }
            },
            (Ok(effects), Expectation::Rejected(_)) => {
                panic!("Expected the action to be rejected, but it produced {effects:?}")
            },
            (Err(error), Expectation::Accepted(_)) => {
                panic!("Expected the action to be accepted, but it was rejected: {error:?}")
            },
        }

        // Run state assertions
        for assertion in self.state_assertions {
            assertion(&state);
        }
    }
}

/// Helper assertions for booking effects
pub mod assertions {
    use classbook_core::lifecycle::BookingEffect;
    use classbook_core::types::ClassSessionId;

    /// Assert that there are no effects
    ///
    /// # Panics
    ///
    /// Panics if effects is not empty.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_no_effects(effects: &[BookingEffect]) {
        assert!(
            effects.is_empty(),
            "Expected no effects, but found {}: {:?}",
            effects.len(),
            effects
        );
    }

    /// Assert the number of effects
    ///
    /// # Panics
    ///
    /// Panics if the number of effects doesn't match expected.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_effects_count(effects: &[BookingEffect], expected: usize) {
        assert_eq!(
            effects.len(),
            expected,
            "Expected {} effects, but found {}",
            expected,
            effects.len()
        );
    }

    /// Net seat change per session described by `effects` (reserve = -n, release = +n).
    #[must_use]
    pub fn net_capacity_change(effects: &[BookingEffect], session: ClassSessionId) -> i64 {
        effects
            .iter()
            .map(|effect| match effect {
                BookingEffect::ReserveSeats {
                    class_session_id,
                    seats,
                } if *class_session_id == session => -i64::from(*seats),
                BookingEffect::ReleaseSeats {
                    class_session_id,
                    seats,
                } if *class_session_id == session => i64::from(*seats),
                _ => 0,
            })
            .sum()
    }

    /// Assert that effects touch no capacity at all
    ///
    /// # Panics
    ///
    /// Panics if a reserve or release effect is present.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_no_capacity_change(effects: &[BookingEffect]) {
        assert!(
            !effects.iter().any(|e| matches!(
                e,
                BookingEffect::ReserveSeats { .. } | BookingEffect::ReleaseSeats { .. }
            )),
            "Expected no capacity effects, but found {effects:?}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use classbook_core::{SmallVec, smallvec};

    #[derive(Clone, Debug, PartialEq)]
    struct TestState {
        count: i32,
    }

    #[derive(Clone, Debug)]
    enum TestAction {
        Increment,
        Decrement,
    }

    struct TestReducer;

    struct TestEnv;

    impl Reducer for TestReducer {
        type State = TestState;
        type Action = TestAction;
        type Environment = TestEnv;
        type Effect = &'static str;
        type Error = &'static str;

        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            _env: &Self::Environment,
        ) -> Result<SmallVec<[Self::Effect; 4]>, Self::Error> {
            match action {
                TestAction::Increment => {
                    state.count += 1;
                    Ok(smallvec!["incremented"])
                },
                TestAction::Decrement if state.count == 0 => Err("already zero"),
                TestAction::Decrement => {
                    state.count -= 1;
                    Ok(SmallVec::new())
                },
            }
        }
    }

    #[test]
    fn test_reducer_test_increment() {
        ReducerTest::new(TestReducer)
            .with_env(TestEnv)
            .given_state(TestState { count: 0 })
            .when_action(TestAction::Increment)
            .then_state(|state| {
                assert_eq!(state.count, 1);
            })
            .then_effects(|effects| {
                assert_eq!(effects, ["incremented"]);
            })
            .run();
    }

    #[test]
    fn test_reducer_test_rejection() {
        ReducerTest::new(TestReducer)
            .with_env(TestEnv)
            .given_state(TestState { count: 0 })
            .when_action(TestAction::Decrement)
            .then_rejected(|error| {
                assert_eq!(*error, "already zero");
            })
            .then_state(|state| {
                assert_eq!(state.count, 0);
            })
            .run();
    }

    #[test]
    fn test_assertions_no_effects() {
        assertions::assert_no_effects(&[]);
        assertions::assert_effects_count(&[], 0);
    }
}
