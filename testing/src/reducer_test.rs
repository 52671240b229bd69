//! Ergonomic testing utilities for reducers
//!
//! This module provides a fluent API for testing reducers with readable Given-When-Then syntax.

#![allow(clippy::module_name_repetitions)] // ReducerTest is the natural name

use homeserve_core::{effect::Effect, reducer::Reducer};

/// Type alias for state assertion functions
type StateAssertion<S> = Box<dyn FnOnce(&S)>;

/// Type alias for effect assertion functions
type EffectAssertion = Box<dyn FnOnce(&[Effect])>;

/// Fluent API for testing reducers with Given-When-Then syntax
///
/// `when_action` may be called several times; the actions are reduced in
/// order and effect assertions see the effects of every step.
///
/// # Example
///
/// ```ignore
/// use homeserve_testing::ReducerTest;
///
/// ReducerTest::new(BookingReducer::new())
///     .with_env(test_environment())
///     .given_state(BookingState::default())
///     .when_action(BookingAction::CreateBooking { .. })
///     .then_state(|state| {
///         assert_eq!(state.status(), Some(Status::Pending));
///     })
///     .then_effects(assertions::assert_publishes(1))
///     .run();
/// ```
pub struct ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    reducer: R,
    environment: Option<E>,
    initial_state: Option<S>,
    actions: Vec<A>,
    state_assertions: Vec<StateAssertion<S>>,
    effect_assertions: Vec<EffectAssertion>,
}

impl<R, S, A, E> ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    /// Create a new reducer test with the given reducer
    #[must_use]
    pub const fn new(reducer: R) -> Self {
        Self {
            reducer,
            environment: None,
            initial_state: None,
            actions: Vec::new(),
            state_assertions: Vec::new(),
            effect_assertions: Vec::new(),
        }
    }

    /// Set the environment for the test
    #[must_use]
    pub fn with_env(mut self, env: E) -> Self {
        self.environment = Some(env);
        self
    }

    /// Set the initial state (Given)
    #[must_use]
    pub fn given_state(mut self, state: S) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Add an action to reduce (When)
    #[must_use]
    pub fn when_action(mut self, action: A) -> Self {
        self.actions.push(action);
        self
    }

    /// Add an assertion about the resulting state (Then)
    #[must_use]
    pub fn then_state<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&S) + 'static,
    {
        self.state_assertions.push(Box::new(assertion));
        self
    }

    /// Add an assertion about the resulting effects (Then)
    #[must_use]
    pub fn then_effects<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&[Effect]) + 'static,
    {
        self.effect_assertions.push(Box::new(assertion));
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

        assert!(!self.actions.is_empty(), "Action must be set with when_action()");

        let env = self
            .environment
            .expect("Environment must be set with with_env()");

        let mut effects = Vec::new();
        for action in self.actions {
            effects.extend(self.reducer.reduce(&mut state, action, &env));
        }

        for assertion in self.state_assertions {
            assertion(&state);
        }

        for assertion in self.effect_assertions {
            assertion(&effects);
        }
    }
}

/// Helper assertions for effects
pub mod assertions {
    use homeserve_core::effect::Effect;

    /// Assert that there are no effects (or only `Effect::None`)
    ///
    /// # Panics
    ///
    /// Panics if any effect does something.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_no_effects(effects: &[Effect]) {
        assert!(
            effects.iter().all(Effect::is_none),
            "Expected no effects, but found {}: {:?}",
            effects.len(),
            effects
        );
    }

    /// Assert the number of publishes across all effects
    ///
    /// # Panics
    ///
    /// Panics if the count doesn't match.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_publish_count(effects: &[Effect], expected: usize) {
        let found = effects.iter().filter_map(Effect::publication).count();
        assert_eq!(found, expected, "Expected {expected} publishes, but found {found}");
    }

    /// Assert that at least one effect publishes an event of `event_type`
    ///
    /// # Panics
    ///
    /// Panics if no such publish is found.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_publishes_event_type(effects: &[Effect], event_type: &str) {
        let types: Vec<String> = effects
            .iter()
            .filter_map(Effect::publication)
            .map(|(_, event)| event.event_type.clone())
            .collect();
        assert!(
            types.iter().any(|t| t == event_type),
            "Expected a {event_type} publish, found {types:?}"
        );
    }

    /// Build an effect assertion that checks the publish count.
    pub fn assert_publishes(expected: usize) -> impl FnOnce(&[Effect]) {
        move |effects: &[Effect]| assert_publish_count(effects, expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use homeserve_core::event::SerializedEvent;
    use homeserve_core::{SmallVec, smallvec};

    #[derive(Clone, Debug)]
    struct Counter {
        count: i32,
    }

    #[derive(Clone, Debug)]
    enum CounterAction {
        Increment,
        Announce,
    }

    struct CounterReducer;

    struct NoEnv;

    impl Reducer for CounterReducer {
        type State = Counter;
        type Action = CounterAction;
        type Environment = NoEnv;

        fn reduce(
            &self,
            state: &mut Counter,
            action: CounterAction,
            _env: &NoEnv,
        ) -> SmallVec<[Effect; 4]> {
            match action {
                CounterAction::Increment => {
                    state.count += 1;
                    smallvec![Effect::None]
                },
                CounterAction::Announce => smallvec![Effect::PublishEvent {
                    topic: "counter".to_string(),
                    event: SerializedEvent::new("Announced.v1".to_string(), vec![], None),
                }],
            }
        }
    }

    #[test]
    fn actions_are_reduced_in_order() {
        ReducerTest::new(CounterReducer)
            .with_env(NoEnv)
            .given_state(Counter { count: 0 })
            .when_action(CounterAction::Increment)
            .when_action(CounterAction::Increment)
            .then_state(|state| assert_eq!(state.count, 2))
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn publish_assertions_see_every_step() {
        ReducerTest::new(CounterReducer)
            .with_env(NoEnv)
            .given_state(Counter { count: 0 })
            .when_action(CounterAction::Announce)
            .when_action(CounterAction::Increment)
            .when_action(CounterAction::Announce)
            .then_effects(assertions::assert_publishes(2))
            .then_effects(|effects| {
                assertions::assert_publishes_event_type(effects, "Announced.v1");
            })
            .run();
    }
}
