//! # Homeserve Core
//!
//! Core traits and types shared by the Homeserve booking backend.
//!
//! The booking lifecycle is written as a reducer: a pure function that takes
//! the current state, an action and an injected environment, mutates the
//! state and returns descriptions of side effects. The runtime persists the
//! new state and only then executes those effects.
//!
//! ## Core Concepts
//!
//! - **State**: Domain state for one aggregate (a booking)
//! - **Action**: All inputs to a reducer (commands and the events they produce)
//! - **Reducer**: Pure function `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: Side effect descriptions (not execution)
//! - **Environment**: Injected dependencies via traits (clock, code generator)
//!
//! ## Example
//!
//! ```ignore
//! use homeserve_core::{effect::Effect, reducer::Reducer, SmallVec};
//!
//! impl Reducer for BookingReducer {
//!     type State = BookingState;
//!     type Action = BookingAction;
//!     type Environment = BookingEnvironment;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut BookingState,
//!         action: BookingAction,
//!         env: &BookingEnvironment,
//!     ) -> SmallVec<[Effect; 4]> {
//!         // Business logic goes here
//!         SmallVec::new()
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{SmallVec, smallvec};

pub mod event;
pub mod event_bus;
pub mod version;

/// Reducer module - The core trait for business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`
///
/// They contain all business logic and are deterministic and testable.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Validates the action
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be executed
        ///
        /// Most actions produce zero or one effect, so the return type keeps
        /// up to four effects inline without allocating.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect; 4]>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects describe side effects to be performed by the runtime.
/// They are values (not execution). The runtime executes them after the
/// state change that produced them has been persisted.
pub mod effect {
    use crate::event::SerializedEvent;

    /// Effect type - describes a side effect to be executed
    ///
    /// Effects are NOT executed immediately. They are descriptions of what should happen,
    /// returned from reducers and executed by the booking engine.
    #[derive(Clone, Debug)]
    pub enum Effect {
        /// No-op effect
        None,

        /// Publish an event to a topic on the event bus
        PublishEvent {
            /// Topic to publish to (e.g. `booking.<id>`)
            topic: String,
            /// The serialized event
            event: SerializedEvent,
        },
    }

    impl Effect {
        /// Returns `true` if this effect does nothing when executed.
        #[must_use]
        pub const fn is_none(&self) -> bool {
            matches!(self, Effect::None)
        }

        /// The `(topic, event)` this effect publishes, if any
        #[must_use]
        pub fn publication(&self) -> Option<(&str, &SerializedEvent)> {
            match self {
                Effect::None => None,
                Effect::PublishEvent { topic, event } => Some((topic.as_str(), event)),
            }
        }
    }
}

/// Environment module - Dependency injection traits
///
/// All non-deterministic inputs to a reducer (wall-clock time, random codes)
/// are abstracted behind traits and injected via the Environment parameter.
pub mod environment {
    use chrono::{DateTime, Utc};
    use rand::Rng;

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Source of short numeric one-time codes.
    pub trait CodeGenerator: Send + Sync {
        /// Generate a code made of exactly `digits` ASCII decimal digits.
        ///
        /// Leading zeros are allowed, so the result is a string rather than
        /// an integer.
        fn numeric_code(&self, digits: u8) -> String;
    }

    /// Code generator backed by the thread-local RNG.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct RandomCodeGenerator;

    impl CodeGenerator for RandomCodeGenerator {
        fn numeric_code(&self, digits: u8) -> String {
            let mut rng = rand::thread_rng();
            (0..digits)
                .map(|_| char::from(b'0' + rng.gen_range(0..10_u8)))
                .collect()
        }
    }
}
