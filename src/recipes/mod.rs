//! Recipe orchestration core
//!
//! - **types**: plans, steps and event descriptors
//! - **registry**: the step registry seam and the built-in resources
//! - **machine**: the state machine and its pure transition function
//! - **notifier**: multi-subscriber change broadcasting
//! - **engine**: the single-flight engine task driving one instance at a time

pub mod engine;
pub mod errors;
pub mod machine;
pub mod notifier;
pub mod registry;
pub mod types;

#[cfg(test)]
pub mod mocks;

pub use engine::{
    EngineBuilder, EngineSettings, EventDelivery, OrchestrationEngine, TransitionLogger,
};
pub use errors::{RecipeError, RegistryError, StepError};
pub use machine::{
    transition, Effect, Machine, MachineContext, MachineEvent, Snapshot, StateValue, StepFailure,
    Transition, TransitionObserver, TransitionReport,
};
pub use notifier::{ChangeNotifier, Notification, Subscription};
pub use registry::{BuiltinRegistry, StepContext, StepRegistry, DEFAULT_CONFIRM_EVENT};
pub use types::{EventDescriptor, Plan, Step, StepKind, StepOutput};
