// Recipes Library - single-flight recipe orchestration with live state broadcasting
// This exposes the core components for testing and integration

pub mod cli;
pub mod config;
pub mod control;
pub mod recipes;
pub mod server;
pub mod shutdown;
pub mod telemetry;

// Re-export key types for easy access
pub use config::{find_package_root, RecipesConfig};
pub use control::http::{create_router, ApiError, AppState};
pub use control::{
    check_plan, decode_event, decode_plan, Acknowledgement, ControlChannel, OperationPayload,
};
pub use recipes::{
    transition, BuiltinRegistry, ChangeNotifier, EngineBuilder, EngineSettings, EventDelivery,
    EventDescriptor, Machine, MachineEvent, Notification, OrchestrationEngine, Plan, RecipeError,
    RegistryError, Snapshot, StateValue, Step, StepContext, StepError, StepKind, StepOutput,
    StepRegistry, Subscription, TransitionObserver,
};
pub use server::RecipeServer;
pub use telemetry::{create_request_span, generate_correlation_id, init_telemetry};
