use thiserror::Error;

/// Errors surfaced synchronously to callers of the engine and control channel
#[derive(Debug, Error)]
pub enum RecipeError {
    #[error("Invalid payload: {reason}")]
    Validation { reason: String },

    #[error("No recipe instance is running")]
    NoActiveInstance,

    #[error("Recipe instance failed to start: {reason}")]
    Startup { reason: String },

    #[error("Step {index} ({resource}) failed: {message}")]
    StepExecution {
        index: usize,
        resource: String,
        message: String,
    },

    #[error("Orchestration engine is not running")]
    EngineStopped,
}

impl RecipeError {
    pub fn validation(reason: impl Into<String>) -> Self {
        RecipeError::Validation {
            reason: reason.into(),
        }
    }

    pub fn startup(reason: impl Into<String>) -> Self {
        RecipeError::Startup {
            reason: reason.into(),
        }
    }

    /// Machine-readable code used by transports
    pub fn code(&self) -> &'static str {
        match self {
            RecipeError::Validation { .. } => "VALIDATION_ERROR",
            RecipeError::NoActiveInstance => "NO_ACTIVE_INSTANCE",
            RecipeError::Startup { .. } => "STARTUP_ERROR",
            RecipeError::StepExecution { .. } => "STEP_EXECUTION_ERROR",
            RecipeError::EngineStopped => "ENGINE_STOPPED",
        }
    }
}

/// Registry-level failures while validating or classifying a step
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown step resource: {0}")]
    UnknownResource(String),

    #[error("Invalid {resource} step: {reason}")]
    InvalidStep { resource: String, reason: String },
}

/// Failure of a single step while executing
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct StepError {
    pub message: String,
}

impl StepError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for StepError {
    fn from(err: std::io::Error) -> Self {
        StepError::new(err.to_string())
    }
}
