// Core types for recipe plans and machine events

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single declarative step in a recipe plan.
///
/// The orchestrator treats steps as opaque: only the registry interprets
/// `resource` and `params`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Resource type name the registry dispatches on
    #[serde(alias = "resourceName")]
    pub resource: String,
    /// Human-readable description shown to observers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub describe: Option<String>,
    /// Resource-specific parameters
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl Step {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            describe: None,
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn with_description(mut self, describe: impl Into<String>) -> Self {
        self.describe = Some(describe.into());
        self
    }

    /// String parameter lookup
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}

/// Ordered, immutable sequence of steps
pub type Plan = Vec<Step>;

/// How a step is driven, as decided by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StepKind {
    /// Runs as soon as the machine reaches it
    Automatic,
    /// Waits for an external event with the given tag before running
    NeedsConfirmation { event: String },
}

impl StepKind {
    pub fn confirm_on(event: impl Into<String>) -> Self {
        StepKind::NeedsConfirmation {
            event: event.into(),
        }
    }

    pub fn expected_event(&self) -> Option<&str> {
        match self {
            StepKind::Automatic => None,
            StepKind::NeedsConfirmation { event } => Some(event),
        }
    }
}

/// What a successfully executed step reports back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    pub resource: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl StepOutput {
    pub fn new(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            message: message.into(),
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Serializable description of an event, as seen in `lastEvent`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl EventDescriptor {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: Map::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }
}
