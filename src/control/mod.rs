//! Control channel: the boundary between callers and the engine
//!
//! Decodes serialized plans and events, validates them against the step
//! registry, and relays engine notifications as `{state}` payloads. The
//! transport in [`http`] is one way to reach it; the channel itself knows
//! nothing about HTTP.

pub mod http;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::recipes::{
    EventDescriptor, OrchestrationEngine, Plan, RecipeError, Snapshot, Step, StepRegistry,
};

/// Wire form of one notification, as delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationPayload {
    /// Serialized snapshot: `{instanceId, value, context, lastEvent}`
    pub state: String,
}

impl OperationPayload {
    pub fn from_snapshot(snapshot: &Snapshot) -> Result<Self, serde_json::Error> {
        Ok(Self {
            state: serde_json::to_string(snapshot)?,
        })
    }
}

/// Synchronous answer to a mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgement {
    pub instance_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed: Option<bool>,
}

/// Decode a serialized, ordered step list
pub fn decode_plan(commands: &str) -> Result<Plan, RecipeError> {
    let value: Value = serde_json::from_str(commands)
        .map_err(|e| RecipeError::validation(format!("commands are not valid JSON: {e}")))?;
    let Value::Array(entries) = value else {
        return Err(RecipeError::validation("commands must be a JSON array of steps"));
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let step: Step = serde_json::from_value(entry)
                .map_err(|e| RecipeError::validation(format!("step {index}: {e}")))?;
            if step.resource.trim().is_empty() {
                return Err(RecipeError::validation(format!(
                    "step {index}: resource must not be empty"
                )));
            }
            Ok(step)
        })
        .collect()
}

/// Decode an event: `{"type": ...}`, a JSON string, or a bare tag
pub fn decode_event(event: &str) -> Result<EventDescriptor, RecipeError> {
    let trimmed = event.trim();
    if trimmed.is_empty() {
        return Err(RecipeError::validation("event must not be empty"));
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::String(tag)) => tag_descriptor(&tag),
        Ok(value @ Value::Object(_)) => {
            let descriptor: EventDescriptor = serde_json::from_value(value)
                .map_err(|e| RecipeError::validation(format!("invalid event object: {e}")))?;
            if descriptor.kind.trim().is_empty() {
                return Err(RecipeError::validation("event type must not be empty"));
            }
            Ok(descriptor)
        }
        Ok(_) => Err(RecipeError::validation(
            "event must be a tag, a JSON string or an object with a type",
        )),
        Err(_) => tag_descriptor(trimmed),
    }
}

/// Decode a plan and validate every step against `registry`
pub fn check_plan(registry: &dyn StepRegistry, commands: &str) -> Result<Plan, RecipeError> {
    let plan = decode_plan(commands)?;
    for (index, step) in plan.iter().enumerate() {
        registry
            .validate(step)
            .map_err(|e| RecipeError::validation(format!("step {index}: {e}")))?;
    }
    Ok(plan)
}

fn tag_descriptor(tag: &str) -> Result<EventDescriptor, RecipeError> {
    let tag = tag.trim();
    if tag.is_empty() || tag.chars().any(char::is_whitespace) {
        return Err(RecipeError::validation(format!("'{tag}' is not a valid event tag")));
    }
    Ok(EventDescriptor::new(tag))
}

/// Translates caller requests into engine and notifier operations
#[derive(Clone)]
pub struct ControlChannel {
    engine: OrchestrationEngine,
    registry: Arc<dyn StepRegistry>,
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("engine", &self.engine)
            .finish()
    }
}

impl ControlChannel {
    pub fn new(engine: OrchestrationEngine, registry: Arc<dyn StepRegistry>) -> Self {
        Self { engine, registry }
    }

    pub fn engine(&self) -> &OrchestrationEngine {
        &self.engine
    }

    /// Decode and validate a plan without submitting it
    pub fn check_plan(&self, commands: &str) -> Result<Plan, RecipeError> {
        check_plan(self.registry.as_ref(), commands)
    }

    /// `createOperation`: replace the running plan; does not wait for completion
    pub async fn create_operation(&self, commands: &str) -> Result<Acknowledgement, RecipeError> {
        info!(bytes = commands.len(), "Received operation");
        let plan = self.check_plan(commands).inspect_err(|e| {
            warn!(error = %e, "Rejected operation");
        })?;
        let step_count = plan.len();

        let instance_id = self.engine.submit_plan(plan).await.inspect_err(|e| {
            warn!(error = %e, "Engine failed to start operation");
        })?;

        Ok(Acknowledgement {
            instance_id,
            step_count: Some(step_count),
            changed: None,
        })
    }

    /// `sendEvent`: route an event to the running instance
    pub async fn send_event(&self, event: &str) -> Result<Acknowledgement, RecipeError> {
        info!(event = %event, "Event received");
        let descriptor = decode_event(event).inspect_err(|e| {
            warn!(error = %e, "Rejected event");
        })?;

        let delivery = self.engine.send_event(descriptor).await.inspect_err(|e| {
            warn!(error = %e, "Engine refused event");
        })?;

        Ok(Acknowledgement {
            instance_id: delivery.instance_id,
            step_count: None,
            changed: Some(delivery.changed),
        })
    }

    /// Snapshot of the running instance, if any
    pub async fn current_operation(&self) -> Result<Option<Snapshot>, RecipeError> {
        self.engine.current_snapshot().await
    }

    /// `operation` subscription: every change published from now on
    pub fn operation(&self) -> impl Stream<Item = OperationPayload> + Send + 'static {
        let subscription = self.engine.subscribe();
        info!(subscriber = subscription.id(), "Operation subscription opened");

        subscription.filter_map(|notification| async move {
            match notification.state_json() {
                Ok(state) => Some(OperationPayload { state }),
                Err(e) => {
                    warn!(
                        sequence = notification.sequence,
                        error = %e,
                        "Dropping unserializable notification"
                    );
                    None
                }
            }
        })
    }
}
