// Mock registry for engine tests - no side effects

use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::Notify;

use crate::recipes::errors::{RegistryError, StepError};
use crate::recipes::registry::{StepContext, StepRegistry};
use crate::recipes::types::{Step, StepKind, StepOutput};

/// Registry whose behaviour is chosen by the step's resource name:
///
/// - `auto`: automatic, succeeds
/// - `confirm`: waits for the `confirm` event, then succeeds
/// - `fail`: automatic, fails
/// - `hold`: automatic, blocks until [`MockRegistry::release`] is called
/// - `broken`: passes validation but cannot be classified
#[derive(Debug, Default)]
pub struct MockRegistry {
    executed: Mutex<Vec<(usize, String)>>,
    gate: Notify,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn get_executed_steps(&self) -> Vec<(usize, String)> {
        self.executed.lock().unwrap().clone()
    }
}

pub fn plan(resources: &[&str]) -> Vec<Step> {
    resources.iter().map(|resource| Step::new(*resource)).collect()
}

#[async_trait]
impl StepRegistry for MockRegistry {
    fn validate(&self, step: &Step) -> Result<(), RegistryError> {
        match step.resource.as_str() {
            "auto" | "confirm" | "fail" | "hold" | "broken" => Ok(()),
            other => Err(RegistryError::UnknownResource(other.to_string())),
        }
    }

    fn kind(&self, step: &Step) -> Result<StepKind, RegistryError> {
        match step.resource.as_str() {
            "confirm" => Ok(StepKind::confirm_on("confirm")),
            "auto" | "fail" | "hold" => Ok(StepKind::Automatic),
            other => Err(RegistryError::UnknownResource(other.to_string())),
        }
    }

    async fn execute(&self, step: &Step, ctx: &StepContext) -> Result<StepOutput, StepError> {
        self.executed
            .lock()
            .unwrap()
            .push((ctx.index, step.resource.clone()));

        match step.resource.as_str() {
            "fail" => Err(StepError::new("mock failure")),
            "hold" => {
                self.gate.notified().await;
                Ok(StepOutput::new("hold", "released"))
            }
            resource => Ok(StepOutput::new(resource, format!("ran step {}", ctx.index))),
        }
    }
}
