use anyhow::{Context, Result};
use std::path::PathBuf;

use super::Command;
use crate::control::check_plan;
use crate::recipes::{BuiltinRegistry, Plan, StepKind, StepRegistry};

pub struct CheckCommand {
    pub plan: PathBuf,
}

impl CheckCommand {
    pub fn new(plan: PathBuf) -> Self {
        Self { plan }
    }

    /// One line per step, numbered from 1
    pub fn describe(registry: &dyn StepRegistry, plan: &Plan) -> Result<Vec<String>> {
        plan.iter()
            .enumerate()
            .map(|(index, step)| {
                let kind = registry.kind(step)?;
                let mode = match &kind {
                    StepKind::Automatic => "automatic".to_string(),
                    StepKind::NeedsConfirmation { event } => format!("waits for {event}"),
                };
                let label = step.describe.as_deref().unwrap_or(&step.resource);
                Ok(format!("  {}. {} ({})", index + 1, label, mode))
            })
            .collect()
    }
}

impl Command for CheckCommand {
    async fn execute(&self) -> Result<()> {
        let commands = tokio::fs::read_to_string(&self.plan)
            .await
            .with_context(|| format!("Failed to read plan {}", self.plan.display()))?;

        let registry = BuiltinRegistry::new();
        let plan = check_plan(&registry, &commands)?;
        let lines = Self::describe(&registry, &plan)?;

        println!("✅ Plan is valid: {} steps", plan.len());
        for line in lines {
            println!("{line}");
        }
        Ok(())
    }
}
