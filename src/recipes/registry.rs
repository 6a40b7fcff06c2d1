// Step registry seam and the built-in resources

use async_trait::async_trait;
use serde_json::json;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

use crate::recipes::errors::{RegistryError, StepError};
use crate::recipes::types::{Step, StepKind, StepOutput};

/// Event tag a `Confirm` step waits for unless the step names another
pub const DEFAULT_CONFIRM_EVENT: &str = "CONTINUE";

/// Execution environment handed to every step
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Site root resolved at startup; opaque to the engine
    pub root: PathBuf,
    /// Position of the step within its plan
    pub index: usize,
}

/// Defines what steps exist, how they are driven, and how they run
#[async_trait]
pub trait StepRegistry: Send + Sync {
    /// Check that a decoded step is well formed for its resource
    fn validate(&self, step: &Step) -> Result<(), RegistryError>;

    /// Decide whether the step runs automatically or needs confirmation
    fn kind(&self, step: &Step) -> Result<StepKind, RegistryError>;

    /// Run the step
    async fn execute(&self, step: &Step, ctx: &StepContext) -> Result<StepOutput, StepError>;
}

/// Resources shipped with the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuiltinResource {
    Message,
    Confirm,
    File,
}

impl BuiltinResource {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "Message" => Some(BuiltinResource::Message),
            "Confirm" => Some(BuiltinResource::Confirm),
            "File" => Some(BuiltinResource::File),
            _ => None,
        }
    }
}

/// Registry backing the `recipes` binary
#[derive(Debug, Default, Clone)]
pub struct BuiltinRegistry;

impl BuiltinRegistry {
    pub fn new() -> Self {
        Self
    }

    fn resource(&self, step: &Step) -> Result<BuiltinResource, RegistryError> {
        BuiltinResource::parse(&step.resource)
            .ok_or_else(|| RegistryError::UnknownResource(step.resource.clone()))
    }

    fn require_str<'a>(step: &'a Step, key: &str) -> Result<&'a str, RegistryError> {
        step.param_str(key).ok_or_else(|| RegistryError::InvalidStep {
            resource: step.resource.clone(),
            reason: format!("missing string parameter '{key}'"),
        })
    }

    async fn write_file(&self, step: &Step, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let path = step
            .param_str("path")
            .ok_or_else(|| StepError::new("File step has no path"))?;
        let content = step
            .param_str("content")
            .ok_or_else(|| StepError::new("File step has no content"))?;
        let target = resolve_within_root(&ctx.root, path)?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content).await?;

        info!(path = %target.display(), bytes = content.len(), "Wrote recipe file");
        Ok(StepOutput::new("File", format!("Wrote {path}"))
            .with_data(json!({ "path": path, "bytes": content.len() })))
    }
}

#[async_trait]
impl StepRegistry for BuiltinRegistry {
    fn validate(&self, step: &Step) -> Result<(), RegistryError> {
        match self.resource(step)? {
            BuiltinResource::Message => {
                Self::require_str(step, "message")?;
            }
            BuiltinResource::Confirm => {
                if step.params.contains_key("event") {
                    Self::require_str(step, "event")?;
                }
            }
            BuiltinResource::File => {
                let path = Self::require_str(step, "path")?;
                Self::require_str(step, "content")?;
                if !is_relative_inside(Path::new(path)) {
                    return Err(RegistryError::InvalidStep {
                        resource: step.resource.clone(),
                        reason: format!("path '{path}' must stay inside the site root"),
                    });
                }
            }
        }
        Ok(())
    }

    fn kind(&self, step: &Step) -> Result<StepKind, RegistryError> {
        Ok(match self.resource(step)? {
            BuiltinResource::Confirm => {
                StepKind::confirm_on(step.param_str("event").unwrap_or(DEFAULT_CONFIRM_EVENT))
            }
            BuiltinResource::Message | BuiltinResource::File => StepKind::Automatic,
        })
    }

    async fn execute(&self, step: &Step, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let resource = self
            .resource(step)
            .map_err(|e| StepError::new(e.to_string()))?;
        debug!(index = ctx.index, resource = %step.resource, "Executing builtin step");

        match resource {
            BuiltinResource::Message => {
                let message = step.param_str("message").unwrap_or_default();
                info!(index = ctx.index, "{}", message);
                Ok(StepOutput::new("Message", message))
            }
            BuiltinResource::Confirm => Ok(StepOutput::new("Confirm", "Confirmed")),
            BuiltinResource::File => self.write_file(step, ctx).await,
        }
    }
}

fn is_relative_inside(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

fn resolve_within_root(root: &Path, relative: &str) -> Result<PathBuf, StepError> {
    let relative = Path::new(relative);
    if !is_relative_inside(relative) {
        return Err(StepError::new(format!(
            "path '{}' escapes the site root",
            relative.display()
        )));
    }
    Ok(root.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file_step(path: &str) -> Step {
        Step::new("File")
            .with_param("path", path)
            .with_param("content", "hello recipes\n")
    }

    #[test]
    fn test_unknown_resource_is_rejected() {
        let registry = BuiltinRegistry::new();
        let step = Step::new("NPMPackage").with_param("name", "left-pad");

        assert_eq!(
            registry.validate(&step),
            Err(RegistryError::UnknownResource("NPMPackage".to_string()))
        );
        assert!(registry.kind(&step).is_err());
    }

    #[test]
    fn test_confirm_kind_uses_default_or_named_event() {
        let registry = BuiltinRegistry::new();

        let plain = Step::new("Confirm");
        assert_eq!(
            registry.kind(&plain).unwrap(),
            StepKind::confirm_on(DEFAULT_CONFIRM_EVENT)
        );

        let named = Step::new("Confirm").with_param("event", "APPROVE");
        assert_eq!(registry.kind(&named).unwrap(), StepKind::confirm_on("APPROVE"));
    }

    #[test]
    fn test_file_step_validation() {
        let registry = BuiltinRegistry::new();

        assert!(registry.validate(&file_step("src/pages/index.js")).is_ok());
        assert!(registry.validate(&file_step("../outside.txt")).is_err());
        assert!(registry.validate(&file_step("/etc/passwd")).is_err());
        assert!(registry.validate(&Step::new("File").with_param("path", "a.txt")).is_err());
    }

    #[test]
    fn test_message_requires_text() {
        let registry = BuiltinRegistry::new();
        assert!(registry.validate(&Step::new("Message")).is_err());
        assert!(registry
            .validate(&Step::new("Message").with_param("message", "hi"))
            .is_ok());
    }

    #[tokio::test]
    async fn test_file_step_writes_under_root() {
        let dir = TempDir::new().unwrap();
        let registry = BuiltinRegistry::new();
        let ctx = StepContext {
            root: dir.path().to_path_buf(),
            index: 0,
        };

        let output = registry
            .execute(&file_step("docs/notes.md"), &ctx)
            .await
            .unwrap();

        assert_eq!(output.resource, "File");
        let written = std::fs::read_to_string(dir.path().join("docs/notes.md")).unwrap();
        assert_eq!(written, "hello recipes\n");
    }

    #[tokio::test]
    async fn test_file_step_refuses_escape_at_execution() {
        let dir = TempDir::new().unwrap();
        let registry = BuiltinRegistry::new();
        let ctx = StepContext {
            root: dir.path().to_path_buf(),
            index: 3,
        };

        let err = registry
            .execute(&file_step("../escape.txt"), &ctx)
            .await
            .unwrap_err();
        assert!(err.message.contains("escapes the site root"));
    }
}
