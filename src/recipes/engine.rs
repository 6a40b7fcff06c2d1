//! Orchestration engine
//!
//! The engine is a single-owner task holding the one live recipe instance.
//! Plan submissions, external events and step completions all arrive as
//! messages and are processed one at a time, so replacing the instance can
//! never interleave with an event being applied to it.
//!
//! Steps run in their own tasks. Each completion is tagged with the id of the
//! instance that started it; completions for a replaced instance are dropped.

use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::recipes::errors::{RecipeError, StepError};
use crate::recipes::machine::{
    transition, Effect, Machine, MachineEvent, Snapshot, StateValue, TransitionObserver,
    TransitionReport,
};
use crate::recipes::notifier::{ChangeNotifier, Subscription};
use crate::recipes::registry::{StepContext, StepRegistry};
use crate::recipes::types::{EventDescriptor, Plan, StepOutput};

/// Runtime settings for the engine task
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Site root handed to every step
    pub root: PathBuf,
    /// Capacity of the command queue
    pub command_buffer: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            command_buffer: 64,
        }
    }
}

/// Outcome of routing an external event to the live instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDelivery {
    pub instance_id: Uuid,
    /// False when the event was ignored by the current state
    pub changed: bool,
}

enum EngineCommand {
    SubmitPlan {
        plan: Plan,
        response: oneshot::Sender<Result<Uuid, RecipeError>>,
    },
    SendEvent {
        event: EventDescriptor,
        response: oneshot::Sender<Result<EventDelivery, RecipeError>>,
    },
    CurrentSnapshot {
        response: oneshot::Sender<Option<Snapshot>>,
    },
}

struct StepCompletion {
    instance_id: Uuid,
    index: usize,
    result: Result<StepOutput, StepError>,
}

struct Instance {
    id: Uuid,
    machine: Machine,
}

/// Logs every attempted transition and every plan outcome
#[derive(Debug, Default)]
pub struct TransitionLogger;

impl TransitionObserver for TransitionLogger {
    fn on_transition(&self, report: &TransitionReport) {
        let snapshot = &report.snapshot;
        debug!(
            instance_id = %snapshot.instance_id,
            value = %snapshot.value,
            current_step = snapshot.context.current_step,
            event = ?snapshot.last_event.as_ref().map(|event| event.kind.as_str()),
            changed = report.changed,
            "Recipe transition"
        );

        if !report.changed {
            return;
        }
        match snapshot.value {
            StateValue::Completed => info!(
                instance_id = %snapshot.instance_id,
                steps = snapshot.context.current_step,
                "Recipe plan completed"
            ),
            StateValue::Failed => {
                if let Some(err) = snapshot.failure() {
                    error!(instance_id = %snapshot.instance_id, error = %err, "Recipe plan failed");
                }
            }
            StateValue::WaitingForEvent => info!(
                instance_id = %snapshot.instance_id,
                current_step = snapshot.context.current_step,
                "Recipe waiting for confirmation"
            ),
            _ => {}
        }
    }
}

/// Configures and starts an [`OrchestrationEngine`]
pub struct EngineBuilder {
    registry: Arc<dyn StepRegistry>,
    settings: EngineSettings,
    observers: Vec<Arc<dyn TransitionObserver>>,
}

impl EngineBuilder {
    pub fn new(registry: Arc<dyn StepRegistry>) -> Self {
        Self {
            registry,
            settings: EngineSettings::default(),
            observers: vec![Arc::new(TransitionLogger)],
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Add an observer called after every attempted transition
    pub fn with_observer(mut self, observer: Arc<dyn TransitionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Spawn the engine task on the current tokio runtime
    pub fn spawn(self) -> OrchestrationEngine {
        let (command_tx, command_rx) = mpsc::channel(self.settings.command_buffer.max(1));
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        let notifier = ChangeNotifier::new();
        let mut observers = self.observers;
        observers.push(Arc::new(notifier.clone()));

        let actor = EngineActor {
            registry: self.registry,
            observers,
            root: self.settings.root,
            instance: None,
            completions: completion_tx,
        };
        tokio::spawn(actor.run(command_rx, completion_rx));

        OrchestrationEngine {
            commands: command_tx,
            notifier,
        }
    }
}

/// Handle to the engine task; cheap to clone
#[derive(Clone)]
pub struct OrchestrationEngine {
    commands: mpsc::Sender<EngineCommand>,
    notifier: ChangeNotifier,
}

impl std::fmt::Debug for OrchestrationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationEngine")
            .field("running", &!self.commands.is_closed())
            .field("notifier", &self.notifier)
            .finish()
    }
}

impl OrchestrationEngine {
    /// Start an engine with default settings
    pub fn spawn(registry: Arc<dyn StepRegistry>) -> Self {
        EngineBuilder::new(registry).spawn()
    }

    /// Replace any live instance with a new one for `plan` and start it
    ///
    /// Returns once the first automatic transition has been applied and
    /// published; the plan itself keeps running in the background.
    pub async fn submit_plan(&self, plan: Plan) -> Result<Uuid, RecipeError> {
        self.request(|response| EngineCommand::SubmitPlan { plan, response })
            .await?
    }

    /// Route an external event to the live instance
    pub async fn send_event(&self, event: EventDescriptor) -> Result<EventDelivery, RecipeError> {
        self.request(|response| EngineCommand::SendEvent { event, response })
            .await?
    }

    /// Snapshot of the live instance, if there is one
    pub async fn current_snapshot(&self) -> Result<Option<Snapshot>, RecipeError> {
        self.request(|response| EngineCommand::CurrentSnapshot { response })
            .await
    }

    /// Observe every published change from now on
    pub fn subscribe(&self) -> Subscription {
        self.notifier.subscribe()
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> Result<T, RecipeError> {
        let (response, receiver) = oneshot::channel();
        self.commands
            .send(command(response))
            .await
            .map_err(|_| RecipeError::EngineStopped)?;
        receiver.await.map_err(|_| RecipeError::EngineStopped)
    }
}

struct EngineActor {
    registry: Arc<dyn StepRegistry>,
    observers: Vec<Arc<dyn TransitionObserver>>,
    root: PathBuf,
    instance: Option<Instance>,
    completions: mpsc::UnboundedSender<StepCompletion>,
}

impl EngineActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<EngineCommand>,
        mut completions: mpsc::UnboundedReceiver<StepCompletion>,
    ) {
        info!(root = %self.root.display(), "Orchestration engine started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(completion) = completions.recv() => self.handle_completion(completion),
            }
        }

        info!("Orchestration engine stopped");
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::SubmitPlan { plan, response } => {
                let _ = response.send(self.submit_plan(plan));
            }
            EngineCommand::SendEvent { event, response } => {
                let _ = response.send(self.send_event(event));
            }
            EngineCommand::CurrentSnapshot { response } => {
                let snapshot = self
                    .instance
                    .as_ref()
                    .map(|instance| instance.machine.snapshot(instance.id));
                let _ = response.send(snapshot);
            }
        }
    }

    fn submit_plan(&mut self, plan: Plan) -> Result<Uuid, RecipeError> {
        let machine = self.build_machine(plan).inspect_err(|e| {
            error!(error = %e, "Recipe instance failed to start");
        })?;

        let id = Uuid::new_v4();
        if let Some(previous) = self.instance.replace(Instance { id, machine }) {
            info!(
                previous = %previous.id,
                previous_state = %previous.machine.value(),
                replacement = %id,
                "Discarding active recipe instance"
            );
        }

        info!(instance_id = %id, "Starting recipe instance");
        self.dispatch(MachineEvent::Start);
        Ok(id)
    }

    fn build_machine(&self, plan: Plan) -> Result<Machine, RecipeError> {
        let kinds = plan
            .iter()
            .enumerate()
            .map(|(index, step)| {
                self.registry
                    .kind(step)
                    .map_err(|e| RecipeError::startup(format!("step {index}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Machine::new(plan, kinds)
    }

    fn send_event(&mut self, event: EventDescriptor) -> Result<EventDelivery, RecipeError> {
        let instance_id = match &self.instance {
            Some(instance) => instance.id,
            None => {
                warn!(event = %event.kind, "Event received with no active recipe instance");
                return Err(RecipeError::NoActiveInstance);
            }
        };

        let changed = self.dispatch(MachineEvent::External(event));
        Ok(EventDelivery {
            instance_id,
            changed,
        })
    }

    fn handle_completion(&mut self, completion: StepCompletion) {
        let is_current = self
            .instance
            .as_ref()
            .is_some_and(|instance| instance.id == completion.instance_id);
        if !is_current {
            debug!(
                instance_id = %completion.instance_id,
                index = completion.index,
                "Discarding step result from superseded instance"
            );
            return;
        }

        let event = match completion.result {
            Ok(output) => MachineEvent::StepSucceeded {
                index: completion.index,
                output,
            },
            Err(e) => {
                warn!(
                    instance_id = %completion.instance_id,
                    index = completion.index,
                    error = %e,
                    "Recipe step failed"
                );
                MachineEvent::StepFailed {
                    index: completion.index,
                    message: e.message,
                }
            }
        };
        self.dispatch(event);
    }

    /// Apply `event` and every automatic follow-up it produces
    ///
    /// Returns whether the first transition changed the machine.
    fn dispatch(&mut self, event: MachineEvent) -> bool {
        let mut pending = VecDeque::from([event]);
        let mut first_changed = None;

        while let Some(event) = pending.pop_front() {
            let Some(instance) = self.instance.as_mut() else {
                break;
            };

            let outcome = transition(&instance.machine, &event);
            instance.machine = outcome.machine;
            let report = TransitionReport {
                snapshot: instance.machine.snapshot(instance.id),
                changed: outcome.changed,
            };
            for observer in &self.observers {
                observer.on_transition(&report);
            }
            first_changed.get_or_insert(outcome.changed);

            for effect in outcome.effects {
                match effect {
                    Effect::Advance => pending.push_back(MachineEvent::Advance),
                    Effect::RunStep { index } => self.spawn_step(index),
                }
            }
        }

        first_changed.unwrap_or(false)
    }

    fn spawn_step(&self, index: usize) {
        let Some(instance) = self.instance.as_ref() else {
            return;
        };
        let Some(step) = instance.machine.context().steps.get(index).cloned() else {
            return;
        };

        let instance_id = instance.id;
        let registry = Arc::clone(&self.registry);
        let completions = self.completions.clone();
        let ctx = StepContext {
            root: self.root.clone(),
            index,
        };

        debug!(instance_id = %instance_id, index, resource = %step.resource, "Running recipe step");
        tokio::spawn(async move {
            let execution = tokio::spawn(async move { registry.execute(&step, &ctx).await });
            let result = match execution.await {
                Ok(result) => result,
                Err(join_error) => Err(StepError::new(format!("step task aborted: {join_error}"))),
            };
            let _ = completions.send(StepCompletion {
                instance_id,
                index,
                result,
            });
        });
    }
}
