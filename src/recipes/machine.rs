//! Recipe state machine
//!
//! The machine is an explicit tagged union (`StateValue`) plus a context, and
//! [`transition`] is a pure function from `(machine, event)` to the next
//! machine, a change flag, and the effects the engine must carry out. No I/O
//! happens here: running a step is an [`Effect`] the engine performs and
//! reports back as a `StepSucceeded` / `StepFailed` event.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::recipes::errors::RecipeError;
use crate::recipes::types::{EventDescriptor, Plan, StepKind, StepOutput};

/// Top-level machine state tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StateValue {
    Init,
    RunningStep,
    WaitingForEvent,
    Completed,
    Failed,
}

impl StateValue {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StateValue::Completed | StateValue::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StateValue::Init => "init",
            StateValue::RunningStep => "runningStep",
            StateValue::WaitingForEvent => "waitingForEvent",
            StateValue::Completed => "completed",
            StateValue::Failed => "failed",
        }
    }
}

impl std::fmt::Display for StateValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Details of the step that ended the plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepFailure {
    pub index: usize,
    pub resource: String,
    pub message: String,
}

impl From<&StepFailure> for RecipeError {
    fn from(failure: &StepFailure) -> Self {
        RecipeError::StepExecution {
            index: failure.index,
            resource: failure.resource.clone(),
            message: failure.message.clone(),
        }
    }
}

/// Extended machine state shared by every tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineContext {
    pub steps: Plan,
    pub current_step: usize,
    /// Index of the step executing right now; absent between steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_step: Option<usize>,
    #[serde(default)]
    pub results: Vec<StepOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,
}

impl MachineContext {
    pub fn new(steps: Plan) -> Self {
        Self {
            steps,
            current_step: 0,
            active_step: None,
            results: Vec::new(),
            failure: None,
        }
    }
}

/// Inputs to the transition function
#[derive(Debug, Clone, PartialEq)]
pub enum MachineEvent {
    /// Seeds the context and begins automatic execution
    Start,
    /// Caller-supplied event; never interpreted as an internal one
    External(EventDescriptor),
    StepSucceeded { index: usize, output: StepOutput },
    StepFailed { index: usize, message: String },
    /// Moves past a finished step
    Advance,
}

impl MachineEvent {
    /// Descriptor recorded as the machine's `lastEvent`
    pub fn descriptor(&self) -> EventDescriptor {
        match self {
            MachineEvent::Start => EventDescriptor::new("START"),
            MachineEvent::External(descriptor) => descriptor.clone(),
            MachineEvent::StepSucceeded { index, .. } => {
                EventDescriptor::new("STEP_SUCCEEDED").with_field("index", *index)
            }
            MachineEvent::StepFailed { index, message } => EventDescriptor::new("STEP_FAILED")
                .with_field("index", *index)
                .with_field("message", message.as_str()),
            MachineEvent::Advance => EventDescriptor::new("ADVANCE"),
        }
    }
}

/// Work the engine must perform after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    RunStep { index: usize },
    Advance,
}

/// One live machine bound to one plan
#[derive(Debug, Clone, PartialEq)]
pub struct Machine {
    value: StateValue,
    context: MachineContext,
    last_event: Option<EventDescriptor>,
    kinds: Vec<StepKind>,
}

impl Machine {
    /// Build a machine in `init` for `plan`, with one resolved kind per step
    pub fn new(plan: Plan, kinds: Vec<StepKind>) -> Result<Self, RecipeError> {
        if plan.len() != kinds.len() {
            return Err(RecipeError::startup(format!(
                "plan has {} steps but {} step kinds were resolved",
                plan.len(),
                kinds.len()
            )));
        }
        Ok(Self {
            value: StateValue::Init,
            context: MachineContext::new(plan),
            last_event: None,
            kinds,
        })
    }

    pub fn value(&self) -> StateValue {
        self.value
    }

    pub fn context(&self) -> &MachineContext {
        &self.context
    }

    pub fn last_event(&self) -> Option<&EventDescriptor> {
        self.last_event.as_ref()
    }

    /// Event tag that resumes the machine, when it is waiting for one
    pub fn expected_event(&self) -> Option<&str> {
        if self.value != StateValue::WaitingForEvent {
            return None;
        }
        self.kinds
            .get(self.context.current_step)
            .and_then(StepKind::expected_event)
    }

    pub fn snapshot(&self, instance_id: Uuid) -> Snapshot {
        Snapshot {
            instance_id,
            value: self.value,
            context: self.context.clone(),
            last_event: self.last_event.clone(),
        }
    }

    /// Begin the step at `current_step`, or finish the plan
    fn enter_current_step(&mut self, effects: &mut Vec<Effect>) {
        match self.kinds.get(self.context.current_step) {
            None => {
                self.value = StateValue::Completed;
                self.context.active_step = None;
            }
            Some(StepKind::NeedsConfirmation { .. }) => {
                self.value = StateValue::WaitingForEvent;
            }
            Some(StepKind::Automatic) => self.run_current_step(effects),
        }
    }

    fn run_current_step(&mut self, effects: &mut Vec<Effect>) {
        let index = self.context.current_step;
        self.value = StateValue::RunningStep;
        self.context.active_step = Some(index);
        effects.push(Effect::RunStep { index });
    }
}

/// Result of one attempted transition
#[derive(Debug, Clone)]
pub struct Transition {
    pub machine: Machine,
    /// True when the state tag or the context differs from before
    pub changed: bool,
    pub effects: Vec<Effect>,
}

/// Pure transition function
///
/// Events with no transition defined for the current state yield the identity
/// transition: the same machine, `changed == false`, no effects.
pub fn transition(machine: &Machine, event: &MachineEvent) -> Transition {
    let mut next = machine.clone();
    let mut effects = Vec::new();
    let active = machine.context.active_step;

    let handled = match (machine.value, event) {
        (StateValue::Init, MachineEvent::Start) => {
            next.enter_current_step(&mut effects);
            true
        }
        (StateValue::RunningStep, MachineEvent::StepSucceeded { index, output })
            if active == Some(*index) =>
        {
            next.context.results.push(output.clone());
            next.context.current_step = index + 1;
            next.context.active_step = None;
            effects.push(Effect::Advance);
            true
        }
        (StateValue::RunningStep, MachineEvent::StepFailed { index, message })
            if active == Some(*index) =>
        {
            next.value = StateValue::Failed;
            next.context.active_step = None;
            next.context.failure = Some(StepFailure {
                index: *index,
                resource: machine.context.steps[*index].resource.clone(),
                message: message.clone(),
            });
            true
        }
        (StateValue::RunningStep, MachineEvent::Advance) if active.is_none() => {
            next.enter_current_step(&mut effects);
            true
        }
        (StateValue::WaitingForEvent, MachineEvent::External(descriptor))
            if machine.expected_event() == Some(descriptor.kind.as_str()) =>
        {
            next.run_current_step(&mut effects);
            true
        }
        _ => false,
    };

    if !handled {
        return Transition {
            machine: machine.clone(),
            changed: false,
            effects,
        };
    }

    next.last_event = Some(event.descriptor());
    let changed = next.value != machine.value || next.context != machine.context;
    Transition {
        machine: next,
        changed,
        effects,
    }
}

/// Serializable view of a machine, as broadcast to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub instance_id: Uuid,
    pub value: StateValue,
    pub context: MachineContext,
    pub last_event: Option<EventDescriptor>,
}

impl Snapshot {
    pub fn failure(&self) -> Option<RecipeError> {
        self.context.failure.as_ref().map(RecipeError::from)
    }
}

/// What the engine reports after every attempted transition
#[derive(Debug, Clone)]
pub struct TransitionReport {
    pub snapshot: Snapshot,
    pub changed: bool,
}

/// Synchronous hook invoked inside the engine's exclusive section
pub trait TransitionObserver: Send + Sync {
    fn on_transition(&self, report: &TransitionReport);
}
