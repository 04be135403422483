//! Mission engine.
//!
//! The engine turns a [`MissionDefinition`] into a [`MissionRun`] and walks
//! it phase by phase, step by step, strictly in order. Each step is handed
//! to the capability registered under its `"<agentId>.<action>"` key. The
//! engine owns every status transition, log entry, progress update and
//! event; capabilities only report results.
//!
//! Failure is never absorbed: the first failed step fails its phase and the
//! mission, and no later phase starts. A step that needs a human parks the
//! mission in `waiting-human` until [`MissionEngine::resume_mission`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use events::{MissionEvent, MissionEventBus, MissionEventPayload, Subscription};
use futures::FutureExt;
use mission_core::{
    CapabilityId, LogEntry, MissionDefinition, MissionRun, MissionStatus, PhaseStatus, StepRun,
    StepStatus,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::capability::{Capability, CapabilityContext, CapabilityRegistry, CapabilityResult};
use crate::config::EngineConfig;
use crate::error::{OrchestratorError, Result};
use crate::resources::ActiveMissions;
use crate::state_machine::{MissionStateMachine, PhaseStateMachine, StepStateMachine};
use crate::store::MissionStore;

/// Options for [`MissionEngine::run_mission`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Use this id instead of generating one.
    pub mission_id: Option<Uuid>,
}

impl RunOptions {
    pub fn with_mission_id(mission_id: Uuid) -> Self {
        Self {
            mission_id: Some(mission_id),
        }
    }
}

/// A human decision on a suspended step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    pub approved: bool,
    /// Replaces the step output when approved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Approval {
    pub fn approve() -> Self {
        Self {
            approved: true,
            ..Default::default()
        }
    }

    pub fn reject(note: impl Into<String>) -> Self {
        Self {
            approved: false,
            payload: None,
            note: Some(note.into()),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    /// The step completed (or was skipped); move on.
    Advanced,
    Failed,
    Suspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhaseOutcome {
    Completed,
    Failed,
    Suspended,
    /// The mission left `running` from outside (paused, blocked, cancelled).
    Interrupted,
}

pub struct MissionEngine {
    config: EngineConfig,
    store: Arc<MissionStore>,
    bus: MissionEventBus,
    registry: CapabilityRegistry,
    active: ActiveMissions,
    /// Serializes check-then-set on mission status.
    transitions: Mutex<()>,
}

impl MissionEngine {
    pub fn new(store: Arc<MissionStore>, bus: MissionEventBus) -> Self {
        Self::with_config(store, bus, EngineConfig::default())
    }

    pub fn with_config(store: Arc<MissionStore>, bus: MissionEventBus, config: EngineConfig) -> Self {
        Self {
            config,
            store,
            bus,
            registry: CapabilityRegistry::new(),
            active: ActiveMissions::new(),
            transitions: Mutex::new(()),
        }
    }

    /// Engine with its own store and a bus sized from `config`.
    pub fn standalone(config: EngineConfig) -> Self {
        let bus = MissionEventBus::with_capacity(config.event_channel_capacity);
        Self::with_config(Arc::new(MissionStore::new()), bus, config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<MissionStore> {
        &self.store
    }

    pub fn bus(&self) -> &MissionEventBus {
        &self.bus
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&MissionEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(listener)
    }

    /// Register a capability under its id. A later registration with the
    /// same id replaces the earlier one, which is returned.
    pub fn register_capability(&self, capability: Arc<dyn Capability>) -> Option<Arc<dyn Capability>> {
        self.registry.register(capability)
    }

    pub fn has_capability(&self, id: &CapabilityId) -> bool {
        self.registry.contains(id)
    }

    pub fn capability_keys(&self) -> Vec<String> {
        self.registry.keys()
    }

    pub fn missing_capabilities(&self, definition: &MissionDefinition) -> Vec<CapabilityId> {
        self.registry.missing(definition)
    }

    pub fn get_mission(&self, mission_id: Uuid) -> Option<MissionRun> {
        self.store.get_mission(mission_id)
    }

    /// Create a run for `definition` and execute it.
    ///
    /// Resolves once the mission is completed, failed or suspended; step
    /// failures are reported through the run, not as `Err`. Errors are
    /// reserved for runs that could not be started.
    pub async fn run_mission(&self, definition: MissionDefinition, options: RunOptions) -> Result<Uuid> {
        if self.config.strict_capabilities {
            definition.validate()?;
            let missing = self.registry.missing(&definition);
            if !missing.is_empty() {
                return Err(OrchestratorError::UnknownCapabilities(
                    missing.iter().map(ToString::to_string).collect(),
                ));
            }
        }

        let mission_id = options.mission_id.unwrap_or_else(Uuid::new_v4);
        let mut guard = self.active.acquire(mission_id)?;

        let run = MissionRun::with_id(mission_id, definition);
        if !self.store.add_mission(run.clone()) {
            guard.mark_settled();
            return Err(OrchestratorError::MissionExists(mission_id));
        }

        info!(
            mission_id = %mission_id,
            objective = %run.definition.objective,
            phases = run.phases.len(),
            steps = run.total_steps(),
            "Mission created"
        );
        let objective = run.definition.objective.clone();
        self.bus.emit(
            mission_id,
            MissionEventPayload::Created {
                mission: Box::new(run),
            },
        );

        self.transition_mission(mission_id, MissionStatus::Running)?;
        self.log(LogEntry::info(mission_id, format!("Mission started: {objective}")));

        self.drive(mission_id).await?;
        guard.mark_settled();
        Ok(mission_id)
    }

    /// Apply a human decision to a suspended step and, if approved, carry on
    /// with the rest of the mission.
    pub async fn resume_mission(
        &self,
        mission_id: Uuid,
        step_id: Uuid,
        approval: Approval,
    ) -> Result<MissionStatus> {
        let mut guard = self.active.acquire(mission_id)?;

        let run = self
            .store
            .get_mission(mission_id)
            .ok_or(OrchestratorError::MissionNotFound(mission_id))?;
        let mut step = run
            .step(step_id)
            .cloned()
            .ok_or(OrchestratorError::StepNotFound {
                mission_id,
                step_id,
            })?;
        if step.status != StepStatus::WaitingHuman {
            return Err(OrchestratorError::StepNotAwaitingApproval(step_id));
        }
        if run.status != MissionStatus::WaitingHuman {
            let target = if approval.approved {
                MissionStatus::Running
            } else {
                MissionStatus::Failed
            };
            return Err(OrchestratorError::invalid_transition(
                "mission", run.status, target,
            ));
        }

        let title = step.definition.display_title();
        let agent = step.agent_id().to_string();
        let phase_id = step.phase_id;

        if approval.approved {
            StepStateMachine::validate_transition(&step.status, &StepStatus::Completed)?;
            step.complete(approval.payload);
            self.save_step(mission_id, step);

            let mut message = format!("Step approved: {title}");
            if let Some(note) = approval.note {
                message.push_str(&format!(" ({note})"));
            }
            self.log(LogEntry::info(mission_id, message).for_step(step_id, agent));
            info!(mission_id = %mission_id, step_id = %step_id, "Step approved, resuming mission");

            self.transition_phase(mission_id, phase_id, PhaseStatus::Running)?;
            self.transition_mission(mission_id, MissionStatus::Running)?;
            self.refresh_progress(mission_id);

            let status = self.drive(mission_id).await?;
            guard.mark_settled();
            Ok(status)
        } else {
            let reason = approval
                .note
                .unwrap_or_else(|| "no reason given".to_string());
            let message = format!("Approval rejected: {reason}");
            StepStateMachine::validate_transition(&step.status, &StepStatus::Failed)?;
            step.fail(message.clone(), None);
            self.save_step(mission_id, step);

            self.log(
                LogEntry::error(mission_id, format!("Step {title} failed: {message}"))
                    .for_step(step_id, agent),
            );
            warn!(mission_id = %mission_id, step_id = %step_id, reason = %reason, "Step rejected");

            self.transition_phase(mission_id, phase_id, PhaseStatus::Failed)?;
            self.transition_mission(mission_id, MissionStatus::Failed)?;
            guard.mark_settled();
            Ok(MissionStatus::Failed)
        }
    }

    /// Continue a paused or blocked mission from its next pending step.
    pub async fn continue_mission(&self, mission_id: Uuid) -> Result<MissionStatus> {
        let mut guard = self.active.acquire(mission_id)?;

        let status = self
            .store
            .mission_status(mission_id)
            .ok_or(OrchestratorError::MissionNotFound(mission_id))?;
        if !matches!(status, MissionStatus::Paused | MissionStatus::Blocked) {
            return Err(OrchestratorError::invalid_transition(
                "mission",
                status,
                MissionStatus::Running,
            ));
        }

        self.transition_mission(mission_id, MissionStatus::Running)?;
        self.log(LogEntry::info(mission_id, "Mission continued"));

        let status = self.drive(mission_id).await?;
        guard.mark_settled();
        Ok(status)
    }

    /// Stop the mission before its next step. An executing capability is not
    /// interrupted.
    pub fn pause_mission(&self, mission_id: Uuid) -> Result<()> {
        self.transition_mission(mission_id, MissionStatus::Paused)?;
        self.log(LogEntry::info(mission_id, "Mission paused"));
        Ok(())
    }

    pub fn block_mission(&self, mission_id: Uuid, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        self.transition_mission(mission_id, MissionStatus::Blocked)?;
        self.log(LogEntry::warn(mission_id, format!("Mission blocked: {reason}")));
        Ok(())
    }

    /// Mark the mission cancelled. An executing capability runs to completion
    /// and its result is recorded on the step, but nothing further starts.
    pub fn cancel_mission(&self, mission_id: Uuid) -> Result<()> {
        self.transition_mission(mission_id, MissionStatus::Cancelled)?;
        self.log(LogEntry::warn(mission_id, "Mission cancelled"));
        Ok(())
    }

    /// Walk the remaining phases in order until the mission settles.
    async fn drive(&self, mission_id: Uuid) -> Result<MissionStatus> {
        let run = self
            .store
            .get_mission(mission_id)
            .ok_or(OrchestratorError::MissionNotFound(mission_id))?;

        for phase in &run.phases {
            if !self.is_running(mission_id) {
                break;
            }
            let outcome = match phase.status {
                PhaseStatus::Completed => continue,
                PhaseStatus::Failed => PhaseOutcome::Failed,
                PhaseStatus::WaitingHuman => PhaseOutcome::Suspended,
                PhaseStatus::Pending | PhaseStatus::Running => {
                    self.execute_phase(mission_id, phase.id).await?
                }
            };

            match outcome {
                PhaseOutcome::Completed => continue,
                PhaseOutcome::Failed => {
                    self.settle_mission(mission_id, MissionStatus::Failed);
                    break;
                }
                PhaseOutcome::Suspended => {
                    self.settle_mission(mission_id, MissionStatus::WaitingHuman);
                    break;
                }
                PhaseOutcome::Interrupted => break,
            }
        }

        if self.is_running(mission_id) {
            if run.total_steps() == 0 {
                self.set_progress(mission_id, 100);
            }
            self.transition_mission(mission_id, MissionStatus::Completed)?;
            self.log(LogEntry::info(mission_id, "Mission completed"));
        }

        let status = self
            .store
            .mission_status(mission_id)
            .ok_or(OrchestratorError::MissionNotFound(mission_id))?;
        info!(mission_id = %mission_id, status = %status, "Mission settled");
        Ok(status)
    }

    async fn execute_phase(&self, mission_id: Uuid, phase_id: Uuid) -> Result<PhaseOutcome> {
        let phase = self
            .store
            .get_phase(phase_id)
            .ok_or(OrchestratorError::MissionNotFound(mission_id))?;
        let name = phase.name().to_string();

        if phase.status == PhaseStatus::Pending {
            if phase.definition.parallel {
                debug!(phase = %name, "Parallel hint ignored, running steps sequentially");
            }
            info!(mission_id = %mission_id, phase = %name, "Starting phase");
            self.log(LogEntry::info(mission_id, format!("Starting phase: {name}")));
            self.transition_phase(mission_id, phase_id, PhaseStatus::Running)?;
        }

        for step in &phase.steps {
            match step.status {
                StepStatus::Completed | StepStatus::Skipped => continue,
                StepStatus::Failed => {
                    self.transition_phase(mission_id, phase_id, PhaseStatus::Failed)?;
                    return Ok(PhaseOutcome::Failed);
                }
                StepStatus::WaitingHuman => {
                    self.transition_phase(mission_id, phase_id, PhaseStatus::WaitingHuman)?;
                    return Ok(PhaseOutcome::Suspended);
                }
                StepStatus::Pending | StepStatus::Running => {}
            }

            if !self.is_running(mission_id) {
                return Ok(PhaseOutcome::Interrupted);
            }

            match self.execute_step(mission_id, step.id).await? {
                StepOutcome::Advanced => {}
                StepOutcome::Failed => {
                    self.transition_phase(mission_id, phase_id, PhaseStatus::Failed)?;
                    info!(mission_id = %mission_id, phase = %name, "Phase failed");
                    return Ok(PhaseOutcome::Failed);
                }
                StepOutcome::Suspended => {
                    self.transition_phase(mission_id, phase_id, PhaseStatus::WaitingHuman)?;
                    return Ok(PhaseOutcome::Suspended);
                }
            }
        }

        self.transition_phase(mission_id, phase_id, PhaseStatus::Completed)?;
        info!(mission_id = %mission_id, phase = %name, "Phase completed");
        Ok(PhaseOutcome::Completed)
    }

    async fn execute_step(&self, mission_id: Uuid, step_id: Uuid) -> Result<StepOutcome> {
        let mut step = self
            .store
            .get_step(step_id)
            .ok_or(OrchestratorError::StepNotFound {
                mission_id,
                step_id,
            })?;
        // A step interrupted mid-run is restarted from scratch.
        if step.status != StepStatus::Running {
            StepStateMachine::validate_transition(&step.status, &StepStatus::Running)?;
        }
        step.start();
        self.save_step(mission_id, step.clone());

        let key = step.definition.capability_key();
        debug!(mission_id = %mission_id, step_id = %step_id, capability = %key, "Executing step");

        let result = match self.registry.resolve(&key) {
            None => CapabilityResult::failed(format!("No capability registered for {key}")),
            Some(capability) => {
                let ctx = self.context(mission_id, &step)?;
                invoke(capability.as_ref(), &ctx, &key).await
            }
        };

        self.apply_result(mission_id, step, result)
    }

    fn context(&self, mission_id: Uuid, step: &StepRun) -> Result<CapabilityContext> {
        let mission = self
            .store
            .get_mission(mission_id)
            .ok_or(OrchestratorError::MissionNotFound(mission_id))?;
        let phase = mission
            .phase(step.phase_id)
            .cloned()
            .ok_or(OrchestratorError::StepNotFound {
                mission_id,
                step_id: step.id,
            })?;
        Ok(CapabilityContext {
            mission,
            phase,
            step: step.clone(),
        })
    }

    fn apply_result(
        &self,
        mission_id: Uuid,
        mut step: StepRun,
        result: CapabilityResult,
    ) -> Result<StepOutcome> {
        let step_id = step.id;
        let agent = step.agent_id().to_string();
        let title = step.definition.display_title();

        let error_message = match (&result.error_message, result.status) {
            (Some(message), _) => Some(message.clone()),
            (None, StepStatus::Failed) => Some(format!("Step {title} reported failure")),
            (None, StepStatus::Pending | StepStatus::Running) => Some(format!(
                "Capability {} returned non-final status {}",
                step.definition.capability_key(),
                result.status
            )),
            (None, _) => None,
        };
        let needs_approval = result.status == StepStatus::Completed
            && self.config.honor_step_approval
            && (result.require_approval || step.definition.requires_approval);

        let outcome = if let Some(message) = &error_message {
            step.fail(message.clone(), result.output);
            StepOutcome::Failed
        } else if result.status == StepStatus::WaitingHuman || needs_approval {
            step.suspend(result.output);
            StepOutcome::Suspended
        } else if result.status == StepStatus::Skipped {
            step.skip();
            StepOutcome::Advanced
        } else {
            step.complete(result.output);
            StepOutcome::Advanced
        };
        self.save_step(mission_id, step);

        for line in result.logs {
            self.log(LogEntry::info(mission_id, line).for_step(step_id, agent.clone()));
        }

        match outcome {
            StepOutcome::Failed => {
                let message = error_message.unwrap_or_default();
                error!(
                    mission_id = %mission_id,
                    step_id = %step_id,
                    error = %message,
                    "Step failed"
                );
                self.log(
                    LogEntry::error(mission_id, format!("Step {title} failed: {message}"))
                        .for_step(step_id, agent),
                );
                self.settle_mission(mission_id, MissionStatus::Failed);
            }
            StepOutcome::Suspended => {
                info!(mission_id = %mission_id, step_id = %step_id, "Step waiting for human approval");
                self.log(
                    LogEntry::info(mission_id, format!("Waiting for approval: {title}"))
                        .for_step(step_id, agent),
                );
                self.settle_mission(mission_id, MissionStatus::WaitingHuman);
            }
            StepOutcome::Advanced => {
                debug!(mission_id = %mission_id, step_id = %step_id, "Step finished");
                self.refresh_progress(mission_id);
            }
        }

        Ok(outcome)
    }

    fn is_running(&self, mission_id: Uuid) -> bool {
        self.store.mission_status(mission_id) == Some(MissionStatus::Running)
    }

    fn transition_mission(&self, mission_id: Uuid, to: MissionStatus) -> Result<()> {
        let from = {
            let _lock = self.transitions.lock().unwrap_or_else(PoisonError::into_inner);
            let from = self
                .store
                .mission_status(mission_id)
                .ok_or(OrchestratorError::MissionNotFound(mission_id))?;
            MissionStateMachine::validate_transition(&from, &to)?;
            self.store.update_mission_status(mission_id, to);
            from
        };

        info!(mission_id = %mission_id, from = %from, to = %to, "Mission status changed");
        self.bus
            .emit(mission_id, MissionEventPayload::StatusChanged { status: to });
        Ok(())
    }

    /// Move the mission to `to` if that is still a legal move. Someone may
    /// have cancelled or paused the mission while a step was executing.
    fn settle_mission(&self, mission_id: Uuid, to: MissionStatus) {
        let current = self.store.mission_status(mission_id);
        if current == Some(to) {
            return;
        }
        if let Err(e) = self.transition_mission(mission_id, to) {
            debug!(mission_id = %mission_id, error = %e, "Mission status left unchanged");
        }
    }

    fn transition_phase(&self, mission_id: Uuid, phase_id: Uuid, to: PhaseStatus) -> Result<()> {
        let from = self
            .store
            .get_phase(phase_id)
            .map(|p| p.status)
            .ok_or(OrchestratorError::MissionNotFound(mission_id))?;
        if from == to {
            return Ok(());
        }
        PhaseStateMachine::validate_transition(&from, &to)?;
        self.store.update_phase_status(mission_id, phase_id, to);
        debug!(mission_id = %mission_id, phase_id = %phase_id, from = %from, to = %to, "Phase status changed");
        Ok(())
    }

    fn save_step(&self, mission_id: Uuid, step: StepRun) {
        if self.store.update_step(mission_id, step.clone()) {
            self.bus
                .emit(mission_id, MissionEventPayload::StepStatusChanged { step });
        }
    }

    fn log(&self, entry: LogEntry) {
        let mission_id = entry.mission_id;
        if self.store.append_log(mission_id, entry.clone()) {
            self.bus.emit(mission_id, MissionEventPayload::Log { entry });
        }
    }

    fn refresh_progress(&self, mission_id: Uuid) {
        if let Some(run) = self.store.get_mission(mission_id) {
            self.set_progress(mission_id, run.computed_progress());
        }
    }

    fn set_progress(&self, mission_id: Uuid, progress: u8) {
        if self.store.mission_progress(mission_id) == Some(progress) {
            return;
        }
        if self.store.update_mission_progress(mission_id, progress) {
            self.bus
                .emit(mission_id, MissionEventPayload::ProgressChanged { progress });
        }
    }
}

impl std::fmt::Debug for MissionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MissionEngine")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("bus", &self.bus)
            .field("registry", &self.registry)
            .finish()
    }
}

/// Run a capability, turning errors and panics into failed results.
async fn invoke(capability: &dyn Capability, ctx: &CapabilityContext, key: &str) -> CapabilityResult {
    match AssertUnwindSafe(capability.execute(ctx)).catch_unwind().await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => CapabilityResult::failed(e.to_string()),
        Err(panic) => CapabilityResult::failed(format!(
            "Capability {key} panicked: {}",
            panic_message(panic.as_ref())
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
