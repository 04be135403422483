//! Mission State Store
//!
//! In-memory source of truth for every mission run in the process. Runs are
//! decomposed into flat maps (mission, phase and step records keyed by id)
//! so each update touches a single record; read accessors assemble
//! [`MissionRun`] snapshots on demand.
//!
//! Nothing here is persisted. Every operation is synchronous and takes the
//! internal lock once, so each call is atomic with respect to other callers.

use std::collections::{HashMap, VecDeque};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use mission_core::{
    LogEntry, MissionDefinition, MissionRun, MissionStatus, PhaseDefinition, PhaseRun,
    PhaseStatus, StepRun,
};
use uuid::Uuid;

struct MissionRecord {
    definition: MissionDefinition,
    status: MissionStatus,
    progress: u8,
    phase_ids: Vec<Uuid>,
    /// Newest first
    logs: VecDeque<LogEntry>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

struct PhaseRecord {
    mission_id: Uuid,
    definition: PhaseDefinition,
    status: PhaseStatus,
    step_ids: Vec<Uuid>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct StoreState {
    missions: HashMap<Uuid, MissionRecord>,
    phases: HashMap<Uuid, PhaseRecord>,
    steps: HashMap<Uuid, StepRun>,
    /// Mission ids, most recently added first
    order: Vec<Uuid>,
}

impl StoreState {
    fn assemble_phase(&self, phase_id: Uuid) -> Option<PhaseRun> {
        let record = self.phases.get(&phase_id)?;
        Some(PhaseRun {
            id: phase_id,
            definition: record.definition.clone(),
            status: record.status,
            started_at: record.started_at,
            completed_at: record.completed_at,
            steps: record
                .step_ids
                .iter()
                .filter_map(|id| self.steps.get(id).cloned())
                .collect(),
        })
    }

    fn assemble_mission(&self, mission_id: Uuid) -> Option<MissionRun> {
        let record = self.missions.get(&mission_id)?;
        Some(MissionRun {
            id: mission_id,
            definition: record.definition.clone(),
            status: record.status,
            progress: record.progress,
            phases: record
                .phase_ids
                .iter()
                .filter_map(|id| self.assemble_phase(*id))
                .collect(),
            logs: record.logs.iter().cloned().collect(),
            created_at: record.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
        })
    }

    fn owning_mission(&self, step: &StepRun) -> Option<Uuid> {
        self.phases.get(&step.phase_id).map(|p| p.mission_id)
    }
}

/// Store for mission runs
#[derive(Default)]
pub struct MissionStore {
    state: RwLock<StoreState>,
}

impl MissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a run and make it the most recent one.
    ///
    /// Returns false, leaving the store untouched, if a mission with the same
    /// id is already stored.
    pub fn add_mission(&self, run: MissionRun) -> bool {
        let mut state = self.write();
        if state.missions.contains_key(&run.id) {
            return false;
        }

        let mission_id = run.id;
        let mut phase_ids = Vec::with_capacity(run.phases.len());
        for phase in run.phases {
            phase_ids.push(phase.id);
            let step_ids = phase.steps.iter().map(|s| s.id).collect();
            for step in phase.steps {
                state.steps.insert(step.id, step);
            }
            state.phases.insert(
                phase.id,
                PhaseRecord {
                    mission_id,
                    definition: phase.definition,
                    status: phase.status,
                    step_ids,
                    started_at: phase.started_at,
                    completed_at: phase.completed_at,
                },
            );
        }

        state.missions.insert(
            mission_id,
            MissionRecord {
                definition: run.definition,
                status: run.status,
                progress: run.progress,
                phase_ids,
                logs: run.logs.into(),
                created_at: run.created_at,
                started_at: run.started_at,
                completed_at: run.completed_at,
            },
        );
        state.order.insert(0, mission_id);
        true
    }

    /// Replace the mission's status. Entering `running` for the first time
    /// stamps `started_at`; entering a terminal status stamps `completed_at`.
    pub fn update_mission_status(&self, mission_id: Uuid, status: MissionStatus) -> bool {
        let mut state = self.write();
        let Some(record) = state.missions.get_mut(&mission_id) else {
            return false;
        };
        record.status = status;
        if status == MissionStatus::Running && record.started_at.is_none() {
            record.started_at = Some(Utc::now());
        }
        if status.is_terminal() {
            record.completed_at = Some(Utc::now());
        }
        true
    }

    pub fn update_mission_progress(&self, mission_id: Uuid, progress: u8) -> bool {
        let mut state = self.write();
        match state.missions.get_mut(&mission_id) {
            Some(record) => {
                record.progress = progress.min(100);
                true
            }
            None => false,
        }
    }

    /// Replace the phase's status, stamping start and completion times.
    pub fn update_phase_status(&self, mission_id: Uuid, phase_id: Uuid, status: PhaseStatus) -> bool {
        let mut state = self.write();
        let Some(record) = state.phases.get_mut(&phase_id) else {
            return false;
        };
        if record.mission_id != mission_id {
            return false;
        }
        record.status = status;
        match status {
            PhaseStatus::Running if record.started_at.is_none() => {
                record.started_at = Some(Utc::now());
            }
            PhaseStatus::Completed | PhaseStatus::Failed => {
                record.completed_at = Some(Utc::now());
            }
            _ => {}
        }
        true
    }

    /// Replace the stored step with the same id. Steps of other missions and
    /// unknown step ids are left alone.
    pub fn update_step(&self, mission_id: Uuid, step: StepRun) -> bool {
        let mut state = self.write();
        if !state.steps.contains_key(&step.id) || state.owning_mission(&step) != Some(mission_id) {
            return false;
        }
        state.steps.insert(step.id, step);
        true
    }

    /// Prepend a log entry; index 0 is always the newest.
    pub fn append_log(&self, mission_id: Uuid, entry: LogEntry) -> bool {
        let mut state = self.write();
        match state.missions.get_mut(&mission_id) {
            Some(record) => {
                record.logs.push_front(entry);
                true
            }
            None => false,
        }
    }

    pub fn get_mission(&self, mission_id: Uuid) -> Option<MissionRun> {
        self.read().assemble_mission(mission_id)
    }

    pub fn get_phase(&self, phase_id: Uuid) -> Option<PhaseRun> {
        self.read().assemble_phase(phase_id)
    }

    pub fn get_step(&self, step_id: Uuid) -> Option<StepRun> {
        self.read().steps.get(&step_id).cloned()
    }

    pub fn mission_status(&self, mission_id: Uuid) -> Option<MissionStatus> {
        self.read().missions.get(&mission_id).map(|m| m.status)
    }

    pub fn mission_progress(&self, mission_id: Uuid) -> Option<u8> {
        self.read().missions.get(&mission_id).map(|m| m.progress)
    }

    /// Log entries for a mission, newest first.
    pub fn logs(&self, mission_id: Uuid) -> Vec<LogEntry> {
        self.read()
            .missions
            .get(&mission_id)
            .map(|m| m.logs.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Mission ids, most recent first.
    pub fn mission_ids(&self) -> Vec<Uuid> {
        self.read().order.clone()
    }

    /// All runs, most recent first.
    pub fn list_missions(&self) -> Vec<MissionRun> {
        let state = self.read();
        state
            .order
            .iter()
            .filter_map(|id| state.assemble_mission(*id))
            .collect()
    }

    pub fn contains(&self, mission_id: Uuid) -> bool {
        self.read().missions.contains_key(&mission_id)
    }

    pub fn len(&self) -> usize {
        self.read().missions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop a mission and all of its phase and step records.
    pub fn remove_mission(&self, mission_id: Uuid) -> Option<MissionRun> {
        let mut state = self.write();
        let run = state.assemble_mission(mission_id)?;
        if let Some(record) = state.missions.remove(&mission_id) {
            for phase_id in record.phase_ids {
                if let Some(phase) = state.phases.remove(&phase_id) {
                    for step_id in phase.step_ids {
                        state.steps.remove(&step_id);
                    }
                }
            }
        }
        state.order.retain(|id| *id != mission_id);
        Some(run)
    }

    /// Forget every mission.
    pub fn clear(&self) {
        *self.write() = StoreState::default();
    }
}

impl std::fmt::Debug for MissionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("MissionStore")
            .field("missions", &state.missions.len())
            .field("phases", &state.phases.len())
            .field("steps", &state.steps.len())
            .finish()
    }
}
