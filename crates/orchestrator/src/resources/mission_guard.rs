//! RAII guard enforcing one executor per mission.
//!
//! The engine acquires a guard before it mutates a mission through the phase
//! loop (run, resume, continue). A second executor for the same mission is
//! refused until the guard is dropped.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};

/// Set of missions with an executor in flight.
#[derive(Debug, Clone, Default)]
pub struct ActiveMissions {
    ids: Arc<Mutex<HashSet<Uuid>>>,
}

impl ActiveMissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `mission_id`, failing with [`OrchestratorError::MissionBusy`]
    /// if another executor holds it.
    pub fn acquire(&self, mission_id: Uuid) -> Result<MissionGuard> {
        let inserted = self
            .ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(mission_id);
        if !inserted {
            return Err(OrchestratorError::MissionBusy(mission_id));
        }

        debug!(mission_id = %mission_id, "Mission guard acquired");
        Ok(MissionGuard {
            mission_id,
            ids: Arc::clone(&self.ids),
            settled: false,
        })
    }

    pub fn is_active(&self, mission_id: Uuid) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&mission_id)
    }
}

/// Exclusive claim on a mission's executor slot.
///
/// Dropping the guard releases the slot. Dropping it before
/// [`MissionGuard::mark_settled`] means the executor stopped early (an error
/// or a dropped future) and is logged.
pub struct MissionGuard {
    mission_id: Uuid,
    ids: Arc<Mutex<HashSet<Uuid>>>,
    settled: bool,
}

impl MissionGuard {
    /// Record that the mission reached a terminal or suspended state.
    pub fn mark_settled(&mut self) {
        self.settled = true;
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub fn mission_id(&self) -> Uuid {
        self.mission_id
    }
}

impl Drop for MissionGuard {
    fn drop(&mut self) {
        if !self.settled {
            warn!(
                mission_id = %self.mission_id,
                "Mission executor stopped before the mission settled"
            );
        }
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.mission_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_initial_state() {
        let active = ActiveMissions::new();
        let id = Uuid::new_v4();
        let guard = active.acquire(id).unwrap();

        assert!(!guard.is_settled());
        assert_eq!(guard.mission_id(), id);
        assert!(active.is_active(id));
    }

    #[test]
    fn test_second_acquire_is_refused() {
        let active = ActiveMissions::new();
        let id = Uuid::new_v4();
        let _guard = active.acquire(id).unwrap();

        assert!(matches!(
            active.acquire(id),
            Err(OrchestratorError::MissionBusy(busy)) if busy == id
        ));
        assert!(active.acquire(Uuid::new_v4()).is_ok());
    }

    #[test]
    fn test_drop_releases() {
        let active = ActiveMissions::new();
        let id = Uuid::new_v4();
        {
            let mut guard = active.acquire(id).unwrap();
            guard.mark_settled();
            assert!(guard.is_settled());
        }
        assert!(!active.is_active(id));

        // Unsettled guards release too.
        drop(active.acquire(id).unwrap());
        assert!(active.acquire(id).is_ok());
    }
}
