//! Planned and completed collection visits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Entity, ScheduleId, UserId, ZoneId};
use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScheduleState {
    Pending,
    InProgress {
        started_at: DateTime<Utc>,
    },
    Completed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        actual_duration_minutes: i32,
    },
    Cancelled {
        /// Set when the run had already started.
        started_at: Option<DateTime<Utc>>,
        cancelled_at: DateTime<Utc>,
    },
}

impl ScheduleState {
    pub const PENDING: &'static str = "pending";
    pub const IN_PROGRESS: &'static str = "in_progress";
    pub const COMPLETED: &'static str = "completed";
    pub const CANCELLED: &'static str = "cancelled";

    pub fn name(&self) -> &'static str {
        match self {
            ScheduleState::Pending => Self::PENDING,
            ScheduleState::InProgress { .. } => Self::IN_PROGRESS,
            ScheduleState::Completed { .. } => Self::COMPLETED,
            ScheduleState::Cancelled { .. } => Self::CANCELLED,
        }
    }

    /// Pending and in-progress schedules count against the one-per-zone limit.
    pub fn is_active(&self) -> bool {
        matches!(self, ScheduleState::Pending | ScheduleState::InProgress { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchedule {
    pub id: ScheduleId,
    pub zone_id: ZoneId,
    pub scheduled_at: DateTime<Utc>,
    pub assigned_to: Option<UserId>,
    pub state: ScheduleState,
    pub notes: Option<String>,
    pub estimated_duration_minutes: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl CollectionSchedule {
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn assign(&mut self, collector: UserId) -> Result<(), EngineError> {
        if !self.is_active() {
            return Err(self.invalid_transition("assigned"));
        }
        if self.assigned_to == Some(collector) {
            return Err(EngineError::AlreadyInState {
                entity: Entity::Schedule,
                id: self.id.0,
                state: "assigned",
            });
        }
        self.assigned_to = Some(collector);
        Ok(())
    }

    pub fn start(&mut self, at: DateTime<Utc>) -> Result<(), EngineError> {
        match self.state {
            ScheduleState::Pending => {
                self.state = ScheduleState::InProgress { started_at: at };
                Ok(())
            }
            ScheduleState::InProgress { .. } => Err(self.already_in_state()),
            _ => Err(self.invalid_transition(ScheduleState::IN_PROGRESS)),
        }
    }

    pub fn complete(&mut self, at: DateTime<Utc>, actual_duration_minutes: i32) -> Result<(), EngineError> {
        match self.state {
            ScheduleState::InProgress { started_at } => {
                self.state = ScheduleState::Completed {
                    started_at,
                    completed_at: at,
                    actual_duration_minutes,
                };
                Ok(())
            }
            ScheduleState::Completed { .. } => Err(self.already_in_state()),
            _ => Err(self.invalid_transition(ScheduleState::COMPLETED)),
        }
    }

    pub fn cancel(&mut self, at: DateTime<Utc>) -> Result<(), EngineError> {
        match self.state {
            ScheduleState::Pending => {
                self.state = ScheduleState::Cancelled {
                    started_at: None,
                    cancelled_at: at,
                };
                Ok(())
            }
            ScheduleState::InProgress { started_at } => {
                self.state = ScheduleState::Cancelled {
                    started_at: Some(started_at),
                    cancelled_at: at,
                };
                Ok(())
            }
            ScheduleState::Cancelled { .. } => Err(self.already_in_state()),
            ScheduleState::Completed { .. } => Err(self.invalid_transition(ScheduleState::CANCELLED)),
        }
    }

    fn already_in_state(&self) -> EngineError {
        EngineError::AlreadyInState {
            entity: Entity::Schedule,
            id: self.id.0,
            state: self.state.name(),
        }
    }

    fn invalid_transition(&self, to: &'static str) -> EngineError {
        EngineError::InvalidTransition {
            entity: Entity::Schedule,
            id: self.id.0,
            from: self.state.name(),
            to,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSchedule {
    pub zone_id: ZoneId,
    pub scheduled_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub estimated_duration_minutes: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn schedule() -> CollectionSchedule {
        let at = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        CollectionSchedule {
            id: ScheduleId(3),
            zone_id: ZoneId(1),
            scheduled_at: at,
            assigned_to: None,
            state: ScheduleState::Pending,
            notes: None,
            estimated_duration_minutes: Some(30),
            created_at: at,
        }
    }

    #[test]
    fn complete_requires_start() {
        let mut s = schedule();
        let at = s.scheduled_at;
        let err = s.complete(at, 20).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { from: "pending", .. }));

        s.start(at).unwrap();
        s.complete(at, 20).unwrap();
        assert!(!s.is_active());
        assert!(s.complete(at, 20).unwrap_err().is_noop());
    }

    #[test]
    fn cancel_allowed_from_both_active_states() {
        let mut pending = schedule();
        let at = pending.scheduled_at;
        pending.cancel(at).unwrap();
        assert_eq!(pending.state.name(), "cancelled");

        let mut running = schedule();
        running.start(at).unwrap();
        let later = at + chrono::Duration::minutes(15);
        running.cancel(later).unwrap();
        assert_eq!(
            running.state,
            ScheduleState::Cancelled {
                started_at: Some(at),
                cancelled_at: later,
            }
        );
        assert!(running.cancel(later).unwrap_err().is_noop());
    }

    #[test]
    fn finished_schedules_cannot_be_reassigned() {
        let mut s = schedule();
        let at = s.scheduled_at;
        s.assign(UserId(9)).unwrap();
        assert!(s.assign(UserId(9)).unwrap_err().is_noop());
        s.cancel(at).unwrap();
        assert!(matches!(
            s.assign(UserId(10)).unwrap_err(),
            EngineError::InvalidTransition { to: "assigned", .. }
        ));
    }
}
