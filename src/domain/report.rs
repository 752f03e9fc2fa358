//! Citizen reports and their audit trail.
//!
//! Lifecycle: `pending -> verified -> resolved`, or `pending -> rejected`.
//! `resolved` and `rejected` are terminal. Each state carries only the data
//! that exists once the report has reached it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ActionId, Coordinate, DistrictId, Entity, PriorityLevel, ReportId, UserId, ZoneId, text_enum};
use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReportState {
    Pending,
    Verified {
        verified_by: UserId,
        verified_at: DateTime<Utc>,
    },
    Resolved {
        verified_by: UserId,
        verified_at: DateTime<Utc>,
        resolved_by: UserId,
        resolved_at: DateTime<Utc>,
        points_awarded: i32,
    },
    Rejected {
        rejected_by: UserId,
        rejected_at: DateTime<Utc>,
        reason: String,
    },
}

impl ReportState {
    pub const PENDING: &'static str = "pending";
    pub const VERIFIED: &'static str = "verified";
    pub const RESOLVED: &'static str = "resolved";
    pub const REJECTED: &'static str = "rejected";

    pub fn name(&self) -> &'static str {
        match self {
            ReportState::Pending => Self::PENDING,
            ReportState::Verified { .. } => Self::VERIFIED,
            ReportState::Resolved { .. } => Self::RESOLVED,
            ReportState::Rejected { .. } => Self::REJECTED,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReportState::Resolved { .. } | ReportState::Rejected { .. })
    }

    pub fn points_awarded(&self) -> i32 {
        match self {
            ReportState::Resolved { points_awarded, .. } => *points_awarded,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WasteReport {
    pub id: ReportId,
    pub reporter: UserId,
    pub zone_id: ZoneId,
    pub district_id: DistrictId,
    /// Observed fill level in percent.
    pub fill_level: f64,
    pub priority: PriorityLevel,
    pub description: Option<String>,
    pub photos: Vec<String>,
    pub location: Option<Coordinate>,
    pub state: ReportState,
    pub created_at: DateTime<Utc>,
}

impl WasteReport {
    pub fn verify(&mut self, by: UserId, at: DateTime<Utc>) -> Result<(), EngineError> {
        match self.state {
            ReportState::Pending => {
                self.state = ReportState::Verified {
                    verified_by: by,
                    verified_at: at,
                };
                Ok(())
            }
            ReportState::Verified { .. } => Err(self.already_in_state()),
            _ => Err(self.invalid_transition(ReportState::VERIFIED)),
        }
    }

    pub fn reject(&mut self, by: UserId, at: DateTime<Utc>, reason: String) -> Result<(), EngineError> {
        match self.state {
            ReportState::Pending => {
                self.state = ReportState::Rejected {
                    rejected_by: by,
                    rejected_at: at,
                    reason,
                };
                Ok(())
            }
            ReportState::Rejected { .. } => Err(self.already_in_state()),
            _ => Err(self.invalid_transition(ReportState::REJECTED)),
        }
    }

    pub fn resolve(&mut self, by: UserId, at: DateTime<Utc>, points_awarded: i32) -> Result<(), EngineError> {
        match self.state {
            ReportState::Verified {
                verified_by,
                verified_at,
            } => {
                self.state = ReportState::Resolved {
                    verified_by,
                    verified_at,
                    resolved_by: by,
                    resolved_at: at,
                    points_awarded,
                };
                Ok(())
            }
            ReportState::Resolved { .. } => Err(self.already_in_state()),
            _ => Err(self.invalid_transition(ReportState::RESOLVED)),
        }
    }

    /// Checks that `resolve` would succeed without changing anything.
    pub fn ensure_resolvable(&self) -> Result<(), EngineError> {
        match self.state {
            ReportState::Verified { .. } => Ok(()),
            ReportState::Resolved { .. } => Err(self.already_in_state()),
            _ => Err(self.invalid_transition(ReportState::RESOLVED)),
        }
    }

    fn already_in_state(&self) -> EngineError {
        EngineError::AlreadyInState {
            entity: Entity::Report,
            id: self.id.0,
            state: self.state.name(),
        }
    }

    fn invalid_transition(&self, to: &'static str) -> EngineError {
        EngineError::InvalidTransition {
            entity: Entity::Report,
            id: self.id.0,
            from: self.state.name(),
            to,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewReport {
    pub reporter: UserId,
    pub zone_id: ZoneId,
    pub district_id: DistrictId,
    pub fill_level: f64,
    pub priority: PriorityLevel,
    pub description: Option<String>,
    pub photos: Vec<String>,
    pub location: Option<Coordinate>,
    pub created_at: DateTime<Utc>,
}

text_enum!(
    ActionType {
        Created => "created",
        Verified => "verified",
        Rejected => "rejected",
        Resolved => "resolved",
        Commented => "commented",
    }
);

/// Append-only audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportAction {
    pub id: ActionId,
    pub report_id: ReportId,
    pub user_id: UserId,
    pub action_type: ActionType,
    pub data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewReportAction {
    pub report_id: ReportId,
    pub user_id: UserId,
    pub action_type: ActionType,
    pub data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn pending_report() -> WasteReport {
        WasteReport {
            id: ReportId(7),
            reporter: UserId(1),
            zone_id: ZoneId(1),
            district_id: DistrictId(1),
            fill_level: 80.0,
            priority: PriorityLevel::Medium,
            description: None,
            photos: Vec::new(),
            location: None,
            state: ReportState::Pending,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
        }
    }

    #[test]
    fn verified_report_cannot_be_rejected() {
        let mut report = pending_report();
        let at = report.created_at;
        report.verify(UserId(2), at).unwrap();

        let err = report.reject(UserId(2), at, "duplicate".into()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition {
                from: "verified",
                to: "rejected",
                ..
            }
        ));
    }

    #[test]
    fn repeating_a_transition_is_a_noop() {
        let mut report = pending_report();
        let at = report.created_at;
        report.verify(UserId(2), at).unwrap();
        let err = report.verify(UserId(3), at).unwrap_err();
        assert!(err.is_noop());
        // the first verifier is kept
        assert!(matches!(report.state, ReportState::Verified { verified_by: UserId(2), .. }));
    }

    #[test]
    fn resolution_keeps_verification_data_and_points() {
        let mut report = pending_report();
        let at = report.created_at;
        assert!(report.resolve(UserId(4), at, 10).is_err());
        report.verify(UserId(2), at).unwrap();
        report.resolve(UserId(4), at, 10).unwrap();

        assert!(report.state.is_terminal());
        assert_eq!(report.state.points_awarded(), 10);
        match report.state {
            ReportState::Resolved {
                verified_by,
                resolved_by,
                ..
            } => {
                assert_eq!(verified_by, UserId(2));
                assert_eq!(resolved_by, UserId(4));
            }
            other => panic!("unexpected state {other:?}"),
        }
    }
}
