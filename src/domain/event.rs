use serde::{Deserialize, Serialize};

use super::{AchievementId, ReportId, ScheduleId, UserId, ZoneId};

/// Notifications published after a state change has been committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    AchievementEarned {
        user_id: UserId,
        achievement_id: AchievementId,
        name: String,
        points: i64,
    },
    ReportResolved {
        report_id: ReportId,
        reporter: UserId,
        zone_id: ZoneId,
        points_awarded: i32,
    },
    ScheduleAssigned {
        schedule_id: ScheduleId,
        zone_id: ZoneId,
        collector: UserId,
    },
}

impl EngineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::AchievementEarned { .. } => "achievement_earned",
            EngineEvent::ReportResolved { .. } => "report_resolved",
            EngineEvent::ScheduleAssigned { .. } => "schedule_assigned",
        }
    }

    /// User the notification is addressed to.
    pub fn recipient(&self) -> UserId {
        match self {
            EngineEvent::AchievementEarned { user_id, .. } => *user_id,
            EngineEvent::ReportResolved { reporter, .. } => *reporter,
            EngineEvent::ScheduleAssigned { collector, .. } => *collector,
        }
    }
}
