//! Achievement catalog entries and the activity counters they are matched against.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{AchievementId, UserId, ZoneId, text_enum};

text_enum!(
    ConditionType {
        ReportsCount => "reports_count",
        PointsEarned => "points_earned",
        ConsecutiveDays => "consecutive_days",
        ZoneCoverage => "zone_coverage",
    }
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Achievement {
    pub id: AchievementId,
    pub name: String,
    pub description: String,
    pub icon: Option<String>,
    pub condition_type: ConditionType,
    pub condition_value: i64,
    /// Points credited when the achievement is earned.
    pub points_required: i64,
    pub is_active: bool,
}

impl Achievement {
    pub fn is_satisfied_by(&self, counters: &ActivityCounters) -> bool {
        counters.value_for(self.condition_type) >= self.condition_value
    }
}

/// Catalog entry as written in the achievements file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAchievement {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: Option<String>,
    pub condition_type: ConditionType,
    pub condition_value: i64,
    #[serde(default)]
    pub points_required: i64,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAchievement {
    pub user_id: UserId,
    pub achievement_id: AchievementId,
    pub earned_at: DateTime<Utc>,
    pub points_earned: i64,
}

/// A user's cumulative activity at one point in time.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityCounters {
    pub reports_count: i64,
    pub points_earned: i64,
    pub consecutive_days: i64,
    pub zone_coverage: i64,
}

impl ActivityCounters {
    pub fn value_for(&self, condition: ConditionType) -> i64 {
        match condition {
            ConditionType::ReportsCount => self.reports_count,
            ConditionType::PointsEarned => self.points_earned,
            ConditionType::ConsecutiveDays => self.consecutive_days,
            ConditionType::ZoneCoverage => self.zone_coverage,
        }
    }

    /// Derives counters from a user's report history and current balance.
    /// Rejected reports do not count.
    pub fn from_history(history: &[ReportSummary], points: i64) -> Self {
        let counted = history.iter().filter(|r| !r.rejected);
        let mut reports_count = 0;
        let mut zones = BTreeSet::new();
        let mut days = BTreeSet::new();
        for report in counted {
            reports_count += 1;
            zones.insert(report.zone_id);
            days.insert(report.created_at.date_naive());
        }

        ActivityCounters {
            reports_count,
            points_earned: points,
            consecutive_days: current_streak(&days),
            zone_coverage: zones.len() as i64,
        }
    }
}

/// Length of the run of consecutive days ending on the latest day.
fn current_streak(days: &BTreeSet<NaiveDate>) -> i64 {
    let mut iter = days.iter().rev();
    let Some(mut previous) = iter.next().copied() else {
        return 0;
    };
    let mut streak = 1;
    for day in iter {
        if previous.pred_opt() != Some(*day) {
            break;
        }
        streak += 1;
        previous = *day;
    }
    streak
}

/// Minimal view of a report needed for counters.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ReportSummary {
    pub zone_id: ZoneId,
    pub created_at: DateTime<Utc>,
    pub rejected: bool,
}
