//! Diesel row structs and their conversions to domain types.
//!
//! Enumerations live in text columns; a value the domain does not know is
//! reported as a corrupt row rather than silently mapped.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::{
    Achievement, AchievementId, ActionId, ActionType, CollectionSchedule, ConditionType, Coordinate, DistrictId,
    NewAchievement, NewReport, NewReportAction, NewSchedule, NewUser, NewZone, PriorityLevel, ReportAction, ReportId,
    ReportState, Role, ScheduleId, ScheduleState, User, UserAchievement, UserId, WasteReport, Zone, ZoneId, ZoneType,
};
use crate::error::StoreError;
use crate::schema;

fn parse_column<T>(table: &'static str, raw: &str) -> Result<T, StoreError>
where
    T: FromStr<Err = String>,
{
    raw.parse::<T>().map_err(|detail| StoreError::Corrupt { table, detail })
}

fn required<T>(table: &'static str, column: &str, value: Option<T>) -> Result<T, StoreError> {
    value.ok_or_else(|| StoreError::Corrupt {
        table,
        detail: format!("`{}` missing for current status", column),
    })
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::districts)]
pub struct DistrictRow {
    pub id: i64,
    pub name: String,
    pub city: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::districts)]
pub struct NewDistrictRow<'a> {
    pub name: &'a str,
    pub city: Option<&'a str>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::users)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub role: String,
    pub points: i64,
    pub level: i32,
    pub district_id: Option<i64>,
    pub is_active: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: UserId(row.id),
            username: row.username,
            role: parse_column::<Role>("users", &row.role)?,
            points: row.points,
            level: row.level,
            district_id: row.district_id.map(DistrictId),
            is_active: row.is_active,
            version: row.version,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::users)]
pub struct NewUserRow<'a> {
    pub username: &'a str,
    pub role: &'static str,
    pub district_id: Option<i64>,
}

impl<'a> From<&'a NewUser> for NewUserRow<'a> {
    fn from(new: &'a NewUser) -> Self {
        NewUserRow {
            username: &new.username,
            role: new.role.as_str(),
            district_id: new.district_id.map(|d| d.0),
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::zones)]
#[diesel(belongs_to(DistrictRow, foreign_key = district_id))]
pub struct ZoneRow {
    pub id: i64,
    pub district_id: i64,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub capacity_liters: f64,
    pub current_fill_level: f64,
    pub radius_meters: f64,
    pub priority_level: String,
    pub zone_type: String,
    pub last_emptied_at: Option<DateTime<Utc>>,
    pub next_collection_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ZoneRow> for Zone {
    type Error = StoreError;

    fn try_from(row: ZoneRow) -> Result<Self, Self::Error> {
        Ok(Zone {
            id: ZoneId(row.id),
            district_id: DistrictId(row.district_id),
            name: row.name,
            location: Coordinate {
                latitude: row.latitude,
                longitude: row.longitude,
            },
            capacity_liters: row.capacity_liters,
            current_fill_level: row.current_fill_level,
            radius_meters: row.radius_meters,
            priority_level: parse_column::<PriorityLevel>("zones", &row.priority_level)?,
            zone_type: parse_column::<ZoneType>("zones", &row.zone_type)?,
            last_emptied_at: row.last_emptied_at,
            next_collection_at: row.next_collection_at,
            is_active: row.is_active,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::zones)]
pub struct NewZoneRow<'a> {
    pub district_id: i64,
    pub name: &'a str,
    pub latitude: f64,
    pub longitude: f64,
    pub capacity_liters: f64,
    pub radius_meters: f64,
    pub zone_type: &'static str,
}

impl<'a> From<&'a NewZone> for NewZoneRow<'a> {
    fn from(new: &'a NewZone) -> Self {
        NewZoneRow {
            district_id: new.district_id.0,
            name: &new.name,
            latitude: new.location.latitude,
            longitude: new.location.longitude,
            capacity_liters: new.capacity_liters,
            radius_meters: new.radius_meters,
            zone_type: new.zone_type.as_str(),
        }
    }
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = schema::zones)]
#[diesel(treat_none_as_null = true)]
pub struct ZoneChanges {
    pub current_fill_level: f64,
    pub priority_level: &'static str,
    pub last_emptied_at: Option<DateTime<Utc>>,
    pub next_collection_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<&Zone> for ZoneChanges {
    fn from(zone: &Zone) -> Self {
        ZoneChanges {
            current_fill_level: zone.current_fill_level,
            priority_level: zone.priority_level.as_str(),
            last_emptied_at: zone.last_emptied_at,
            next_collection_at: zone.next_collection_at,
            is_active: zone.is_active,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::waste_reports)]
#[diesel(belongs_to(ZoneRow, foreign_key = zone_id))]
pub struct ReportRow {
    pub id: i64,
    pub user_id: i64,
    pub zone_id: i64,
    pub district_id: i64,
    pub fill_level: f64,
    pub priority: String,
    pub description: Option<String>,
    pub photos: serde_json::Value,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub status: String,
    pub verified_by: Option<i64>,
    pub verified_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<i64>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<i64>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub points_awarded: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReportRow {
    fn state(&self) -> Result<ReportState, StoreError> {
        const T: &str = "waste_reports";
        let state = match self.status.as_str() {
            ReportState::PENDING => ReportState::Pending,
            ReportState::VERIFIED => ReportState::Verified {
                verified_by: UserId(required(T, "verified_by", self.verified_by)?),
                verified_at: required(T, "verified_at", self.verified_at)?,
            },
            ReportState::RESOLVED => ReportState::Resolved {
                verified_by: UserId(required(T, "verified_by", self.verified_by)?),
                verified_at: required(T, "verified_at", self.verified_at)?,
                resolved_by: UserId(required(T, "resolved_by", self.resolved_by)?),
                resolved_at: required(T, "resolved_at", self.resolved_at)?,
                points_awarded: self.points_awarded,
            },
            ReportState::REJECTED => ReportState::Rejected {
                rejected_by: UserId(required(T, "rejected_by", self.rejected_by)?),
                rejected_at: required(T, "rejected_at", self.rejected_at)?,
                reason: self.rejection_reason.clone().unwrap_or_default(),
            },
            other => {
                return Err(StoreError::Corrupt {
                    table: T,
                    detail: format!("unknown status `{}`", other),
                });
            }
        };
        Ok(state)
    }
}

impl TryFrom<ReportRow> for WasteReport {
    type Error = StoreError;

    fn try_from(row: ReportRow) -> Result<Self, Self::Error> {
        let state = row.state()?;
        let photos = serde_json::from_value::<Vec<String>>(row.photos).map_err(|e| StoreError::Corrupt {
            table: "waste_reports",
            detail: format!("photos: {}", e),
        })?;
        let location = match (row.latitude, row.longitude) {
            (Some(latitude), Some(longitude)) => Some(Coordinate { latitude, longitude }),
            _ => None,
        };
        Ok(WasteReport {
            id: ReportId(row.id),
            reporter: UserId(row.user_id),
            zone_id: ZoneId(row.zone_id),
            district_id: DistrictId(row.district_id),
            fill_level: row.fill_level,
            priority: parse_column::<PriorityLevel>("waste_reports", &row.priority)?,
            description: row.description,
            photos,
            location,
            state,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::waste_reports)]
pub struct NewReportRow<'a> {
    pub user_id: i64,
    pub zone_id: i64,
    pub district_id: i64,
    pub fill_level: f64,
    pub priority: &'static str,
    pub description: Option<&'a str>,
    pub photos: serde_json::Value,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub status: &'static str,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'a> From<&'a NewReport> for NewReportRow<'a> {
    fn from(new: &'a NewReport) -> Self {
        NewReportRow {
            user_id: new.reporter.0,
            zone_id: new.zone_id.0,
            district_id: new.district_id.0,
            fill_level: new.fill_level,
            priority: new.priority.as_str(),
            description: new.description.as_deref(),
            photos: serde_json::Value::from(new.photos.clone()),
            latitude: new.location.map(|c| c.latitude),
            longitude: new.location.map(|c| c.longitude),
            status: ReportState::PENDING,
            created_at: new.created_at,
            updated_at: new.created_at,
        }
    }
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = schema::waste_reports)]
#[diesel(treat_none_as_null = true)]
pub struct ReportChanges {
    pub priority: &'static str,
    pub status: &'static str,
    pub verified_by: Option<i64>,
    pub verified_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<i64>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<i64>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub points_awarded: i32,
    pub updated_at: DateTime<Utc>,
}

impl From<&WasteReport> for ReportChanges {
    fn from(report: &WasteReport) -> Self {
        let mut changes = ReportChanges {
            priority: report.priority.as_str(),
            status: report.state.name(),
            verified_by: None,
            verified_at: None,
            resolved_by: None,
            resolved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            points_awarded: report.state.points_awarded(),
            updated_at: Utc::now(),
        };
        match &report.state {
            ReportState::Pending => {}
            ReportState::Verified {
                verified_by,
                verified_at,
            } => {
                changes.verified_by = Some(verified_by.0);
                changes.verified_at = Some(*verified_at);
            }
            ReportState::Resolved {
                verified_by,
                verified_at,
                resolved_by,
                resolved_at,
                ..
            } => {
                changes.verified_by = Some(verified_by.0);
                changes.verified_at = Some(*verified_at);
                changes.resolved_by = Some(resolved_by.0);
                changes.resolved_at = Some(*resolved_at);
            }
            ReportState::Rejected {
                rejected_by,
                rejected_at,
                reason,
            } => {
                changes.rejected_by = Some(rejected_by.0);
                changes.rejected_at = Some(*rejected_at);
                changes.rejection_reason = Some(reason.clone());
            }
        }
        changes
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::report_actions)]
#[diesel(belongs_to(ReportRow, foreign_key = report_id))]
pub struct ReportActionRow {
    pub id: i64,
    pub report_id: i64,
    pub user_id: i64,
    pub action_type: String,
    pub data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ReportActionRow> for ReportAction {
    type Error = StoreError;

    fn try_from(row: ReportActionRow) -> Result<Self, Self::Error> {
        Ok(ReportAction {
            id: ActionId(row.id),
            report_id: ReportId(row.report_id),
            user_id: UserId(row.user_id),
            action_type: parse_column::<ActionType>("report_actions", &row.action_type)?,
            data: row.data,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::report_actions)]
pub struct NewReportActionRow<'a> {
    pub report_id: i64,
    pub user_id: i64,
    pub action_type: &'static str,
    pub data: Option<&'a serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl<'a> From<&'a NewReportAction> for NewReportActionRow<'a> {
    fn from(new: &'a NewReportAction) -> Self {
        NewReportActionRow {
            report_id: new.report_id.0,
            user_id: new.user_id.0,
            action_type: new.action_type.as_str(),
            data: new.data.as_ref(),
            created_at: new.created_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::collection_schedules)]
#[diesel(belongs_to(ZoneRow, foreign_key = zone_id))]
pub struct ScheduleRow {
    pub id: i64,
    pub zone_id: i64,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub assigned_to: Option<i64>,
    pub status: String,
    pub notes: Option<String>,
    pub estimated_duration_minutes: Option<i32>,
    pub actual_duration_minutes: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ScheduleRow> for CollectionSchedule {
    type Error = StoreError;

    fn try_from(row: ScheduleRow) -> Result<Self, Self::Error> {
        const T: &str = "collection_schedules";
        let state = match row.status.as_str() {
            ScheduleState::PENDING => ScheduleState::Pending,
            ScheduleState::IN_PROGRESS => ScheduleState::InProgress {
                started_at: required(T, "started_at", row.started_at)?,
            },
            ScheduleState::COMPLETED => ScheduleState::Completed {
                started_at: required(T, "started_at", row.started_at)?,
                completed_at: required(T, "completed_at", row.completed_at)?,
                actual_duration_minutes: required(T, "actual_duration_minutes", row.actual_duration_minutes)?,
            },
            ScheduleState::CANCELLED => ScheduleState::Cancelled {
                started_at: row.started_at,
                cancelled_at: required(T, "cancelled_at", row.cancelled_at)?,
            },
            other => {
                return Err(StoreError::Corrupt {
                    table: T,
                    detail: format!("unknown status `{}`", other),
                });
            }
        };
        Ok(CollectionSchedule {
            id: ScheduleId(row.id),
            zone_id: ZoneId(row.zone_id),
            scheduled_at: row.scheduled_at,
            assigned_to: row.assigned_to.map(UserId),
            state,
            notes: row.notes,
            estimated_duration_minutes: row.estimated_duration_minutes,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::collection_schedules)]
pub struct NewScheduleRow<'a> {
    pub zone_id: i64,
    pub scheduled_at: DateTime<Utc>,
    pub status: &'static str,
    pub notes: Option<&'a str>,
    pub estimated_duration_minutes: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'a> From<&'a NewSchedule> for NewScheduleRow<'a> {
    fn from(new: &'a NewSchedule) -> Self {
        NewScheduleRow {
            zone_id: new.zone_id.0,
            scheduled_at: new.scheduled_at,
            status: ScheduleState::PENDING,
            notes: new.notes.as_deref(),
            estimated_duration_minutes: new.estimated_duration_minutes,
            created_at: new.created_at,
            updated_at: new.created_at,
        }
    }
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = schema::collection_schedules)]
#[diesel(treat_none_as_null = true)]
pub struct ScheduleChanges {
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub assigned_to: Option<i64>,
    pub status: &'static str,
    pub notes: Option<String>,
    pub actual_duration_minutes: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

impl From<&CollectionSchedule> for ScheduleChanges {
    fn from(schedule: &CollectionSchedule) -> Self {
        let (started_at, completed_at, cancelled_at, actual) = match schedule.state {
            ScheduleState::Pending => (None, None, None, None),
            ScheduleState::InProgress { started_at } => (Some(started_at), None, None, None),
            ScheduleState::Completed {
                started_at,
                completed_at,
                actual_duration_minutes,
            } => (Some(started_at), Some(completed_at), None, Some(actual_duration_minutes)),
            ScheduleState::Cancelled {
                started_at,
                cancelled_at,
            } => (started_at, None, Some(cancelled_at), None),
        };
        ScheduleChanges {
            scheduled_at: schedule.scheduled_at,
            started_at,
            completed_at,
            cancelled_at,
            assigned_to: schedule.assigned_to.map(|u| u.0),
            status: schedule.state.name(),
            notes: schedule.notes.clone(),
            actual_duration_minutes: actual,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::achievements)]
pub struct AchievementRow {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub icon: Option<String>,
    pub condition_type: String,
    pub condition_value: i64,
    pub points_required: i64,
    pub is_active: bool,
}

impl TryFrom<AchievementRow> for Achievement {
    type Error = StoreError;

    fn try_from(row: AchievementRow) -> Result<Self, Self::Error> {
        Ok(Achievement {
            id: AchievementId(row.id),
            name: row.name,
            description: row.description,
            icon: row.icon,
            condition_type: parse_column::<ConditionType>("achievements", &row.condition_type)?,
            condition_value: row.condition_value,
            points_required: row.points_required,
            is_active: row.is_active,
        })
    }
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = schema::achievements)]
#[diesel(treat_none_as_null = true)]
pub struct NewAchievementRow<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub icon: Option<&'a str>,
    pub condition_type: &'static str,
    pub condition_value: i64,
    pub points_required: i64,
    pub is_active: bool,
}

impl<'a> From<&'a NewAchievement> for NewAchievementRow<'a> {
    fn from(new: &'a NewAchievement) -> Self {
        NewAchievementRow {
            name: &new.name,
            description: &new.description,
            icon: new.icon.as_deref(),
            condition_type: new.condition_type.as_str(),
            condition_value: new.condition_value,
            points_required: new.points_required,
            is_active: new.is_active,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::user_achievements)]
pub struct UserAchievementRow {
    pub user_id: i64,
    pub achievement_id: i64,
    pub earned_at: DateTime<Utc>,
    pub points_earned: i64,
}

impl From<UserAchievementRow> for UserAchievement {
    fn from(row: UserAchievementRow) -> Self {
        UserAchievement {
            user_id: UserId(row.user_id),
            achievement_id: AchievementId(row.achievement_id),
            earned_at: row.earned_at,
            points_earned: row.points_earned,
        }
    }
}

impl From<&UserAchievement> for UserAchievementRow {
    fn from(earned: &UserAchievement) -> Self {
        UserAchievementRow {
            user_id: earned.user_id.0,
            achievement_id: earned.achievement_id.0,
            earned_at: earned.earned_at,
            points_earned: earned.points_earned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn resolved_row() -> ReportRow {
        let at = Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap();
        ReportRow {
            id: 5,
            user_id: 2,
            zone_id: 3,
            district_id: 1,
            fill_level: 92.0,
            priority: "high".into(),
            description: Some("débordement".into()),
            photos: serde_json::json!(["a.jpg"]),
            latitude: Some(33.5),
            longitude: Some(-7.6),
            status: "resolved".into(),
            verified_by: Some(9),
            verified_at: Some(at),
            resolved_by: Some(10),
            resolved_at: Some(at),
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            points_awarded: 20,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn report_row_maps_to_tagged_state() {
        let report = WasteReport::try_from(resolved_row()).unwrap();
        assert_eq!(report.state.points_awarded(), 20);
        assert_eq!(report.photos, vec!["a.jpg".to_string()]);
        assert!(report.location.is_some());

        let changes = ReportChanges::from(&report);
        assert_eq!(changes.status, "resolved");
        assert_eq!(changes.resolved_by, Some(10));
        assert_eq!(changes.rejected_by, None);
    }

    #[test]
    fn inconsistent_report_row_is_corrupt() {
        let mut row = resolved_row();
        row.resolved_by = None;
        let err = WasteReport::try_from(row).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { table: "waste_reports", .. }));

        let mut row = resolved_row();
        row.status = "archived".into();
        assert!(WasteReport::try_from(row).is_err());
    }

    #[test]
    fn cancelled_run_keeps_its_start_time() {
        let at = Utc.with_ymd_and_hms(2024, 2, 1, 7, 30, 0).unwrap();
        let cancelled_at = at + chrono::Duration::minutes(40);
        let row = ScheduleRow {
            id: 4,
            zone_id: 3,
            scheduled_at: at,
            started_at: Some(at),
            completed_at: None,
            cancelled_at: Some(cancelled_at),
            assigned_to: Some(10),
            status: "cancelled".into(),
            notes: None,
            estimated_duration_minutes: Some(30),
            actual_duration_minutes: None,
            created_at: at,
            updated_at: cancelled_at,
        };
        let schedule = CollectionSchedule::try_from(row).unwrap();
        assert_eq!(
            schedule.state,
            ScheduleState::Cancelled {
                started_at: Some(at),
                cancelled_at,
            }
        );

        let changes = ScheduleChanges::from(&schedule);
        assert_eq!(changes.status, "cancelled");
        assert_eq!(changes.started_at, Some(at));
        assert_eq!(changes.cancelled_at, Some(cancelled_at));
    }
}
