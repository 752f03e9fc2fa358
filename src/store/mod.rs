//! Persistence collaborator consumed by the engine.
//!
//! Every engine operation runs inside [`Store::transaction`]; an `Err` from the
//! closure rolls back everything written through the store during that call.
//! The `lock_*` readers hold a row lock until the transaction ends so that
//! read-check-write sequences on the same zone or report are serialized.

use crate::domain::{
    Achievement, ActivityCounters, CollectionSchedule, DistrictId, NewAchievement, NewReport, NewReportAction,
    NewSchedule, NewUser, NewZone, ReportAction, ReportId, ReportSummary, ScheduleId, User, UserAchievement, UserId,
    WasteReport, Zone, ZoneId,
};
use crate::error::EngineError;

pub mod memory;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

pub trait Store {
    fn transaction<T, F>(&mut self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Self) -> Result<T, EngineError>;

    // Reference data
    fn insert_district(&mut self, name: &str, city: Option<&str>) -> Result<DistrictId, EngineError>;
    fn insert_user(&mut self, new: &NewUser) -> Result<User, EngineError>;
    fn insert_zone(&mut self, new: &NewZone) -> Result<Zone, EngineError>;

    // Zones
    fn zone(&mut self, id: ZoneId) -> Result<Zone, EngineError>;
    fn lock_zone(&mut self, id: ZoneId) -> Result<Zone, EngineError>;
    fn save_zone(&mut self, zone: &Zone) -> Result<(), EngineError>;
    fn active_zones(&mut self) -> Result<Vec<Zone>, EngineError>;

    // Users
    fn user(&mut self, id: UserId) -> Result<User, EngineError>;
    fn user_by_username(&mut self, username: &str) -> Result<Option<User>, EngineError>;
    /// Writes `points` and `level` when the stored version still equals
    /// `user.version`, returning the row with its new version. A stale version
    /// is a `ConcurrencyConflict`.
    fn save_user_balance(&mut self, user: &User) -> Result<User, EngineError>;

    // Reports
    fn insert_report(&mut self, new: &NewReport) -> Result<WasteReport, EngineError>;
    fn report(&mut self, id: ReportId) -> Result<WasteReport, EngineError>;
    fn lock_report(&mut self, id: ReportId) -> Result<WasteReport, EngineError>;
    fn save_report(&mut self, report: &WasteReport) -> Result<(), EngineError>;
    fn verified_reports_in_zone(&mut self, zone: ZoneId) -> Result<Vec<WasteReport>, EngineError>;
    /// Reports the user filed in the zone before `report`.
    fn count_earlier_reports(&mut self, user: UserId, zone: ZoneId, report: ReportId) -> Result<i64, EngineError>;
    fn report_history(&mut self, user: UserId) -> Result<Vec<ReportSummary>, EngineError>;
    fn append_action(&mut self, action: &NewReportAction) -> Result<ReportAction, EngineError>;
    fn report_actions(&mut self, report: ReportId) -> Result<Vec<ReportAction>, EngineError>;

    // Schedules
    fn insert_schedule(&mut self, new: &NewSchedule) -> Result<CollectionSchedule, EngineError>;
    fn schedule(&mut self, id: ScheduleId) -> Result<CollectionSchedule, EngineError>;
    fn save_schedule(&mut self, schedule: &CollectionSchedule) -> Result<(), EngineError>;
    fn active_schedule_for_zone(&mut self, zone: ZoneId) -> Result<Option<CollectionSchedule>, EngineError>;
    fn schedules_for_zone(&mut self, zone: ZoneId) -> Result<Vec<CollectionSchedule>, EngineError>;

    // Achievements
    fn upsert_achievement(&mut self, new: &NewAchievement) -> Result<Achievement, EngineError>;
    fn active_achievements(&mut self) -> Result<Vec<Achievement>, EngineError>;
    fn user_achievements(&mut self, user: UserId) -> Result<Vec<UserAchievement>, EngineError>;
    /// Returns `false` when the (user, achievement) pair already exists.
    fn insert_user_achievement(&mut self, earned: &UserAchievement) -> Result<bool, EngineError>;

    fn activity_counters(&mut self, user: UserId) -> Result<ActivityCounters, EngineError> {
        let points = self.user(user)?.points;
        let history = self.report_history(user)?;
        Ok(ActivityCounters::from_history(&history, points))
    }
}
