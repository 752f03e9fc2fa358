//! In-process store backed by ordered maps.
//!
//! Transactions snapshot the tables and restore them when the closure fails,
//! so rollback behaves like the database store. Row locks are no-ops: a
//! `MemoryStore` is owned by a single engine.

use std::collections::BTreeMap;

use super::Store;
use crate::domain::{
    Achievement, AchievementId, ActionId, CollectionSchedule, DistrictId, Entity, NewAchievement, NewReport,
    NewReportAction, NewSchedule, NewUser, NewZone, PriorityLevel, ReportAction, ReportId, ReportState,
    ReportSummary, ScheduleId, ScheduleState, User, UserAchievement, UserId, WasteReport, Zone, ZoneId,
};
use crate::error::EngineError;

#[derive(Debug, Clone, Default)]
struct Tables {
    districts: BTreeMap<DistrictId, (String, Option<String>)>,
    users: BTreeMap<UserId, User>,
    zones: BTreeMap<ZoneId, Zone>,
    reports: BTreeMap<ReportId, WasteReport>,
    actions: Vec<ReportAction>,
    schedules: BTreeMap<ScheduleId, CollectionSchedule>,
    achievements: BTreeMap<AchievementId, Achievement>,
    user_achievements: BTreeMap<(UserId, AchievementId), UserAchievement>,
    last_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Tables,
    pending_balance_races: u32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` balance writes lose against a simulated
    /// concurrent writer, as a stale optimistic version would in Postgres.
    pub fn race_next_balance_writes(&mut self, count: u32) {
        self.pending_balance_races = count;
    }

    pub fn district_name(&self, id: DistrictId) -> Option<&str> {
        self.tables.districts.get(&id).map(|(name, _)| name.as_str())
    }
}

impl Store for MemoryStore {
    fn transaction<T, F>(&mut self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Self) -> Result<T, EngineError>,
    {
        let snapshot = self.tables.clone();
        let result = f(self);
        if result.is_err() {
            self.tables = snapshot;
        }
        result
    }

    fn insert_district(&mut self, name: &str, city: Option<&str>) -> Result<DistrictId, EngineError> {
        let existing = self
            .tables
            .districts
            .iter()
            .find(|(_, (n, c))| n == name && c.as_deref() == city)
            .map(|(id, _)| *id);
        if let Some(id) = existing {
            return Ok(id);
        }
        let id = DistrictId(self.tables.next_id());
        self.tables
            .districts
            .insert(id, (name.to_string(), city.map(str::to_string)));
        Ok(id)
    }

    fn insert_user(&mut self, new: &NewUser) -> Result<User, EngineError> {
        if self.tables.users.values().any(|u| u.username == new.username) {
            return Err(EngineError::InvalidInput(format!("username `{}` already taken", new.username)));
        }
        let user = User {
            id: UserId(self.tables.next_id()),
            username: new.username.clone(),
            role: new.role,
            points: 0,
            level: 1,
            district_id: new.district_id,
            is_active: true,
            version: 0,
        };
        self.tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    fn insert_zone(&mut self, new: &NewZone) -> Result<Zone, EngineError> {
        let zone = Zone {
            id: ZoneId(self.tables.next_id()),
            district_id: new.district_id,
            name: new.name.clone(),
            location: new.location,
            capacity_liters: new.capacity_liters,
            current_fill_level: 0.0,
            radius_meters: new.radius_meters,
            priority_level: PriorityLevel::Low,
            zone_type: new.zone_type,
            last_emptied_at: None,
            next_collection_at: None,
            is_active: true,
        };
        self.tables.zones.insert(zone.id, zone.clone());
        Ok(zone)
    }

    fn zone(&mut self, id: ZoneId) -> Result<Zone, EngineError> {
        self.tables
            .zones
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(Entity::Zone, id.0))
    }

    fn lock_zone(&mut self, id: ZoneId) -> Result<Zone, EngineError> {
        self.zone(id)
    }

    fn save_zone(&mut self, zone: &Zone) -> Result<(), EngineError> {
        let slot = self
            .tables
            .zones
            .get_mut(&zone.id)
            .ok_or_else(|| EngineError::not_found(Entity::Zone, zone.id.0))?;
        *slot = zone.clone();
        Ok(())
    }

    fn active_zones(&mut self) -> Result<Vec<Zone>, EngineError> {
        Ok(self.tables.zones.values().filter(|z| z.is_active).cloned().collect())
    }

    fn user(&mut self, id: UserId) -> Result<User, EngineError> {
        self.tables
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(Entity::User, id.0))
    }

    fn user_by_username(&mut self, username: &str) -> Result<Option<User>, EngineError> {
        Ok(self.tables.users.values().find(|u| u.username == username).cloned())
    }

    fn save_user_balance(&mut self, user: &User) -> Result<User, EngineError> {
        let race = self.pending_balance_races > 0;
        let stored = self
            .tables
            .users
            .get_mut(&user.id)
            .ok_or_else(|| EngineError::not_found(Entity::User, user.id.0))?;
        if race {
            self.pending_balance_races -= 1;
            stored.version += 1;
        }
        if stored.version != user.version {
            return Err(EngineError::conflict(Entity::User, user.id.0));
        }
        stored.points = user.points;
        stored.level = user.level;
        stored.version += 1;
        Ok(stored.clone())
    }

    fn insert_report(&mut self, new: &NewReport) -> Result<WasteReport, EngineError> {
        let report = WasteReport {
            id: ReportId(self.tables.next_id()),
            reporter: new.reporter,
            zone_id: new.zone_id,
            district_id: new.district_id,
            fill_level: new.fill_level,
            priority: new.priority,
            description: new.description.clone(),
            photos: new.photos.clone(),
            location: new.location,
            state: ReportState::Pending,
            created_at: new.created_at,
        };
        self.tables.reports.insert(report.id, report.clone());
        Ok(report)
    }

    fn report(&mut self, id: ReportId) -> Result<WasteReport, EngineError> {
        self.tables
            .reports
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(Entity::Report, id.0))
    }

    fn lock_report(&mut self, id: ReportId) -> Result<WasteReport, EngineError> {
        self.report(id)
    }

    fn save_report(&mut self, report: &WasteReport) -> Result<(), EngineError> {
        let slot = self
            .tables
            .reports
            .get_mut(&report.id)
            .ok_or_else(|| EngineError::not_found(Entity::Report, report.id.0))?;
        *slot = report.clone();
        Ok(())
    }

    fn verified_reports_in_zone(&mut self, zone: ZoneId) -> Result<Vec<WasteReport>, EngineError> {
        Ok(self
            .tables
            .reports
            .values()
            .filter(|r| r.zone_id == zone && matches!(r.state, ReportState::Verified { .. }))
            .cloned()
            .collect())
    }

    fn count_earlier_reports(&mut self, user: UserId, zone: ZoneId, report: ReportId) -> Result<i64, EngineError> {
        let count = self
            .tables
            .reports
            .values()
            .filter(|r| r.reporter == user && r.zone_id == zone && r.id < report)
            .count();
        Ok(count as i64)
    }

    fn report_history(&mut self, user: UserId) -> Result<Vec<ReportSummary>, EngineError> {
        Ok(self
            .tables
            .reports
            .values()
            .filter(|r| r.reporter == user)
            .map(|r| ReportSummary {
                zone_id: r.zone_id,
                created_at: r.created_at,
                rejected: matches!(r.state, ReportState::Rejected { .. }),
            })
            .collect())
    }

    fn append_action(&mut self, action: &NewReportAction) -> Result<ReportAction, EngineError> {
        if !self.tables.reports.contains_key(&action.report_id) {
            return Err(EngineError::not_found(Entity::Report, action.report_id.0));
        }
        let row = ReportAction {
            id: ActionId(self.tables.next_id()),
            report_id: action.report_id,
            user_id: action.user_id,
            action_type: action.action_type,
            data: action.data.clone(),
            created_at: action.created_at,
        };
        self.tables.actions.push(row.clone());
        Ok(row)
    }

    fn report_actions(&mut self, report: ReportId) -> Result<Vec<ReportAction>, EngineError> {
        Ok(self
            .tables
            .actions
            .iter()
            .filter(|a| a.report_id == report)
            .cloned()
            .collect())
    }

    fn insert_schedule(&mut self, new: &NewSchedule) -> Result<CollectionSchedule, EngineError> {
        let schedule = CollectionSchedule {
            id: ScheduleId(self.tables.next_id()),
            zone_id: new.zone_id,
            scheduled_at: new.scheduled_at,
            assigned_to: None,
            state: ScheduleState::Pending,
            notes: new.notes.clone(),
            estimated_duration_minutes: new.estimated_duration_minutes,
            created_at: new.created_at,
        };
        self.tables.schedules.insert(schedule.id, schedule.clone());
        Ok(schedule)
    }

    fn schedule(&mut self, id: ScheduleId) -> Result<CollectionSchedule, EngineError> {
        self.tables
            .schedules
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(Entity::Schedule, id.0))
    }

    fn save_schedule(&mut self, schedule: &CollectionSchedule) -> Result<(), EngineError> {
        let slot = self
            .tables
            .schedules
            .get_mut(&schedule.id)
            .ok_or_else(|| EngineError::not_found(Entity::Schedule, schedule.id.0))?;
        *slot = schedule.clone();
        Ok(())
    }

    fn active_schedule_for_zone(&mut self, zone: ZoneId) -> Result<Option<CollectionSchedule>, EngineError> {
        Ok(self
            .tables
            .schedules
            .values()
            .find(|s| s.zone_id == zone && s.is_active())
            .cloned())
    }

    fn schedules_for_zone(&mut self, zone: ZoneId) -> Result<Vec<CollectionSchedule>, EngineError> {
        Ok(self
            .tables
            .schedules
            .values()
            .filter(|s| s.zone_id == zone)
            .cloned()
            .collect())
    }

    fn upsert_achievement(&mut self, new: &NewAchievement) -> Result<Achievement, EngineError> {
        let existing = self
            .tables
            .achievements
            .values()
            .find(|a| a.name == new.name)
            .map(|a| a.id);
        let id = match existing {
            Some(id) => id,
            None => AchievementId(self.tables.next_id()),
        };
        let achievement = Achievement {
            id,
            name: new.name.clone(),
            description: new.description.clone(),
            icon: new.icon.clone(),
            condition_type: new.condition_type,
            condition_value: new.condition_value,
            points_required: new.points_required,
            is_active: new.is_active,
        };
        self.tables.achievements.insert(id, achievement.clone());
        Ok(achievement)
    }

    fn active_achievements(&mut self) -> Result<Vec<Achievement>, EngineError> {
        Ok(self
            .tables
            .achievements
            .values()
            .filter(|a| a.is_active)
            .cloned()
            .collect())
    }

    fn user_achievements(&mut self, user: UserId) -> Result<Vec<UserAchievement>, EngineError> {
        Ok(self
            .tables
            .user_achievements
            .values()
            .filter(|ua| ua.user_id == user)
            .cloned()
            .collect())
    }

    fn insert_user_achievement(&mut self, earned: &UserAchievement) -> Result<bool, EngineError> {
        let key = (earned.user_id, earned.achievement_id);
        if self.tables.user_achievements.contains_key(&key) {
            return Ok(false);
        }
        self.tables.user_achievements.insert(key, earned.clone());
        Ok(true)
    }
}
