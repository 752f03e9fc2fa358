//! Postgres store on a single diesel connection.
//!
//! Transactions are driven through the connection's transaction manager so
//! that the engine's closure can keep borrowing the store; nested calls become
//! savepoints. Zone and report locks are `SELECT ... FOR UPDATE`.

use chrono::{DateTime, Utc};
use diesel::PgConnection;
use diesel::connection::TransactionManager;
use diesel::prelude::*;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use log::{debug, info, warn};

use super::Store;
use crate::db::models::{
    AchievementRow, NewAchievementRow, NewDistrictRow, NewReportActionRow, NewReportRow, NewScheduleRow, NewUserRow,
    NewZoneRow, ReportActionRow, ReportChanges, ReportRow, ScheduleChanges, ScheduleRow, UserAchievementRow,
    UserRow, ZoneChanges, ZoneRow,
};
use crate::domain::{
    Achievement, CollectionSchedule, DistrictId, Entity, NewAchievement, NewReport, NewReportAction, NewSchedule,
    NewUser, NewZone, ReportAction, ReportId, ReportState, ReportSummary, ScheduleId, ScheduleState, User,
    UserAchievement, UserId, WasteReport, Zone, ZoneId,
};
use crate::error::{EngineError, StoreError};
use crate::schema;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

type PgTransactionManager = <PgConnection as Connection>::TransactionManager;

pub struct PgStore {
    conn: PgConnection,
}

impl PgStore {
    pub fn connect(database_url: &str) -> Result<Self, StoreError> {
        let conn = PgConnection::establish(database_url).map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { conn })
    }

    pub fn new(conn: PgConnection) -> Self {
        Self { conn }
    }

    pub fn apply_migrations(&mut self) -> Result<(), String> {
        match self.conn.run_pending_migrations(MIGRATIONS) {
            Ok(applied) => {
                if applied.is_empty() {
                    info!("Database schema is up to date; no migrations were applied");
                } else {
                    let names = applied.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
                    info!("Applied {} database migration(s): {}", applied.len(), names);
                }
                Ok(())
            }
            Err(e) => Err(format!("Applying database migrations failed: {}", e)),
        }
    }
}

fn collect_rows<R, T>(rows: Vec<R>) -> Result<Vec<T>, EngineError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter()
        .map(|row| T::try_from(row).map_err(EngineError::from))
        .collect()
}

impl Store for PgStore {
    fn transaction<T, F>(&mut self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Self) -> Result<T, EngineError>,
    {
        PgTransactionManager::begin_transaction(&mut self.conn)?;
        match f(self) {
            Ok(value) => {
                PgTransactionManager::commit_transaction(&mut self.conn)?;
                Ok(value)
            }
            Err(err) => {
                debug!("rolling back transaction: {}", err);
                if let Err(rollback) = PgTransactionManager::rollback_transaction(&mut self.conn) {
                    warn!("rollback failed after `{}`: {}", err, rollback);
                }
                Err(err)
            }
        }
    }

    fn insert_district(&mut self, name: &str, city: Option<&str>) -> Result<DistrictId, EngineError> {
        use schema::districts::dsl as D;

        let candidates = D::districts
            .filter(D::name.eq(name))
            .select((D::id, D::city))
            .load::<(i64, Option<String>)>(&mut self.conn)?;
        if let Some((id, _)) = candidates.into_iter().find(|(_, c)| c.as_deref() == city) {
            return Ok(DistrictId(id));
        }

        let id: i64 = diesel::insert_into(D::districts)
            .values(&NewDistrictRow { name, city })
            .returning(D::id)
            .get_result(&mut self.conn)?;
        Ok(DistrictId(id))
    }

    fn insert_user(&mut self, new: &NewUser) -> Result<User, EngineError> {
        use schema::users::dsl as U;

        let row: UserRow = diesel::insert_into(U::users)
            .values(&NewUserRow::from(new))
            .returning(UserRow::as_returning())
            .get_result(&mut self.conn)?;
        Ok(User::try_from(row)?)
    }

    fn insert_zone(&mut self, new: &NewZone) -> Result<Zone, EngineError> {
        use schema::zones::dsl as Z;

        let row: ZoneRow = diesel::insert_into(Z::zones)
            .values(&NewZoneRow::from(new))
            .returning(ZoneRow::as_returning())
            .get_result(&mut self.conn)?;
        Ok(Zone::try_from(row)?)
    }

    fn zone(&mut self, id: ZoneId) -> Result<Zone, EngineError> {
        use schema::zones::dsl as Z;

        let row: Option<ZoneRow> = Z::zones
            .find(id.0)
            .select(ZoneRow::as_select())
            .first(&mut self.conn)
            .optional()?;
        let row = row.ok_or_else(|| EngineError::not_found(Entity::Zone, id.0))?;
        Ok(Zone::try_from(row)?)
    }

    fn lock_zone(&mut self, id: ZoneId) -> Result<Zone, EngineError> {
        use schema::zones::dsl as Z;

        let row: Option<ZoneRow> = Z::zones
            .find(id.0)
            .select(ZoneRow::as_select())
            .for_update()
            .first(&mut self.conn)
            .optional()?;
        let row = row.ok_or_else(|| EngineError::not_found(Entity::Zone, id.0))?;
        Ok(Zone::try_from(row)?)
    }

    fn save_zone(&mut self, zone: &Zone) -> Result<(), EngineError> {
        use schema::zones::dsl as Z;

        let updated = diesel::update(Z::zones.find(zone.id.0))
            .set(ZoneChanges::from(zone))
            .execute(&mut self.conn)?;
        if updated == 0 {
            return Err(EngineError::not_found(Entity::Zone, zone.id.0));
        }
        Ok(())
    }

    fn active_zones(&mut self) -> Result<Vec<Zone>, EngineError> {
        use schema::zones::dsl as Z;

        let rows = Z::zones
            .filter(Z::is_active.eq(true))
            .order(Z::id.asc())
            .select(ZoneRow::as_select())
            .load(&mut self.conn)?;
        collect_rows(rows)
    }

    fn user(&mut self, id: UserId) -> Result<User, EngineError> {
        use schema::users::dsl as U;

        let row: Option<UserRow> = U::users
            .find(id.0)
            .select(UserRow::as_select())
            .first(&mut self.conn)
            .optional()?;
        let row = row.ok_or_else(|| EngineError::not_found(Entity::User, id.0))?;
        Ok(User::try_from(row)?)
    }

    fn user_by_username(&mut self, username: &str) -> Result<Option<User>, EngineError> {
        use schema::users::dsl as U;

        let row: Option<UserRow> = U::users
            .filter(U::username.eq(username))
            .select(UserRow::as_select())
            .first(&mut self.conn)
            .optional()?;
        Ok(row.map(User::try_from).transpose()?)
    }

    fn save_user_balance(&mut self, user: &User) -> Result<User, EngineError> {
        use schema::users::dsl as U;

        let updated = diesel::update(U::users.filter(U::id.eq(user.id.0)).filter(U::version.eq(user.version)))
            .set((
                U::points.eq(user.points),
                U::level.eq(user.level),
                U::version.eq(user.version + 1),
                U::updated_at.eq(Utc::now()),
            ))
            .execute(&mut self.conn)?;
        if updated == 0 {
            // Surface NotFound for a missing row, otherwise the version moved on.
            self.user(user.id)?;
            return Err(EngineError::conflict(Entity::User, user.id.0));
        }
        self.user(user.id)
    }

    fn insert_report(&mut self, new: &NewReport) -> Result<WasteReport, EngineError> {
        use schema::waste_reports::dsl as R;

        let row: ReportRow = diesel::insert_into(R::waste_reports)
            .values(&NewReportRow::from(new))
            .returning(ReportRow::as_returning())
            .get_result(&mut self.conn)?;
        Ok(WasteReport::try_from(row)?)
    }

    fn report(&mut self, id: ReportId) -> Result<WasteReport, EngineError> {
        use schema::waste_reports::dsl as R;

        let row: Option<ReportRow> = R::waste_reports
            .find(id.0)
            .select(ReportRow::as_select())
            .first(&mut self.conn)
            .optional()?;
        let row = row.ok_or_else(|| EngineError::not_found(Entity::Report, id.0))?;
        Ok(WasteReport::try_from(row)?)
    }

    fn lock_report(&mut self, id: ReportId) -> Result<WasteReport, EngineError> {
        use schema::waste_reports::dsl as R;

        let row: Option<ReportRow> = R::waste_reports
            .find(id.0)
            .select(ReportRow::as_select())
            .for_update()
            .first(&mut self.conn)
            .optional()?;
        let row = row.ok_or_else(|| EngineError::not_found(Entity::Report, id.0))?;
        Ok(WasteReport::try_from(row)?)
    }

    fn save_report(&mut self, report: &WasteReport) -> Result<(), EngineError> {
        use schema::waste_reports::dsl as R;

        let updated = diesel::update(R::waste_reports.find(report.id.0))
            .set(ReportChanges::from(report))
            .execute(&mut self.conn)?;
        if updated == 0 {
            return Err(EngineError::not_found(Entity::Report, report.id.0));
        }
        Ok(())
    }

    fn verified_reports_in_zone(&mut self, zone: ZoneId) -> Result<Vec<WasteReport>, EngineError> {
        use schema::waste_reports::dsl as R;

        let rows = R::waste_reports
            .filter(R::zone_id.eq(zone.0))
            .filter(R::status.eq(ReportState::VERIFIED))
            .order(R::id.asc())
            .select(ReportRow::as_select())
            .load(&mut self.conn)?;
        collect_rows(rows)
    }

    fn count_earlier_reports(&mut self, user: UserId, zone: ZoneId, report: ReportId) -> Result<i64, EngineError> {
        use schema::waste_reports::dsl as R;

        let count = R::waste_reports
            .filter(R::user_id.eq(user.0))
            .filter(R::zone_id.eq(zone.0))
            .filter(R::id.lt(report.0))
            .count()
            .get_result::<i64>(&mut self.conn)?;
        Ok(count)
    }

    fn report_history(&mut self, user: UserId) -> Result<Vec<ReportSummary>, EngineError> {
        use schema::waste_reports::dsl as R;

        let rows = R::waste_reports
            .filter(R::user_id.eq(user.0))
            .order(R::created_at.asc())
            .select((R::zone_id, R::created_at, R::status))
            .load::<(i64, DateTime<Utc>, String)>(&mut self.conn)?;
        Ok(rows
            .into_iter()
            .map(|(zone_id, created_at, status)| ReportSummary {
                zone_id: ZoneId(zone_id),
                created_at,
                rejected: status == ReportState::REJECTED,
            })
            .collect())
    }

    fn append_action(&mut self, action: &NewReportAction) -> Result<ReportAction, EngineError> {
        use schema::report_actions::dsl as RA;

        let row: ReportActionRow = diesel::insert_into(RA::report_actions)
            .values(&NewReportActionRow::from(action))
            .returning(ReportActionRow::as_returning())
            .get_result(&mut self.conn)?;
        Ok(ReportAction::try_from(row)?)
    }

    fn report_actions(&mut self, report: ReportId) -> Result<Vec<ReportAction>, EngineError> {
        use schema::report_actions::dsl as RA;

        let rows = RA::report_actions
            .filter(RA::report_id.eq(report.0))
            .order(RA::id.asc())
            .select(ReportActionRow::as_select())
            .load(&mut self.conn)?;
        collect_rows(rows)
    }

    fn insert_schedule(&mut self, new: &NewSchedule) -> Result<CollectionSchedule, EngineError> {
        use schema::collection_schedules::dsl as S;

        let row: ScheduleRow = diesel::insert_into(S::collection_schedules)
            .values(&NewScheduleRow::from(new))
            .returning(ScheduleRow::as_returning())
            .get_result(&mut self.conn)?;
        Ok(CollectionSchedule::try_from(row)?)
    }

    fn schedule(&mut self, id: ScheduleId) -> Result<CollectionSchedule, EngineError> {
        use schema::collection_schedules::dsl as S;

        let row: Option<ScheduleRow> = S::collection_schedules
            .find(id.0)
            .select(ScheduleRow::as_select())
            .first(&mut self.conn)
            .optional()?;
        let row = row.ok_or_else(|| EngineError::not_found(Entity::Schedule, id.0))?;
        Ok(CollectionSchedule::try_from(row)?)
    }

    fn save_schedule(&mut self, schedule: &CollectionSchedule) -> Result<(), EngineError> {
        use schema::collection_schedules::dsl as S;

        let updated = diesel::update(S::collection_schedules.find(schedule.id.0))
            .set(ScheduleChanges::from(schedule))
            .execute(&mut self.conn)?;
        if updated == 0 {
            return Err(EngineError::not_found(Entity::Schedule, schedule.id.0));
        }
        Ok(())
    }

    fn active_schedule_for_zone(&mut self, zone: ZoneId) -> Result<Option<CollectionSchedule>, EngineError> {
        use schema::collection_schedules::dsl as S;

        let row: Option<ScheduleRow> = S::collection_schedules
            .filter(S::zone_id.eq(zone.0))
            .filter(S::status.eq_any([ScheduleState::PENDING, ScheduleState::IN_PROGRESS]))
            .order(S::id.asc())
            .select(ScheduleRow::as_select())
            .first(&mut self.conn)
            .optional()?;
        match row {
            Some(row) => Ok(Some(CollectionSchedule::try_from(row)?)),
            None => Ok(None),
        }
    }

    fn schedules_for_zone(&mut self, zone: ZoneId) -> Result<Vec<CollectionSchedule>, EngineError> {
        use schema::collection_schedules::dsl as S;

        let rows = S::collection_schedules
            .filter(S::zone_id.eq(zone.0))
            .order(S::id.asc())
            .select(ScheduleRow::as_select())
            .load(&mut self.conn)?;
        collect_rows(rows)
    }

    fn upsert_achievement(&mut self, new: &NewAchievement) -> Result<Achievement, EngineError> {
        use schema::achievements::dsl as A;

        let row = NewAchievementRow::from(new);
        let stored: AchievementRow = diesel::insert_into(A::achievements)
            .values(&row)
            .on_conflict(A::name)
            .do_update()
            .set(&row)
            .returning(AchievementRow::as_returning())
            .get_result(&mut self.conn)?;
        Ok(Achievement::try_from(stored)?)
    }

    fn active_achievements(&mut self) -> Result<Vec<Achievement>, EngineError> {
        use schema::achievements::dsl as A;

        let rows = A::achievements
            .filter(A::is_active.eq(true))
            .order(A::id.asc())
            .select(AchievementRow::as_select())
            .load(&mut self.conn)?;
        collect_rows(rows)
    }

    fn user_achievements(&mut self, user: UserId) -> Result<Vec<UserAchievement>, EngineError> {
        use schema::user_achievements::dsl as UA;

        let rows = UA::user_achievements
            .filter(UA::user_id.eq(user.0))
            .order(UA::earned_at.asc())
            .select(UserAchievementRow::as_select())
            .load(&mut self.conn)?;
        Ok(rows.into_iter().map(UserAchievement::from).collect())
    }

    fn insert_user_achievement(&mut self, earned: &UserAchievement) -> Result<bool, EngineError> {
        use schema::user_achievements::dsl as UA;

        let inserted = diesel::insert_into(UA::user_achievements)
            .values(&UserAchievementRow::from(earned))
            .on_conflict((UA::user_id, UA::achievement_id))
            .do_nothing()
            .execute(&mut self.conn)?;
        Ok(inserted > 0)
    }
}
