//! Zone state and scheduling engine.
//!
//! Each public operation is one unit of work: it runs inside a single store
//! transaction, is retried when an optimistic write loses a race, and
//! publishes its notifications only after the transaction committed.

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use std::num::NonZeroU32;

use crate::domain::{Actor, EngineEvent, Entity, PriorityLevel, UserId};
use crate::error::EngineError;
use crate::notify::NotificationSink;
use crate::store::Store;

pub mod achievements;
pub mod fill;
pub mod priority;
pub mod reports;
pub mod schedules;

pub use fill::FillSignal;
pub use reports::{ReportSubmission, Resolution};
pub use schedules::{QueueEntry, ScheduleRequest};

/// Points credited on resolution, by report priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointsTable {
    pub low: i32,
    pub medium: i32,
    pub high: i32,
    /// Extra points when the report is the reporter's first in that zone.
    pub first_zone_report_bonus: i32,
}

impl PointsTable {
    pub fn for_priority(&self, priority: PriorityLevel) -> i32 {
        match priority {
            PriorityLevel::Low => self.low,
            PriorityLevel::Medium => self.medium,
            PriorityLevel::High => self.high,
        }
    }
}

impl Default for PointsTable {
    fn default() -> Self {
        PointsTable {
            low: 5,
            medium: 10,
            high: 20,
            first_zone_report_bonus: 0,
        }
    }
}

/// How far ahead a new collection is scheduled, by zone priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleOffsets {
    pub high: Duration,
    pub medium: Duration,
    pub low: Duration,
}

impl ScheduleOffsets {
    pub fn for_priority(&self, priority: PriorityLevel) -> Duration {
        match priority {
            PriorityLevel::Low => self.low,
            PriorityLevel::Medium => self.medium,
            PriorityLevel::High => self.high,
        }
    }
}

impl Default for ScheduleOffsets {
    fn default() -> Self {
        ScheduleOffsets {
            high: Duration::hours(24),
            medium: Duration::hours(72),
            low: Duration::days(7),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub points: PointsTable,
    pub schedule_offsets: ScheduleOffsets,
    pub points_per_level: i64,
    /// Attempts per operation when an optimistic write conflicts.
    pub max_conflict_attempts: NonZeroU32,
    /// Create (or pull forward) a schedule as soon as a zone becomes urgent.
    pub auto_schedule_urgent: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            points: PointsTable::default(),
            schedule_offsets: ScheduleOffsets::default(),
            points_per_level: 100,
            max_conflict_attempts: NonZeroU32::new(3).unwrap_or(NonZeroU32::MIN),
            auto_schedule_urgent: true,
        }
    }
}

pub type Clock = Box<dyn Fn() -> DateTime<Utc>>;

/// State shared by the steps of one unit of work.
pub(crate) struct Unit<'a> {
    pub settings: &'a EngineSettings,
    pub now: DateTime<Utc>,
    pub events: Vec<EngineEvent>,
}

impl Unit<'_> {
    /// `now + offset`, refusing offsets that leave the representable calendar.
    pub fn after(&self, offset: Duration) -> Result<DateTime<Utc>, EngineError> {
        self.now.checked_add_signed(offset).ok_or_else(|| {
            EngineError::InvalidInput(format!("schedule offset of {} hours is out of range", offset.num_hours()))
        })
    }
}

pub struct Engine<S, N> {
    store: S,
    sink: N,
    settings: EngineSettings,
    clock: Clock,
}

impl<S: Store, N: NotificationSink> Engine<S, N> {
    pub fn new(store: S, sink: N, settings: EngineSettings) -> Self {
        Engine {
            store,
            sink,
            settings,
            clock: Box::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Resolves a user id handed over by the identity layer.
    pub fn actor(&mut self, user: UserId) -> Result<Actor, EngineError> {
        let user = self.store.user(user)?;
        if !user.is_active {
            return Err(EngineError::InvalidInput(format!("user {} is deactivated", user.id)));
        }
        Ok(user.actor())
    }

    /// Runs `op` in a transaction, retrying lost races and aborted transactions.
    pub(crate) fn run<T, F>(&mut self, op: &'static str, mut f: F) -> Result<T, EngineError>
    where
        F: FnMut(&mut S, &mut Unit<'_>) -> Result<T, EngineError>,
    {
        let max_attempts = self.settings.max_conflict_attempts.get();
        let now = (self.clock)();
        let mut attempt = 1;
        loop {
            let mut unit = Unit {
                settings: &self.settings,
                now,
                events: Vec::new(),
            };
            match self.store.transaction(|tx| f(tx, &mut unit)) {
                Ok(value) => {
                    publish_all(&self.sink, &unit.events);
                    return Ok(value);
                }
                Err(err) if err.is_conflict() => {
                    if attempt >= max_attempts {
                        return Err(match err {
                            EngineError::ConcurrencyConflict { entity, id, .. } => EngineError::ConcurrencyConflict {
                                entity,
                                id,
                                attempts: attempt,
                            },
                            other => {
                                warn!("{}: giving up after {} attempt(s): {}", op, attempt, other);
                                other
                            }
                        });
                    }
                    warn!("{}: {}, retrying (attempt {}/{})", op, err, attempt + 1, max_attempts);
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_noop() {
                        debug!("{}: {}", op, err);
                    }
                    return Err(err);
                }
            }
        }
    }
}

fn publish_all<N: NotificationSink>(sink: &N, events: &[EngineEvent]) {
    for event in events {
        sink.publish(event);
    }
}

#[cfg(test)]
pub(crate) mod testkit {
    //! Shared fixtures for engine tests.

    use super::*;
    use crate::domain::{Coordinate, DistrictId, NewUser, NewZone, Role, User, Zone, ZoneType};
    use crate::notify::MemorySink;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use std::cell::Cell;
    use std::rc::Rc;

    pub struct Fixture<'s> {
        pub engine: Engine<MemoryStore, &'s MemorySink>,
        pub clock: Rc<Cell<DateTime<Utc>>>,
        pub district: DistrictId,
        pub admin: Actor,
        pub collector: Actor,
        pub citizen: Actor,
    }

    impl<'s> Fixture<'s> {
        pub fn new(sink: &'s MemorySink) -> Self {
            Self::with_settings(sink, EngineSettings::default())
        }

        pub fn with_settings(sink: &'s MemorySink, settings: EngineSettings) -> Self {
            let mut store = MemoryStore::new();
            let district = store.insert_district("Médina", Some("Rabat")).unwrap();
            let mut user = |name: &str, role| -> User {
                store
                    .insert_user(&NewUser {
                        username: name.to_string(),
                        role,
                        district_id: Some(district),
                    })
                    .unwrap()
            };
            let admin = user("admin", Role::Admin).actor();
            let collector = user("collector", Role::Collector).actor();
            let citizen = user("citizen", Role::Citizen).actor();

            let clock = Rc::new(Cell::new(Utc.with_ymd_and_hms(2024, 4, 8, 9, 0, 0).unwrap()));
            let handle = clock.clone();
            let engine = Engine::new(store, sink, settings).with_clock(move || handle.get());
            Fixture {
                engine,
                clock,
                district,
                admin,
                collector,
                citizen,
            }
        }

        pub fn zone(&mut self, capacity: f64, zone_type: ZoneType) -> Zone {
            let district = self.district;
            self.engine
                .store_mut()
                .insert_zone(&NewZone {
                    district_id: district,
                    name: format!("Zone {}", zone_type),
                    location: Coordinate {
                        latitude: 34.02,
                        longitude: -6.83,
                    },
                    capacity_liters: capacity,
                    radius_meters: 40.0,
                    zone_type,
                })
                .unwrap()
        }

        pub fn citizen(&mut self, name: &str) -> Actor {
            let district = self.district;
            self.engine
                .store_mut()
                .insert_user(&NewUser {
                    username: name.to_string(),
                    role: Role::Citizen,
                    district_id: Some(district),
                })
                .unwrap()
                .actor()
        }

        pub fn advance(&self, by: Duration) {
            self.clock.set(self.clock.get() + by);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testkit::Fixture;
    use super::*;
    use crate::domain::ZoneType;
    use crate::notify::MemorySink;

    #[test]
    fn conflicts_are_retried_then_surfaced() {
        let sink = MemorySink::new();
        let mut fx = Fixture::new(&sink);
        let citizen = fx.citizen.user_id;

        // two lost races fit into three attempts
        fx.engine.store_mut().race_next_balance_writes(2);
        let result = fx.engine.run("credit", |tx, unit| {
            let mut user = tx.user(citizen)?;
            user.credit(10, unit.settings.points_per_level);
            tx.save_user_balance(&user)
        });
        assert_eq!(result.unwrap().points, 10);

        fx.engine.store_mut().race_next_balance_writes(3);
        let err = fx
            .engine
            .run("credit", |tx, _unit| {
                let user = tx.user(citizen)?;
                tx.save_user_balance(&user)
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::ConcurrencyConflict { attempts: 3, .. }));
        assert_eq!(fx.engine.store_mut().user(citizen).unwrap().points, 10);
    }

    #[test]
    fn aborted_transactions_are_retried() {
        use crate::error::StoreError;
        use diesel::result::{DatabaseErrorKind, Error as DieselError};

        let sink = MemorySink::new();
        let mut fx = Fixture::new(&sink);
        let mut calls = 0;
        let result = fx.engine.run("serialize", |_tx, _unit| {
            calls += 1;
            if calls == 1 {
                return Err(EngineError::from(DieselError::DatabaseError(
                    DatabaseErrorKind::SerializationFailure,
                    Box::new("could not serialize access".to_string()),
                )));
            }
            Ok(calls)
        });
        assert_eq!(result.unwrap(), 2);

        let mut deadlocks = 0;
        let err = fx
            .engine
            .run("deadlock", |_tx, _unit| -> Result<(), EngineError> {
                deadlocks += 1;
                Err(EngineError::from(DieselError::DatabaseError(
                    DatabaseErrorKind::Unknown,
                    Box::new("deadlock detected".to_string()),
                )))
            })
            .unwrap_err();
        assert_eq!(deadlocks, 3);
        assert!(matches!(err, EngineError::Storage(StoreError::Deadlock(_))));
    }

    #[test]
    fn events_are_dropped_when_the_unit_fails() {
        let sink = MemorySink::new();
        let mut fx = Fixture::new(&sink);
        let zone = fx.zone(1000.0, ZoneType::Public);

        let result: Result<(), EngineError> = fx.engine.run("failing", |_tx, unit| {
            unit.events.push(EngineEvent::ScheduleAssigned {
                schedule_id: crate::domain::ScheduleId(1),
                zone_id: zone.id,
                collector: UserId(1),
            });
            Err(EngineError::InvalidInput("nope".into()))
        });
        assert!(result.is_err());
        assert!(sink.is_empty());
    }

    #[test]
    fn actors_resolve_from_stored_users() {
        let sink = MemorySink::new();
        let mut fx = Fixture::new(&sink);
        assert!(fx.engine.actor(fx.admin.user_id).is_ok());
        assert!(matches!(
            fx.engine.actor(UserId(999)).unwrap_err(),
            EngineError::NotFound { entity: Entity::User, .. }
        ));
    }
}
