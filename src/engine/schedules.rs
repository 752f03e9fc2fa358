//! Collection schedules: at most one active schedule per zone, created and
//! mutated only while the zone row is locked.

use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;
use std::cmp::Ordering;

use super::{Engine, Unit, priority, reports};
use crate::domain::{
    Actor, CollectionSchedule, EngineEvent, NewSchedule, PriorityLevel, Role, ScheduleId, ScheduleState, UserId, Zone, ZoneId,
};
use crate::error::EngineError;
use crate::notify::NotificationSink;
use crate::store::Store;

/// Optional details for a schedule created by `ensure_scheduled_with`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleRequest {
    pub notes: Option<String>,
    pub estimated_duration_minutes: Option<i32>,
}

/// A zone waiting for collection, as listed for dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueEntry {
    pub zone: Zone,
    pub fill_percentage: f64,
    pub urgent: bool,
    pub schedule: Option<CollectionSchedule>,
}

fn create_schedule<S: Store>(
    tx: &mut S,
    unit: &mut Unit<'_>,
    zone: &mut Zone,
    at: DateTime<Utc>,
    request: &ScheduleRequest,
) -> Result<CollectionSchedule, EngineError> {
    if !zone.is_active {
        return Err(EngineError::InvalidInput(format!("zone {} is not active", zone.id)));
    }
    let schedule = tx.insert_schedule(&NewSchedule {
        zone_id: zone.id,
        scheduled_at: at,
        notes: request.notes.clone(),
        estimated_duration_minutes: request.estimated_duration_minutes,
        created_at: unit.now,
    })?;
    zone.next_collection_at = Some(at);
    tx.save_zone(zone)?;
    info!(
        "zone {}: scheduled collection {} at {} (priority {})",
        zone.id, schedule.id, at, zone.priority_level
    );
    Ok(schedule)
}

/// Returns the zone's active schedule, creating one if there is none.
/// `zone` must have been read with `lock_zone` in the current transaction.
pub(crate) fn ensure_in_unit<S: Store>(
    tx: &mut S,
    unit: &mut Unit<'_>,
    zone: &mut Zone,
    request: &ScheduleRequest,
) -> Result<CollectionSchedule, EngineError> {
    if let Some(existing) = tx.active_schedule_for_zone(zone.id)? {
        return Ok(existing);
    }
    let at = unit.after(unit.settings.schedule_offsets.for_priority(zone.priority_level))?;
    create_schedule(tx, unit, zone, at, request)
}

/// Makes sure an urgent zone is collected within the high-priority offset:
/// creates a schedule, or pulls a later pending one forward.
pub(crate) fn schedule_if_urgent<S: Store>(tx: &mut S, unit: &mut Unit<'_>, zone: &mut Zone) -> Result<(), EngineError> {
    if !unit.settings.auto_schedule_urgent || !priority::needs_urgent_collection(zone) {
        return Ok(());
    }
    let deadline = unit.after(unit.settings.schedule_offsets.high)?;
    match tx.active_schedule_for_zone(zone.id)? {
        None => {
            create_schedule(tx, unit, zone, deadline, &ScheduleRequest::default())?;
        }
        Some(mut schedule) if schedule.state == ScheduleState::Pending && schedule.scheduled_at > deadline => {
            info!(
                "zone {}: urgent, moving schedule {} from {} to {}",
                zone.id, schedule.id, schedule.scheduled_at, deadline
            );
            schedule.scheduled_at = deadline;
            tx.save_schedule(&schedule)?;
            zone.next_collection_at = Some(deadline);
            tx.save_zone(zone)?;
        }
        Some(_) => {}
    }
    Ok(())
}

/// Resets a locked zone after its waste was picked up.
pub(crate) fn collect_zone<S: Store>(tx: &mut S, unit: &mut Unit<'_>, zone: &mut Zone) -> Result<(), EngineError> {
    zone.reset_after_collection(unit.now);
    priority::reprioritize(zone);
    zone.next_collection_at = match tx.active_schedule_for_zone(zone.id)? {
        Some(pending) => Some(pending.scheduled_at),
        None => Some(unit.after(unit.settings.schedule_offsets.for_priority(zone.priority_level))?),
    };
    tx.save_zone(zone)
}

/// Locks the schedule's zone, then re-reads the schedule under that lock.
fn lock_schedule<S: Store>(tx: &mut S, id: ScheduleId) -> Result<(Zone, CollectionSchedule), EngineError> {
    let zone_id = tx.schedule(id)?.zone_id;
    let zone = tx.lock_zone(zone_id)?;
    let schedule = tx.schedule(id)?;
    Ok((zone, schedule))
}

fn queue_order(a: &QueueEntry, b: &QueueEntry) -> Ordering {
    b.zone
        .priority_level
        .cmp(&a.zone.priority_level)
        .then_with(|| b.fill_percentage.total_cmp(&a.fill_percentage))
        .then_with(|| a.zone.last_emptied_at.cmp(&b.zone.last_emptied_at))
        .then_with(|| a.zone.id.cmp(&b.zone.id))
}

impl<S: Store, N: NotificationSink> Engine<S, N> {
    pub fn ensure_scheduled(&mut self, zone_id: ZoneId) -> Result<CollectionSchedule, EngineError> {
        self.ensure_scheduled_with(zone_id, ScheduleRequest::default())
    }

    pub fn ensure_scheduled_with(
        &mut self,
        zone_id: ZoneId,
        request: ScheduleRequest,
    ) -> Result<CollectionSchedule, EngineError> {
        if request.estimated_duration_minutes.is_some_and(|m| m < 0) {
            return Err(EngineError::InvalidInput("estimated duration cannot be negative".into()));
        }
        self.run("ensure_scheduled", |tx, unit| {
            let mut zone = tx.lock_zone(zone_id)?;
            ensure_in_unit(tx, unit, &mut zone, &request)
        })
    }

    pub fn assign_schedule(
        &mut self,
        actor: Actor,
        schedule_id: ScheduleId,
        collector: UserId,
    ) -> Result<CollectionSchedule, EngineError> {
        self.run("assign_schedule", |tx, unit| {
            let (_zone, mut schedule) = lock_schedule(tx, schedule_id)?;
            let assignee = tx.user(collector)?;
            if assignee.role != Role::Collector {
                return Err(EngineError::InvalidAssignee {
                    user: assignee.id,
                    role: assignee.role,
                });
            }
            if !assignee.is_active {
                return Err(EngineError::InvalidInput(format!("collector {} is deactivated", assignee.id)));
            }

            schedule.assign(collector)?;
            tx.save_schedule(&schedule)?;
            info!(
                "schedule {}: assigned to collector {} by user {}",
                schedule.id, collector, actor.user_id
            );
            unit.events.push(EngineEvent::ScheduleAssigned {
                schedule_id: schedule.id,
                zone_id: schedule.zone_id,
                collector,
            });
            Ok(schedule)
        })
    }

    pub fn start_schedule(&mut self, actor: Actor, schedule_id: ScheduleId) -> Result<CollectionSchedule, EngineError> {
        self.run("start_schedule", |tx, unit| {
            let (_zone, mut schedule) = lock_schedule(tx, schedule_id)?;
            schedule.start(unit.now)?;
            tx.save_schedule(&schedule)?;
            info!("schedule {}: started by user {}", schedule.id, actor.user_id);
            Ok(schedule)
        })
    }

    /// Finishes a collection run. When `actual_minutes` is omitted it is taken
    /// from the time elapsed since the schedule was started. Verified reports
    /// of the zone are resolved as collected.
    pub fn complete_schedule(
        &mut self,
        actor: Actor,
        schedule_id: ScheduleId,
        actual_minutes: Option<i32>,
    ) -> Result<CollectionSchedule, EngineError> {
        if actual_minutes.is_some_and(|m| m < 0) {
            return Err(EngineError::InvalidInput("actual duration cannot be negative".into()));
        }
        self.run("complete_schedule", |tx, unit| {
            let (mut zone, mut schedule) = lock_schedule(tx, schedule_id)?;
            let minutes = match (actual_minutes, &schedule.state) {
                (Some(minutes), _) => minutes,
                (None, ScheduleState::InProgress { started_at }) => {
                    i32::try_from((unit.now - *started_at).num_minutes().max(0)).unwrap_or(i32::MAX)
                }
                (None, _) => 0,
            };
            schedule.complete(unit.now, minutes)?;
            tx.save_schedule(&schedule)?;
            collect_zone(tx, unit, &mut zone)?;

            let resolver = schedule.assigned_to.unwrap_or(actor.user_id);
            let mut verified = tx.verified_reports_in_zone(zone.id)?;
            verified.sort_by_key(|r| r.id);
            for report in &verified {
                let mut report = tx.lock_report(report.id)?;
                reports::resolve_in_unit(tx, unit, &mut report, resolver)?;
            }
            info!(
                "schedule {}: completed in {} min, zone {} emptied, {} report(s) resolved",
                schedule.id,
                minutes,
                zone.id,
                verified.len()
            );
            Ok(schedule)
        })
    }

    pub fn cancel_schedule(&mut self, actor: Actor, schedule_id: ScheduleId) -> Result<CollectionSchedule, EngineError> {
        self.run("cancel_schedule", |tx, unit| {
            let (mut zone, mut schedule) = lock_schedule(tx, schedule_id)?;
            schedule.cancel(unit.now)?;
            tx.save_schedule(&schedule)?;
            if zone.next_collection_at == Some(schedule.scheduled_at) {
                zone.next_collection_at = None;
                tx.save_zone(&zone)?;
            }
            info!("schedule {}: cancelled by user {}", schedule.id, actor.user_id);
            Ok(schedule)
        })
    }

    /// Active zones that are urgent or at least medium priority, most pressing first.
    pub fn collection_queue(&mut self) -> Result<Vec<QueueEntry>, EngineError> {
        self.run("collection_queue", |tx, _unit| {
            let mut entries = Vec::new();
            for zone in tx.active_zones()? {
                let urgent = priority::needs_urgent_collection(&zone);
                if !urgent && zone.priority_level < PriorityLevel::Medium {
                    continue;
                }
                let schedule = tx.active_schedule_for_zone(zone.id)?;
                entries.push(QueueEntry {
                    fill_percentage: zone.fill_percentage(),
                    zone,
                    urgent,
                    schedule,
                });
            }
            entries.sort_by(queue_order);
            Ok(entries)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Entity, PriorityLevel, ReportState, ZoneType};
    use crate::engine::testkit::Fixture;
    use crate::engine::{EngineSettings, ReportSubmission};
    use crate::notify::MemorySink;
    use chrono::Duration;

    #[test]
    fn ensure_scheduled_is_idempotent() {
        let sink = MemorySink::new();
        let mut fx = Fixture::new(&sink);
        let zone = fx.zone(800.0, ZoneType::Residential);

        let first = fx.engine.ensure_scheduled(zone.id).unwrap();
        fx.advance(Duration::hours(2));
        let second = fx.engine.ensure_scheduled(zone.id).unwrap();

        assert_eq!(first, second);
        assert_eq!(fx.engine.store_mut().schedules_for_zone(zone.id).unwrap().len(), 1);
        // low priority zones are visited within a week
        assert_eq!(first.scheduled_at, first.created_at + Duration::days(7));
        let zone = fx.engine.store_mut().zone(zone.id).unwrap();
        assert_eq!(zone.next_collection_at, Some(first.scheduled_at));
    }

    #[test]
    fn only_collectors_can_be_assigned() {
        let sink = MemorySink::new();
        let mut fx = Fixture::new(&sink);
        let zone = fx.zone(800.0, ZoneType::Residential);
        let schedule = fx.engine.ensure_scheduled(zone.id).unwrap();
        let (admin, collector, citizen) = (fx.admin, fx.collector, fx.citizen);

        let err = fx.engine.assign_schedule(admin, schedule.id, citizen.user_id).unwrap_err();
        assert!(matches!(err, EngineError::InvalidAssignee { role: Role::Citizen, .. }));
        assert!(sink.is_empty());

        let assigned = fx.engine.assign_schedule(admin, schedule.id, collector.user_id).unwrap();
        assert_eq!(assigned.assigned_to, Some(collector.user_id));
        assert_eq!(
            sink.take(),
            vec![EngineEvent::ScheduleAssigned {
                schedule_id: schedule.id,
                zone_id: zone.id,
                collector: collector.user_id,
            }]
        );
        assert!(fx.engine.assign_schedule(admin, schedule.id, collector.user_id).unwrap_err().is_noop());
        assert!(sink.is_empty());

        let missing = fx.engine.assign_schedule(admin, ScheduleId(999), citizen.user_id).unwrap_err();
        assert!(matches!(
            missing,
            EngineError::NotFound {
                entity: Entity::Schedule,
                id: 999
            }
        ));
    }

    #[test]
    fn offsets_past_the_calendar_are_rejected() {
        let sink = MemorySink::new();
        let mut settings = EngineSettings::default();
        settings.schedule_offsets.low = Duration::try_days(100_000_000).unwrap();
        let mut fx = Fixture::with_settings(&sink, settings);
        let zone = fx.zone(800.0, ZoneType::Residential);

        let err = fx.engine.ensure_scheduled(zone.id).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        assert!(fx.engine.store_mut().schedules_for_zone(zone.id).unwrap().is_empty());
        assert_eq!(fx.engine.store_mut().zone(zone.id).unwrap().next_collection_at, None);
    }

    #[test]
    fn completing_a_run_empties_the_zone_and_resolves_reports() {
        let sink = MemorySink::new();
        let mut fx = Fixture::new(&sink);
        let zone = fx.zone(1000.0, ZoneType::Commercial);
        let (admin, collector, citizen) = (fx.admin, fx.collector, fx.citizen);

        let report = fx.engine.submit_report(citizen, ReportSubmission::new(zone.id, 95.0)).unwrap();
        fx.engine.verify_report(admin, report.id, None).unwrap();
        let schedule = fx.engine.ensure_scheduled(zone.id).unwrap();
        assert_eq!(schedule.scheduled_at, report.created_at + Duration::hours(24));

        fx.engine.assign_schedule(admin, schedule.id, collector.user_id).unwrap();
        fx.engine.start_schedule(collector, schedule.id).unwrap();
        fx.advance(Duration::minutes(45));
        let done = fx.engine.complete_schedule(collector, schedule.id, None).unwrap();

        match done.state {
            ScheduleState::Completed {
                actual_duration_minutes,
                ..
            } => assert_eq!(actual_duration_minutes, 45),
            other => panic!("unexpected state {other:?}"),
        }
        let store = fx.engine.store_mut();
        let zone = store.zone(zone.id).unwrap();
        assert_eq!(zone.current_fill_level, 0.0);
        assert_eq!(zone.priority_level, PriorityLevel::Low);
        assert_eq!(zone.last_emptied_at, Some(fx.clock.get()));
        assert_eq!(zone.next_collection_at, Some(fx.clock.get() + Duration::days(7)));

        let report = store.report(report.id).unwrap();
        assert!(matches!(
            report.state,
            ReportState::Resolved { resolved_by, points_awarded: 20, .. } if resolved_by == collector.user_id
        ));
        assert!(store.active_schedule_for_zone(zone.id).unwrap().is_none());
    }

    #[test]
    fn cancel_clears_the_planned_collection() {
        let sink = MemorySink::new();
        let mut fx = Fixture::new(&sink);
        let zone = fx.zone(500.0, ZoneType::Public);
        let admin = fx.admin;
        let schedule = fx.engine.ensure_scheduled(zone.id).unwrap();

        fx.engine.cancel_schedule(admin, schedule.id).unwrap();
        assert_eq!(fx.engine.store_mut().zone(zone.id).unwrap().next_collection_at, None);
        assert!(fx.engine.cancel_schedule(admin, schedule.id).unwrap_err().is_noop());
        assert!(matches!(
            fx.engine.start_schedule(admin, schedule.id).unwrap_err(),
            EngineError::InvalidTransition { from: "cancelled", .. }
        ));

        // a new schedule can be created once the old one is gone
        let replacement = fx.engine.ensure_scheduled(zone.id).unwrap();
        assert_ne!(replacement.id, schedule.id);
    }

    #[test]
    fn urgent_zones_pull_pending_schedules_forward() {
        let sink = MemorySink::new();
        let mut fx = Fixture::new(&sink);
        let zone = fx.zone(1000.0, ZoneType::Residential);
        let planned = fx.engine.ensure_scheduled(zone.id).unwrap();

        fx.engine.record_sensor_reading(zone.id, 96.0).unwrap();
        let moved = fx.engine.store_mut().schedule(planned.id).unwrap();
        assert_eq!(moved.scheduled_at, fx.engine.now() + Duration::hours(24));
        assert_eq!(fx.engine.store_mut().schedules_for_zone(zone.id).unwrap().len(), 1);
    }

    #[test]
    fn auto_scheduling_can_be_disabled() {
        let sink = MemorySink::new();
        let settings = EngineSettings {
            auto_schedule_urgent: false,
            ..EngineSettings::default()
        };
        let mut fx = Fixture::with_settings(&sink, settings);
        let zone = fx.zone(1000.0, ZoneType::Residential);
        fx.engine.record_sensor_reading(zone.id, 99.0).unwrap();
        assert!(fx.engine.store_mut().active_schedule_for_zone(zone.id).unwrap().is_none());
    }

    #[test]
    fn queue_lists_pressing_zones_first() {
        let sink = MemorySink::new();
        let settings = EngineSettings {
            auto_schedule_urgent: false,
            ..EngineSettings::default()
        };
        let mut fx = Fixture::with_settings(&sink, settings);
        let quiet = fx.zone(1000.0, ZoneType::Residential);
        let medium = fx.zone(1000.0, ZoneType::Commercial);
        let full = fx.zone(1000.0, ZoneType::Public);
        let factory = fx.zone(1000.0, ZoneType::Industrial);

        fx.engine.record_sensor_reading(quiet.id, 20.0).unwrap();
        fx.engine.record_sensor_reading(medium.id, 75.0).unwrap();
        fx.engine.record_sensor_reading(full.id, 98.0).unwrap();
        fx.engine.record_sensor_reading(factory.id, 65.0).unwrap();

        let queue = fx.engine.collection_queue().unwrap();
        let order: Vec<ZoneId> = queue.iter().map(|e| e.zone.id).collect();
        assert_eq!(order, vec![full.id, factory.id, medium.id]);
        assert!(queue[0].urgent && queue[1].urgent && !queue[2].urgent);
    }
}
