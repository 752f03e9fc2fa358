//! Citizen report lifecycle, audit trail and point awards.

use log::info;
use serde_json::json;

use super::fill::{self, FillSignal};
use super::{Engine, PointsTable, Unit, achievements, schedules};
use crate::domain::{
    ActionType, Actor, Coordinate, EngineEvent, NewReport, NewReportAction, PriorityLevel, ReportAction, ReportId,
    UserId, WasteReport, Zone, ZoneId,
};
use crate::error::EngineError;
use crate::notify::NotificationSink;
use crate::store::Store;

/// What a citizen sends when reporting a zone.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportSubmission {
    pub zone_id: ZoneId,
    /// Observed fill level in percent.
    pub fill_level: f64,
    pub description: Option<String>,
    pub photos: Vec<String>,
    pub location: Option<Coordinate>,
}

impl ReportSubmission {
    pub fn new(zone_id: ZoneId, fill_level: f64) -> Self {
        ReportSubmission {
            zone_id,
            fill_level,
            description: None,
            photos: Vec::new(),
            location: None,
        }
    }
}

/// How a verified report was closed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The zone was emptied. Resets its fill level.
    Collected,
    /// Closed without a pickup, e.g. the problem was handled another way.
    Administrative,
}

pub fn points_for(points: &PointsTable, priority: PriorityLevel, first_in_zone: bool) -> i32 {
    let bonus = if first_in_zone { points.first_zone_report_bonus } else { 0 };
    points.for_priority(priority) + bonus
}

fn record<S: Store>(
    tx: &mut S,
    unit: &Unit<'_>,
    report: ReportId,
    user: UserId,
    action_type: ActionType,
    data: serde_json::Value,
) -> Result<ReportAction, EngineError> {
    tx.append_action(&NewReportAction {
        report_id: report,
        user_id: user,
        action_type,
        data: Some(data),
        created_at: unit.now,
    })
}

/// Locks the report's zone, then the report. All report writers take the
/// locks in this order.
fn lock_report<S: Store>(tx: &mut S, id: ReportId) -> Result<(Zone, WasteReport), EngineError> {
    let zone_id = tx.report(id)?.zone_id;
    let zone = tx.lock_zone(zone_id)?;
    let report = tx.lock_report(id)?;
    Ok((zone, report))
}

/// Resolves a verified report and credits its reporter. Leaves the zone alone.
pub(crate) fn resolve_in_unit<S: Store>(
    tx: &mut S,
    unit: &mut Unit<'_>,
    report: &mut WasteReport,
    resolver: UserId,
) -> Result<i32, EngineError> {
    report.ensure_resolvable()?;
    let first_in_zone = tx.count_earlier_reports(report.reporter, report.zone_id, report.id)? == 0;
    let points = points_for(&unit.settings.points, report.priority, first_in_zone);
    report.resolve(resolver, unit.now, points)?;
    tx.save_report(report)?;
    record(
        tx,
        unit,
        report.id,
        resolver,
        ActionType::Resolved,
        json!({ "points_awarded": points, "first_in_zone": first_in_zone }),
    )?;

    let mut reporter = tx.user(report.reporter)?;
    reporter.credit(i64::from(points), unit.settings.points_per_level);
    tx.save_user_balance(&reporter)?;
    achievements::evaluate_in_unit(tx, unit, report.reporter)?;

    info!(
        "report {}: resolved by user {}, {} points to user {}",
        report.id, resolver, points, report.reporter
    );
    unit.events.push(EngineEvent::ReportResolved {
        report_id: report.id,
        reporter: report.reporter,
        zone_id: report.zone_id,
        points_awarded: points,
    });
    Ok(points)
}

fn non_empty(text: &str, what: &str) -> Result<String, EngineError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(EngineError::InvalidInput(format!("{} must not be empty", what)));
    }
    Ok(text.to_string())
}

impl<S: Store, N: NotificationSink> Engine<S, N> {
    pub fn submit_report(&mut self, actor: Actor, submission: ReportSubmission) -> Result<WasteReport, EngineError> {
        fill::validate_percentage(submission.fill_level)?;
        let description = submission
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        self.run("submit_report", |tx, unit| {
            tx.user(actor.user_id)?;
            let mut zone = tx.lock_zone(submission.zone_id)?;
            if !zone.is_active {
                return Err(EngineError::InvalidInput(format!("zone {} is not active", zone.id)));
            }
            fill::apply_signal(tx, unit, &mut zone, FillSignal::Unverified(submission.fill_level))?;

            let report = tx.insert_report(&NewReport {
                reporter: actor.user_id,
                zone_id: zone.id,
                district_id: zone.district_id,
                fill_level: submission.fill_level,
                priority: zone.priority_level,
                description: description.clone(),
                photos: submission.photos.clone(),
                location: submission.location,
                created_at: unit.now,
            })?;
            record(
                tx,
                unit,
                report.id,
                actor.user_id,
                ActionType::Created,
                json!({ "fill_level": report.fill_level, "priority": report.priority }),
            )?;
            achievements::evaluate_in_unit(tx, unit, actor.user_id)?;

            info!(
                "report {}: zone {} reported at {:.1}% by user {}, zone now {:.1}% ({})",
                report.id,
                zone.id,
                report.fill_level,
                actor.user_id,
                zone.fill_percentage(),
                zone.priority_level
            );
            Ok(report)
        })
    }

    /// Confirms a pending report. `corrected_fill` replaces the observed level
    /// as the zone's authoritative value; without it the observed level is used.
    pub fn verify_report(
        &mut self,
        actor: Actor,
        report_id: ReportId,
        corrected_fill: Option<f64>,
    ) -> Result<WasteReport, EngineError> {
        if let Some(level) = corrected_fill {
            fill::validate_percentage(level)?;
        }
        self.run("verify_report", |tx, unit| {
            let (mut zone, mut report) = lock_report(tx, report_id)?;
            report.verify(actor.user_id, unit.now)?;

            let level = corrected_fill.unwrap_or(report.fill_level);
            fill::apply_signal(tx, unit, &mut zone, FillSignal::Verified(level))?;
            report.priority = zone.priority_level;
            tx.save_report(&report)?;
            record(
                tx,
                unit,
                report.id,
                actor.user_id,
                ActionType::Verified,
                json!({ "fill_level": level, "corrected": corrected_fill.is_some(), "priority": report.priority }),
            )?;

            info!(
                "report {}: verified by user {} at {:.1}%, zone {} now {}",
                report.id, actor.user_id, level, zone.id, zone.priority_level
            );
            Ok(report)
        })
    }

    pub fn reject_report(&mut self, actor: Actor, report_id: ReportId, reason: &str) -> Result<WasteReport, EngineError> {
        let reason = non_empty(reason, "rejection reason")?;
        self.run("reject_report", |tx, unit| {
            let (_zone, mut report) = lock_report(tx, report_id)?;
            report.reject(actor.user_id, unit.now, reason.clone())?;
            tx.save_report(&report)?;
            record(
                tx,
                unit,
                report.id,
                actor.user_id,
                ActionType::Rejected,
                json!({ "reason": reason }),
            )?;
            info!("report {}: rejected by user {}: {}", report.id, actor.user_id, reason);
            Ok(report)
        })
    }

    pub fn resolve_report(
        &mut self,
        actor: Actor,
        report_id: ReportId,
        resolution: Resolution,
    ) -> Result<WasteReport, EngineError> {
        self.run("resolve_report", |tx, unit| {
            let (mut zone, mut report) = lock_report(tx, report_id)?;
            resolve_in_unit(tx, unit, &mut report, actor.user_id)?;
            if resolution == Resolution::Collected {
                schedules::collect_zone(tx, unit, &mut zone)?;
                info!("zone {}: emptied on resolution of report {}", zone.id, report.id);
            }
            Ok(report)
        })
    }

    /// Adds a free-text note to a report in any state.
    pub fn comment_report(&mut self, actor: Actor, report_id: ReportId, text: &str) -> Result<ReportAction, EngineError> {
        let text = non_empty(text, "comment")?;
        self.run("comment_report", |tx, unit| {
            tx.report(report_id)?;
            record(
                tx,
                unit,
                report_id,
                actor.user_id,
                ActionType::Commented,
                json!({ "comment": text }),
            )
        })
    }

    pub fn report_actions(&mut self, report_id: ReportId) -> Result<Vec<ReportAction>, EngineError> {
        self.run("report_actions", |tx, _unit| {
            tx.report(report_id)?;
            tx.report_actions(report_id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ReportState, ZoneType};
    use crate::engine::EngineSettings;
    use crate::engine::achievements::default_catalog;
    use crate::engine::priority::needs_urgent_collection;
    use crate::engine::testkit::Fixture;
    use crate::notify::MemorySink;

    fn action_types(actions: &[ReportAction]) -> Vec<ActionType> {
        actions.iter().map(|a| a.action_type).collect()
    }

    #[test]
    fn verification_overrides_an_unverified_peak() {
        let sink = MemorySink::new();
        let mut fx = Fixture::new(&sink);
        let zone = fx.zone(1000.0, ZoneType::Residential);
        let (admin, citizen) = (fx.admin, fx.citizen);

        let report = fx.engine.submit_report(citizen, ReportSubmission::new(zone.id, 95.0)).unwrap();
        let z = fx.engine.store_mut().zone(zone.id).unwrap();
        assert_eq!(z.fill_percentage(), 95.0);
        assert_eq!(z.priority_level, PriorityLevel::High);
        assert!(needs_urgent_collection(&z));
        assert_eq!(report.priority, PriorityLevel::High);

        let verified = fx.engine.verify_report(admin, report.id, Some(40.0)).unwrap();
        let z = fx.engine.store_mut().zone(zone.id).unwrap();
        assert_eq!(z.current_fill_level, 400.0);
        assert_eq!(z.fill_percentage(), 40.0);
        assert_eq!(z.priority_level, PriorityLevel::Low);
        assert_eq!(verified.priority, PriorityLevel::Low);
        assert_eq!(verified.fill_level, 95.0);
    }

    #[test]
    fn lower_unverified_reports_keep_the_peak() {
        let sink = MemorySink::new();
        let mut fx = Fixture::new(&sink);
        let zone = fx.zone(1000.0, ZoneType::Residential);
        let citizen = fx.citizen;
        let other = fx.citizen("youssef");

        fx.engine.submit_report(citizen, ReportSubmission::new(zone.id, 80.0)).unwrap();
        let low = fx.engine.submit_report(other, ReportSubmission::new(zone.id, 20.0)).unwrap();
        assert_eq!(fx.engine.store_mut().zone(zone.id).unwrap().fill_percentage(), 80.0);
        assert_eq!(low.priority, PriorityLevel::Medium);
    }

    #[test]
    fn high_priority_resolution_awards_points_and_achievements_once() {
        let sink = MemorySink::new();
        let mut fx = Fixture::new(&sink);
        fx.engine.seed_catalog(&default_catalog()).unwrap();
        let zone = fx.zone(1000.0, ZoneType::Residential);
        let (admin, collector, citizen) = (fx.admin, fx.collector, fx.citizen);

        let mut reports = Vec::new();
        for _ in 0..10 {
            reports.push(fx.engine.submit_report(citizen, ReportSubmission::new(zone.id, 95.0)).unwrap());
        }
        let first = reports[0].id;
        fx.engine.verify_report(admin, first, None).unwrap();
        let resolved = fx.engine.resolve_report(collector, first, Resolution::Collected).unwrap();
        assert_eq!(resolved.state.points_awarded(), 20);

        // further activity never re-grants
        fx.engine.submit_report(citizen, ReportSubmission::new(zone.id, 50.0)).unwrap();
        assert!(fx.engine.evaluate_user(citizen.user_id).unwrap().is_empty());

        let store = fx.engine.store_mut();
        let catalog = store.active_achievements().unwrap();
        let actif = catalog.iter().find(|a| a.name == "🔥 Citoyen Actif").unwrap();
        let held = store.user_achievements(citizen.user_id).unwrap();
        assert_eq!(held.iter().filter(|ua| ua.achievement_id == actif.id).count(), 1);
        assert_eq!(held.len(), 2);
        // 10 + 50 from achievements, 20 from the resolution
        assert_eq!(store.user(citizen.user_id).unwrap().points, 80);

        let kinds: Vec<_> = sink.take().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["achievement_earned", "achievement_earned", "report_resolved"]);
    }

    #[test]
    fn lifecycle_edges_are_enforced() {
        let sink = MemorySink::new();
        let mut fx = Fixture::new(&sink);
        let zone = fx.zone(1000.0, ZoneType::Commercial);
        let (admin, citizen) = (fx.admin, fx.citizen);

        let kept = fx.engine.submit_report(citizen, ReportSubmission::new(zone.id, 60.0)).unwrap();
        fx.engine.verify_report(admin, kept.id, None).unwrap();
        assert!(fx.engine.verify_report(admin, kept.id, None).unwrap_err().is_noop());
        assert!(matches!(
            fx.engine.reject_report(admin, kept.id, "doublon").unwrap_err(),
            EngineError::InvalidTransition { from: "verified", to: "rejected", .. }
        ));

        let dropped = fx.engine.submit_report(citizen, ReportSubmission::new(zone.id, 60.0)).unwrap();
        fx.engine.reject_report(admin, dropped.id, "photo floue").unwrap();
        assert!(fx.engine.reject_report(admin, dropped.id, "photo floue").unwrap_err().is_noop());
        assert!(matches!(
            fx.engine.resolve_report(admin, dropped.id, Resolution::Administrative).unwrap_err(),
            EngineError::InvalidTransition { from: "rejected", .. }
        ));
        assert!(matches!(
            fx.engine.reject_report(admin, kept.id, "  ").unwrap_err(),
            EngineError::InvalidInput(_)
        ));

        let actions = fx.engine.report_actions(kept.id).unwrap();
        assert_eq!(action_types(&actions), vec![ActionType::Created, ActionType::Verified]);
        let actions = fx.engine.report_actions(dropped.id).unwrap();
        assert_eq!(action_types(&actions), vec![ActionType::Created, ActionType::Rejected]);
        assert_eq!(fx.engine.store_mut().user(citizen.user_id).unwrap().points, 0);
    }

    #[test]
    fn administrative_resolution_leaves_the_zone_full() {
        let sink = MemorySink::new();
        let mut fx = Fixture::new(&sink);
        let zone = fx.zone(1000.0, ZoneType::Residential);
        let (admin, citizen) = (fx.admin, fx.citizen);

        let report = fx.engine.submit_report(citizen, ReportSubmission::new(zone.id, 75.0)).unwrap();
        fx.engine.verify_report(admin, report.id, None).unwrap();
        let resolved = fx.engine.resolve_report(admin, report.id, Resolution::Administrative).unwrap();
        assert!(matches!(resolved.state, ReportState::Resolved { points_awarded: 10, .. }));
        assert_eq!(fx.engine.store_mut().zone(zone.id).unwrap().current_fill_level, 750.0);
        assert!(fx.engine.resolve_report(admin, report.id, Resolution::Collected).unwrap_err().is_noop());
    }

    #[test]
    fn first_report_in_a_zone_earns_the_bonus() {
        let sink = MemorySink::new();
        let mut settings = EngineSettings::default();
        settings.points.first_zone_report_bonus = 5;
        let mut fx = Fixture::with_settings(&sink, settings);
        let zone = fx.zone(1000.0, ZoneType::Residential);
        let (admin, citizen) = (fx.admin, fx.citizen);

        let first = fx.engine.submit_report(citizen, ReportSubmission::new(zone.id, 10.0)).unwrap();
        let second = fx.engine.submit_report(citizen, ReportSubmission::new(zone.id, 10.0)).unwrap();
        for id in [second.id, first.id] {
            fx.engine.verify_report(admin, id, None).unwrap();
            fx.engine.resolve_report(admin, id, Resolution::Administrative).unwrap();
        }
        let store = fx.engine.store_mut();
        assert_eq!(store.report(first.id).unwrap().state.points_awarded(), 10);
        assert_eq!(store.report(second.id).unwrap().state.points_awarded(), 5);
    }

    #[test]
    fn lost_balance_races_are_retried() {
        let sink = MemorySink::new();
        let mut fx = Fixture::new(&sink);
        let zone = fx.zone(1000.0, ZoneType::Residential);
        let (admin, citizen) = (fx.admin, fx.citizen);
        let report = fx.engine.submit_report(citizen, ReportSubmission::new(zone.id, 50.0)).unwrap();
        fx.engine.verify_report(admin, report.id, None).unwrap();

        fx.engine.store_mut().race_next_balance_writes(5);
        let err = fx.engine.resolve_report(admin, report.id, Resolution::Administrative).unwrap_err();
        assert!(err.is_conflict());
        assert!(matches!(
            fx.engine.store_mut().report(report.id).unwrap().state,
            ReportState::Verified { .. }
        ));
        assert!(sink.is_empty());

        fx.engine.store_mut().race_next_balance_writes(2);
        fx.engine.resolve_report(admin, report.id, Resolution::Administrative).unwrap();
        assert_eq!(fx.engine.store_mut().user(citizen.user_id).unwrap().points, 5);
        assert_eq!(sink.len(), 1);
        let actions = fx.engine.report_actions(report.id).unwrap();
        assert_eq!(action_types(&actions).iter().filter(|t| **t == ActionType::Resolved).count(), 1);
    }

    #[test]
    fn comments_are_allowed_in_any_state() {
        let sink = MemorySink::new();
        let mut fx = Fixture::new(&sink);
        let zone = fx.zone(1000.0, ZoneType::Public);
        let (admin, citizen) = (fx.admin, fx.citizen);
        let report = fx.engine.submit_report(citizen, ReportSubmission::new(zone.id, 30.0)).unwrap();
        fx.engine.reject_report(admin, report.id, "hors zone").unwrap();

        let note = fx.engine.comment_report(citizen, report.id, " c'était bien plein ").unwrap();
        assert_eq!(note.action_type, ActionType::Commented);
        assert_eq!(note.data, Some(json!({ "comment": "c'était bien plein" })));
        assert!(matches!(
            fx.engine.comment_report(citizen, ReportId(404), "?").unwrap_err(),
            EngineError::NotFound { .. }
        ));
    }

    #[test]
    fn inactive_zones_and_bad_levels_are_refused() {
        let sink = MemorySink::new();
        let mut fx = Fixture::new(&sink);
        let mut zone = fx.zone(1000.0, ZoneType::Public);
        let citizen = fx.citizen;

        assert!(matches!(
            fx.engine.submit_report(citizen, ReportSubmission::new(zone.id, 120.0)).unwrap_err(),
            EngineError::InvalidInput(_)
        ));
        zone.is_active = false;
        fx.engine.store_mut().save_zone(&zone).unwrap();
        assert!(matches!(
            fx.engine.submit_report(citizen, ReportSubmission::new(zone.id, 50.0)).unwrap_err(),
            EngineError::InvalidInput(_)
        ));
        assert!(matches!(
            fx.engine.submit_report(citizen, ReportSubmission::new(ZoneId(999), 50.0)).unwrap_err(),
            EngineError::NotFound { .. }
        ));
    }
}
