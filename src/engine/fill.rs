//! Converts report and sensor signals into a zone fill level.

use log::info;

use super::{Engine, priority, schedules};
use crate::domain::{Zone, ZoneId};
use crate::error::EngineError;
use crate::notify::NotificationSink;
use crate::store::Store;

/// An observed fill level, in percent of zone capacity.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum FillSignal {
    /// A citizen report nobody has checked yet. Can only raise the level.
    Unverified(f64),
    /// A level confirmed by an administrator.
    Verified(f64),
    /// A reading from a fill sensor.
    Sensor(f64),
}

impl FillSignal {
    pub fn percentage(self) -> f64 {
        match self {
            FillSignal::Unverified(p) | FillSignal::Verified(p) | FillSignal::Sensor(p) => p,
        }
    }
}

pub fn validate_percentage(percentage: f64) -> Result<f64, EngineError> {
    if !(0.0..=100.0).contains(&percentage) {
        return Err(EngineError::InvalidInput(format!(
            "fill level must be between 0 and 100 percent, got {}",
            percentage
        )));
    }
    Ok(percentage)
}

/// New fill level of `zone` in liters after observing `signal`.
///
/// Unverified reports follow a max rule, so concurrent reports commute and a
/// low report never hides a full bin. Verified and sensor values replace the
/// current level.
pub fn estimate_fill(zone: &Zone, signal: FillSignal) -> Result<f64, EngineError> {
    let reported = zone.liters_for_percentage(validate_percentage(signal.percentage())?);
    let level = match signal {
        FillSignal::Unverified(_) => zone.current_fill_level.max(reported),
        FillSignal::Verified(_) | FillSignal::Sensor(_) => reported,
    };
    Ok(level)
}

/// Applies `signal` to a locked zone. The tier is recomputed on every signal,
/// which also ends a manual override.
pub(crate) fn apply_signal<S: Store>(
    tx: &mut S,
    unit: &mut super::Unit<'_>,
    zone: &mut Zone,
    signal: FillSignal,
) -> Result<(), EngineError> {
    zone.current_fill_level = estimate_fill(zone, signal)?;
    priority::reprioritize(zone);
    tx.save_zone(zone)?;
    schedules::schedule_if_urgent(tx, unit, zone)
}

impl<S: Store, N: NotificationSink> Engine<S, N> {
    pub fn record_sensor_reading(&mut self, zone_id: ZoneId, percentage: f64) -> Result<Zone, EngineError> {
        self.run("record_sensor_reading", |tx, unit| {
            let mut zone = tx.lock_zone(zone_id)?;
            apply_signal(tx, unit, &mut zone, FillSignal::Sensor(percentage))?;
            info!(
                "zone {}: sensor reading {:.1}% -> {:.0} L, priority {}",
                zone.id, percentage, zone.current_fill_level, zone.priority_level
            );
            Ok(zone)
        })
    }
}
