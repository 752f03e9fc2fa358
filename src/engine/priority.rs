//! Priority tiers derived from fill percentage and zone type.

use log::info;

use super::{Engine, schedules};
use crate::domain::{Actor, Entity, PriorityLevel, Zone, ZoneId, ZoneType};
use crate::error::EngineError;
use crate::notify::NotificationSink;
use crate::store::Store;

pub const HIGH_FILL_PERCENTAGE: f64 = 90.0;
pub const INDUSTRIAL_HIGH_FILL_PERCENTAGE: f64 = 60.0;
pub const MEDIUM_FILL_PERCENTAGE: f64 = 70.0;

pub fn classify_fill(percentage: f64, zone_type: ZoneType) -> PriorityLevel {
    if percentage >= HIGH_FILL_PERCENTAGE {
        PriorityLevel::High
    } else if zone_type == ZoneType::Industrial && percentage >= INDUSTRIAL_HIGH_FILL_PERCENTAGE {
        PriorityLevel::High
    } else if percentage >= MEDIUM_FILL_PERCENTAGE {
        PriorityLevel::Medium
    } else {
        PriorityLevel::Low
    }
}

pub fn classify(zone: &Zone) -> PriorityLevel {
    classify_fill(zone.fill_percentage(), zone.zone_type)
}

/// True when the zone should be collected within the high-priority offset,
/// whether its tier came from the classifier or from an override.
pub fn needs_urgent_collection(zone: &Zone) -> bool {
    zone.priority_level == PriorityLevel::High || zone.fill_percentage() >= HIGH_FILL_PERCENTAGE
}

/// Recomputes the stored tier from the current fill. Returns whether it changed.
pub fn reprioritize(zone: &mut Zone) -> bool {
    let tier = classify(zone);
    let changed = tier != zone.priority_level;
    zone.priority_level = tier;
    changed
}

impl<S: Store, N: NotificationSink> Engine<S, N> {
    /// Pins a zone's tier until the next fill signal for the zone.
    pub fn override_priority(&mut self, actor: Actor, zone_id: ZoneId, tier: PriorityLevel) -> Result<Zone, EngineError> {
        self.run("override_priority", |tx, unit| {
            let mut zone = tx.lock_zone(zone_id)?;
            if zone.priority_level == tier {
                return Err(EngineError::AlreadyInState {
                    entity: Entity::Zone,
                    id: zone_id.0,
                    state: tier.as_str(),
                });
            }
            let previous = zone.priority_level;
            zone.priority_level = tier;
            tx.save_zone(&zone)?;
            info!("zone {}: priority {} -> {} (override by user {})", zone.id, previous, tier, actor.user_id);
            schedules::schedule_if_urgent(tx, unit, &mut zone)?;
            Ok(zone)
        })
    }
}
