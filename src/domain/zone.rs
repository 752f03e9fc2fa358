use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DistrictId, PriorityLevel, ZoneId, ZoneType};

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

/// A physical collection point.
///
/// `current_fill_level` is in liters. The percentage is always derived from it
/// and the capacity, see [`Zone::fill_percentage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub district_id: DistrictId,
    pub name: String,
    pub location: Coordinate,
    pub capacity_liters: f64,
    pub current_fill_level: f64,
    pub radius_meters: f64,
    pub priority_level: PriorityLevel,
    pub zone_type: ZoneType,
    pub last_emptied_at: Option<DateTime<Utc>>,
    pub next_collection_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl Zone {
    /// Fill level over capacity, clamped to [0, 100]. Zero when capacity is not positive.
    pub fn fill_percentage(&self) -> f64 {
        fill_percentage(self.current_fill_level, self.capacity_liters)
    }

    /// Converts a percentage of this zone's capacity into liters.
    pub fn liters_for_percentage(&self, percentage: f64) -> f64 {
        if self.capacity_liters.is_nan() || self.capacity_liters <= 0.0 {
            return 0.0;
        }
        self.capacity_liters * percentage / 100.0
    }

    /// Marks the zone as just emptied.
    pub fn reset_after_collection(&mut self, now: DateTime<Utc>) {
        self.current_fill_level = 0.0;
        self.last_emptied_at = Some(now);
    }
}

pub fn fill_percentage(level: f64, capacity: f64) -> f64 {
    if capacity.is_nan() || capacity <= 0.0 {
        return 0.0;
    }
    let percentage = level / capacity * 100.0;
    if percentage.is_nan() {
        return 0.0;
    }
    percentage.clamp(0.0, 100.0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewZone {
    pub district_id: DistrictId,
    pub name: String,
    pub location: Coordinate,
    pub capacity_liters: f64,
    pub radius_meters: f64,
    pub zone_type: ZoneType,
}
