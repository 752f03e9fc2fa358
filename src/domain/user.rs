use serde::{Deserialize, Serialize};

use super::{DistrictId, Role, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub role: Role,
    pub points: i64,
    pub level: i32,
    pub district_id: Option<DistrictId>,
    pub is_active: bool,
    /// Bumped on every balance write; stale writers are rejected.
    pub version: i64,
}

impl User {
    /// Adds points and re-derives the level. Negative amounts are ignored.
    pub fn credit(&mut self, amount: i64, points_per_level: i64) {
        self.points += amount.max(0);
        self.level = level_for_points(self.points, points_per_level);
    }

    pub fn actor(&self) -> Actor {
        Actor {
            user_id: self.id,
            role: self.role,
        }
    }
}

pub fn level_for_points(points: i64, points_per_level: i64) -> i32 {
    if points_per_level <= 0 {
        return 1;
    }
    let level = 1 + points.max(0) / points_per_level;
    i32::try_from(level).unwrap_or(i32::MAX)
}

/// The acting user as supplied by the identity layer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub username: String,
    pub role: Role,
    pub district_id: Option<DistrictId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_grows_every_hundred_points() {
        assert_eq!(level_for_points(0, 100), 1);
        assert_eq!(level_for_points(99, 100), 1);
        assert_eq!(level_for_points(100, 100), 2);
        assert_eq!(level_for_points(-50, 100), 1);
        assert_eq!(level_for_points(500, 0), 1);
    }
}
