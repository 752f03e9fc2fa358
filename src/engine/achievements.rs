//! Achievement granting.
//!
//! Grants for one user happen in a single transaction: either every newly
//! qualifying achievement is inserted and credited, or none is.

use log::info;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use super::{Engine, Unit};
use crate::domain::{
    Achievement, ActivityCounters, ConditionType, EngineEvent, Entity, NewAchievement, UserAchievement, UserId,
};
use crate::error::EngineError;
use crate::notify::NotificationSink;
use crate::store::Store;

fn entry(icon: &str, name: &str, description: &str, condition: ConditionType, value: i64, reward: i64) -> NewAchievement {
    NewAchievement {
        name: format!("{} {}", icon, name),
        description: description.to_string(),
        icon: Some(icon.to_string()),
        condition_type: condition,
        condition_value: value,
        points_required: reward,
        is_active: true,
    }
}

/// Catalog installed by `seed` when no achievements file is configured.
pub fn default_catalog() -> Vec<NewAchievement> {
    vec![
        entry("🌱", "Premier Signalement", "Premier signalement envoyé", ConditionType::ReportsCount, 1, 10),
        entry("🔥", "Citoyen Actif", "10 signalements envoyés", ConditionType::ReportsCount, 10, 50),
        entry("🏆", "Gardien du Quartier", "50 signalements envoyés", ConditionType::ReportsCount, 50, 200),
        entry("⭐", "Collectionneur de Points", "500 points cumulés", ConditionType::PointsEarned, 500, 100),
        entry("📅", "Régularité", "7 jours de signalement consécutifs", ConditionType::ConsecutiveDays, 7, 70),
        entry("🗺️", "Explorateur", "5 zones différentes signalées", ConditionType::ZoneCoverage, 5, 50),
    ]
}

/// Reads a JSON array of catalog entries.
pub fn load_catalog(path: &Path) -> Result<Vec<NewAchievement>, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    let de = &mut serde_json::Deserializer::from_str(&text);
    let catalog: Vec<NewAchievement> = serde_path_to_error::deserialize(de)
        .map_err(|e| format!("invalid achievements file {} at `{}`: {}", path.display(), e.path(), e.inner()))?;

    let mut names = BTreeSet::new();
    for achievement in &catalog {
        if achievement.condition_value < 0 || achievement.points_required < 0 {
            return Err(format!("achievement `{}` has a negative threshold or reward", achievement.name));
        }
        if !names.insert(achievement.name.as_str()) {
            return Err(format!("achievement `{}` is listed twice", achievement.name));
        }
    }
    Ok(catalog)
}

/// Grants every active achievement `counters` satisfies that `user` does not hold yet.
fn grant<S: Store>(
    tx: &mut S,
    unit: &mut Unit<'_>,
    user: UserId,
    counters: &ActivityCounters,
) -> Result<Vec<Achievement>, EngineError> {
    let held: BTreeSet<_> = tx.user_achievements(user)?.into_iter().map(|ua| ua.achievement_id).collect();
    let earned: Vec<Achievement> = tx
        .active_achievements()?
        .into_iter()
        .filter(|a| !held.contains(&a.id) && a.is_satisfied_by(counters))
        .collect();
    if earned.is_empty() {
        return Ok(earned);
    }

    let mut reward = 0;
    for achievement in &earned {
        let inserted = tx.insert_user_achievement(&UserAchievement {
            user_id: user,
            achievement_id: achievement.id,
            earned_at: unit.now,
            points_earned: achievement.points_required,
        })?;
        if !inserted {
            // granted by a concurrent transaction since we read `held`
            return Err(EngineError::conflict(Entity::Achievement, achievement.id.0));
        }
        reward += achievement.points_required;
    }

    let mut account = tx.user(user)?;
    account.credit(reward, unit.settings.points_per_level);
    tx.save_user_balance(&account)?;

    for achievement in &earned {
        info!(
            "user {}: earned `{}` (+{} points)",
            user, achievement.name, achievement.points_required
        );
        unit.events.push(EngineEvent::AchievementEarned {
            user_id: user,
            achievement_id: achievement.id,
            name: achievement.name.clone(),
            points: achievement.points_required,
        });
    }
    Ok(earned)
}

/// Evaluates `user` against counters derived from the store, repeating while
/// rewards unlock further point thresholds.
pub(crate) fn evaluate_in_unit<S: Store>(
    tx: &mut S,
    unit: &mut Unit<'_>,
    user: UserId,
) -> Result<Vec<Achievement>, EngineError> {
    let mut all = Vec::new();
    loop {
        let counters = tx.activity_counters(user)?;
        let earned = grant(tx, unit, user, &counters)?;
        if earned.is_empty() {
            return Ok(all);
        }
        all.extend(earned);
    }
}

impl<S: Store, N: NotificationSink> Engine<S, N> {
    /// Inserts or updates catalog entries by name.
    pub fn seed_catalog(&mut self, catalog: &[NewAchievement]) -> Result<Vec<Achievement>, EngineError> {
        self.run("seed_catalog", |tx, _unit| {
            let rows = catalog
                .iter()
                .map(|new| tx.upsert_achievement(new))
                .collect::<Result<Vec<_>, _>>()?;
            info!("achievement catalog: {} entries", rows.len());
            Ok(rows)
        })
    }

    pub fn activity_counters(&mut self, user: UserId) -> Result<ActivityCounters, EngineError> {
        self.run("activity_counters", |tx, _unit| tx.activity_counters(user))
    }

    /// Grants what the given counter snapshot qualifies `user` for. Calling it
    /// again with the same counters grants nothing.
    pub fn evaluate_achievements(
        &mut self,
        user: UserId,
        counters: &ActivityCounters,
    ) -> Result<Vec<Achievement>, EngineError> {
        self.run("evaluate_achievements", |tx, unit| {
            tx.user(user)?;
            grant(tx, unit, user, counters)
        })
    }

    /// Same as [`Engine::evaluate_achievements`] with counters derived from the user's history.
    pub fn evaluate_user(&mut self, user: UserId) -> Result<Vec<Achievement>, EngineError> {
        self.run("evaluate_user", |tx, unit| {
            tx.user(user)?;
            evaluate_in_unit(tx, unit, user)
        })
    }
}
