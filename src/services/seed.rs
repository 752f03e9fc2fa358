//! Catalog installation and deterministic demo data.

use log::info;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::domain::{Coordinate, NewAchievement, NewUser, NewZone, Role, User, ZoneType};
use crate::engine::{Engine, ReportSubmission};
use crate::notify::NotificationSink;
use crate::store::Store;

const DEMO_SEED: u64 = 0x5EED_0000_2A57_E20Eu64;
const DEMO_ADMIN: &str = "admin.medina";
const DEMO_COLLECTORS: [&str; 2] = ["collecte.nord", "collecte.sud"];
const DEMO_CITIZENS: [&str; 6] = ["amina", "karim", "salma", "youssef", "nadia", "omar"];
const DEMO_ZONES: [&str; 10] = [
    "Bab El Had",
    "Souk Sebt",
    "Place Mohammed V",
    "Rue des Consuls",
    "Marché Central",
    "Jardin d'Essais",
    "Zone Industrielle Takadoum",
    "Avenue Fal Ould Oumeir",
    "Kasbah des Oudayas",
    "Gare Rabat-Ville",
];
const CENTER: Coordinate = Coordinate {
    latitude: 34.0209,
    longitude: -6.8416,
};
const REJECTION_REASONS: [&str; 3] = ["photo illisible", "doublon", "hors zone"];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedSummary {
    pub achievements: usize,
    pub users: usize,
    pub zones: usize,
    pub reports: usize,
}

pub fn run<S: Store, N: NotificationSink>(
    engine: &mut Engine<S, N>,
    catalog: &[NewAchievement],
    demo: bool,
) -> Result<SeedSummary, String> {
    let achievements = engine
        .seed_catalog(catalog)
        .map_err(|e| format!("seeding achievements failed: {}", e))?
        .len();
    let mut summary = SeedSummary {
        achievements,
        ..SeedSummary::default()
    };
    if !demo {
        return Ok(summary);
    }

    let existing = engine
        .store_mut()
        .user_by_username(DEMO_ADMIN)
        .map_err(|e| format!("lookup of demo admin failed: {}", e))?;
    if existing.is_some() {
        info!("Seed: demo data already present (user `{}` exists), skipping", DEMO_ADMIN);
        return Ok(summary);
    }

    let mut rng = SmallRng::seed_from_u64(DEMO_SEED);
    let (admin, collectors, citizens, zones) = engine
        .store_mut()
        .transaction(|tx| {
            let district = tx.insert_district("Médina", Some("Rabat"))?;
            let mut user = |username: &str, role: Role| -> Result<User, crate::error::EngineError> {
                tx.insert_user(&NewUser {
                    username: username.to_string(),
                    role,
                    district_id: Some(district),
                })
            };
            let admin = user(DEMO_ADMIN, Role::Admin)?;
            let collectors = DEMO_COLLECTORS
                .iter()
                .map(|name| user(name, Role::Collector))
                .collect::<Result<Vec<_>, _>>()?;
            let citizens = DEMO_CITIZENS
                .iter()
                .map(|name| user(name, Role::Citizen))
                .collect::<Result<Vec<_>, _>>()?;

            let mut zones = Vec::with_capacity(DEMO_ZONES.len());
            for name in DEMO_ZONES {
                let zone_type = if name.contains("Industrielle") {
                    ZoneType::Industrial
                } else {
                    ZoneType::ALL[rng.random_range(0..ZoneType::ALL.len())]
                };
                let capacity = (rng.random_range(500.0..2000.0_f64) / 50.0).round() * 50.0;
                zones.push(tx.insert_zone(&NewZone {
                    district_id: district,
                    name: name.to_string(),
                    location: Coordinate {
                        latitude: CENTER.latitude + rng.random_range(-0.02..0.02),
                        longitude: CENTER.longitude + rng.random_range(-0.02..0.02),
                    },
                    capacity_liters: capacity,
                    radius_meters: rng.random_range(20.0..80.0_f64).round(),
                    zone_type,
                })?);
            }
            Ok((admin, collectors, citizens, zones))
        })
        .map_err(|e| format!("seeding demo reference data failed: {}", e))?;
    summary.users = 1 + collectors.len() + citizens.len();
    summary.zones = zones.len();
    info!(
        "Seed: created {} user(s) and {} zone(s) in district Médina",
        summary.users, summary.zones
    );

    for citizen in &citizens {
        for _ in 0..rng.random_range(1..=4) {
            let zone = &zones[rng.random_range(0..zones.len())];
            let fill = rng.random_range(10.0..100.0_f64).round();
            let mut submission = ReportSubmission::new(zone.id, fill);
            submission.description = Some(format!("Conteneur à {}% selon {}", fill, citizen.username));
            let report = engine
                .submit_report(citizen.actor(), submission)
                .map_err(|e| format!("demo report failed: {}", e))?;
            summary.reports += 1;

            let outcome = rng.random_range(0..10);
            if outcome < 7 {
                engine
                    .verify_report(admin.actor(), report.id, None)
                    .map_err(|e| format!("demo verification failed: {}", e))?;
            } else if outcome < 8 {
                let reason = REJECTION_REASONS[rng.random_range(0..REJECTION_REASONS.len())];
                engine
                    .reject_report(admin.actor(), report.id, reason)
                    .map_err(|e| format!("demo rejection failed: {}", e))?;
            }
        }
    }

    // hand every urgent zone with a schedule to a collector
    let queue = engine
        .collection_queue()
        .map_err(|e| format!("demo queue failed: {}", e))?;
    for (index, entry) in queue.iter().filter(|e| e.urgent).enumerate() {
        let Some(schedule) = &entry.schedule else {
            continue;
        };
        let collector = &collectors[index % collectors.len()];
        engine
            .assign_schedule(admin.actor(), schedule.id, collector.id)
            .map_err(|e| format!("demo assignment failed: {}", e))?;
    }

    info!(
        "Seed: demo complete (reports={}, queued_zones={})",
        summary.reports,
        queue.len()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineSettings;
    use crate::engine::achievements::default_catalog;
    use crate::notify::MemorySink;
    use crate::store::MemoryStore;

    #[test]
    fn demo_seed_is_deterministic_and_runs_once() {
        let sink = MemorySink::new();
        let mut engine = Engine::new(MemoryStore::new(), &sink, EngineSettings::default());

        let first = run(&mut engine, &default_catalog(), true).unwrap();
        assert_eq!(first.achievements, 6);
        assert_eq!(first.users, 9);
        assert_eq!(first.zones, DEMO_ZONES.len());
        assert!(first.reports >= DEMO_CITIZENS.len());

        let again = run(&mut engine, &default_catalog(), true).unwrap();
        assert_eq!(again.users, 0);
        assert_eq!(again.reports, 0);

        let other_sink = MemorySink::new();
        let mut replay = Engine::new(MemoryStore::new(), &other_sink, EngineSettings::default());
        assert_eq!(run(&mut replay, &default_catalog(), true).unwrap(), first);
    }
}
