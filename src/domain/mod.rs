//! Domain types for zones, reports, schedules, users and achievements.
//!
//! These types carry no persistence concerns. Enumerations are stored as text
//! columns, so each one knows its canonical lowercase name.

use core::fmt;
use serde::{Deserialize, Serialize};

pub mod achievement;
pub mod event;
pub mod report;
pub mod schedule;
pub mod user;
pub mod zone;

pub use achievement::{Achievement, ActivityCounters, ConditionType, NewAchievement, ReportSummary, UserAchievement};
pub use event::EngineEvent;
pub use report::{ActionType, NewReport, NewReportAction, ReportAction, ReportState, WasteReport};
pub use schedule::{CollectionSchedule, NewSchedule, ScheduleState};
pub use user::{Actor, NewUser, User};
pub use zone::{Coordinate, NewZone, Zone};

// =====================
// Scalar ID newtype wrappers
// =====================

macro_rules! id_newtype {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(pub i64);

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }
        )*
    };
}

id_newtype!(DistrictId, ZoneId, ReportId, ActionId, ScheduleId, UserId, AchievementId);

/// Entity kinds named in errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Entity {
    District,
    Zone,
    Report,
    Schedule,
    User,
    Achievement,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Entity::District => "district",
            Entity::Zone => "zone",
            Entity::Report => "report",
            Entity::Schedule => "schedule",
            Entity::User => "user",
            Entity::Achievement => "achievement",
        };
        f.write_str(name)
    }
}

/// Declares a fieldless enum persisted as a lowercase text column.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, ::serde::Serialize, ::serde::Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} `{}`", stringify!($name), other)),
                }
            }
        }
    };
}

pub(crate) use text_enum;

text_enum!(
    Role {
        Admin => "admin",
        Collector => "collector",
        Citizen => "citizen",
    }
);

text_enum!(
    /// Urgency tier. Variants are ordered so that `Low < Medium < High`.
    PriorityLevel {
        Low => "low",
        Medium => "medium",
        High => "high",
    }
);

impl PartialOrd for PriorityLevel {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PriorityLevel {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (*self as u8).cmp(&(*other as u8))
    }
}

text_enum!(
    ZoneType {
        Residential => "residential",
        Commercial => "commercial",
        Industrial => "industrial",
        Public => "public",
    }
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_enums_round_trip_through_their_names() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), *role);
        }
        for zone_type in ZoneType::ALL {
            assert_eq!(zone_type.to_string().parse::<ZoneType>().unwrap(), *zone_type);
        }
        assert!("urgent".parse::<PriorityLevel>().is_err());
    }

    #[test]
    fn priority_levels_are_ordered() {
        assert!(PriorityLevel::Low < PriorityLevel::Medium);
        assert!(PriorityLevel::Medium < PriorityLevel::High);
        assert_eq!(PriorityLevel::ALL.iter().max(), Some(&PriorityLevel::High));
    }
}
