//! Core type definitions for the wyrld simulation.
//!
//! Entities are identified by stable string keys and cross-reference each
//! other through those keys, never through ownership pointers. All types
//! are serializable so whole sessions can be snapshotted as JSON.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Wrap a raw key.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw key.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id! {
    /// Stable key of a map location node.
    NodeId
}

string_id! {
    /// Stable key of a non-player agent.
    NpcId
}

string_id! {
    /// Stable key of a quest.
    QuestId
}

string_id! {
    /// Key of one simulation session. One writer per session at a time.
    SessionId
}

// ---------------------------------------------------------------------------
// World clock
// ---------------------------------------------------------------------------

/// In-world time, measured in minutes since session genesis.
///
/// Ticks advance this clock explicitly; there is no wall-clock coupling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorldClock {
    total_minutes: u64,
}

impl WorldClock {
    /// Sessions start on day 0 at 08:00.
    pub const GENESIS: Self = Self {
        total_minutes: 8 * 60,
    };

    /// Construct a clock from an absolute minute count.
    #[must_use]
    pub fn from_minutes(total_minutes: u64) -> Self {
        Self { total_minutes }
    }

    /// Total in-world minutes elapsed since genesis.
    #[must_use]
    pub fn total_minutes(&self) -> u64 {
        self.total_minutes
    }

    /// Advance the clock by `minutes`.
    pub fn advance(&mut self, minutes: u64) {
        self.total_minutes += minutes;
    }

    /// Whole in-world days elapsed.
    #[must_use]
    pub fn days(&self) -> u64 {
        self.total_minutes / (24 * 60)
    }

    /// Hour of the current day (0–23).
    #[must_use]
    pub fn hour(&self) -> u64 {
        (self.total_minutes % (24 * 60)) / 60
    }

    /// Minute of the current hour (0–59).
    #[must_use]
    pub fn minute(&self) -> u64 {
        self.total_minutes % 60
    }

    /// Named period of the current day, used for routine tables and
    /// narration context.
    #[must_use]
    pub fn period_of_day(&self) -> DayPeriod {
        match self.hour() {
            5..=7 => DayPeriod::Dawn,
            8..=11 => DayPeriod::Morning,
            12..=13 => DayPeriod::Midday,
            14..=16 => DayPeriod::Afternoon,
            17..=19 => DayPeriod::Evening,
            20..=22 => DayPeriod::Night,
            _ => DayPeriod::DeepNight,
        }
    }

    /// Whether the sun is up (06:00–19:59).
    #[must_use]
    pub fn is_day(&self) -> bool {
        (6..20).contains(&self.hour())
    }
}

impl Default for WorldClock {
    fn default() -> Self {
        Self::GENESIS
    }
}

impl fmt::Display for WorldClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "day {} {:02}:{:02} ({})",
            self.days(),
            self.hour(),
            self.minute(),
            self.period_of_day()
        )
    }
}

/// Named slice of the in-world day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DayPeriod {
    /// 05:00–07:59.
    Dawn,
    /// 08:00–11:59.
    Morning,
    /// 12:00–13:59.
    Midday,
    /// 14:00–16:59.
    Afternoon,
    /// 17:00–19:59.
    Evening,
    /// 20:00–22:59.
    Night,
    /// 23:00–04:59.
    DeepNight,
}

impl fmt::Display for DayPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Dawn => "dawn",
            Self::Morning => "morning",
            Self::Midday => "midday",
            Self::Afternoon => "afternoon",
            Self::Evening => "evening",
            Self::Night => "night",
            Self::DeepNight => "deep night",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Crisis level
// ---------------------------------------------------------------------------

/// Global danger/urgency indicator driving event probability.
///
/// Monotonically non-decreasing during simulation; only explicit quest
/// resolution may lower it. Escalating past [`CrisisLevel::Critical`] has
/// no further effect.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum CrisisLevel {
    /// Nothing looming.
    #[default]
    None,
    /// Distant trouble.
    Low,
    /// Trouble with a direction.
    Medium,
    /// Trouble with a deadline.
    High,
    /// The ceiling.
    Critical,
}

impl CrisisLevel {
    /// Ordinal index, 0 for `None` through 4 for `Critical`.
    #[must_use]
    pub fn index(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }

    /// The next level up, saturating at `Critical`.
    #[must_use]
    pub fn escalated(self) -> Self {
        match self {
            Self::None => Self::Low,
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }

    /// The next level down, saturating at `None`. Used only by explicit
    /// quest resolution; the simulator never de-escalates on its own.
    #[must_use]
    pub fn lowered(self) -> Self {
        match self {
            Self::None | Self::Low => Self::None,
            Self::Medium => Self::Low,
            Self::High => Self::Medium,
            Self::Critical => Self::High,
        }
    }
}

impl fmt::Display for CrisisLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Risk level
// ---------------------------------------------------------------------------

/// Per-region/per-node danger rating, 1 (safe) through 5 (lethal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RiskLevel(u8);

impl RiskLevel {
    /// Lowest risk.
    pub const MIN: Self = Self(1);
    /// Highest risk.
    pub const MAX: Self = Self(5);

    /// Construct a risk level, clamped to 1–5.
    #[must_use]
    pub fn new(level: u8) -> Self {
        Self(level.clamp(1, 5))
    }

    /// Raw ordinal value.
    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }

    /// Risk as a fraction of the maximum, in (0, 1].
    #[must_use]
    pub fn fraction(self) -> f64 {
        f64::from(self.0) / f64::from(Self::MAX.0)
    }
}

impl Default for RiskLevel {
    fn default() -> Self {
        Self::MIN
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Weather
// ---------------------------------------------------------------------------

/// Per-region weather. `Eerie` is weighted up when the crisis level is
/// high, giving the world a visible tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Weather {
    /// Open skies.
    #[default]
    Clear,
    /// Grey cover.
    Overcast,
    /// Steady rain.
    Rain,
    /// Wind and thunder.
    Storm,
    /// Sight down to a stone's throw.
    Fog,
    /// Snowfall.
    Snow,
    /// Wrong-colored light, still air.
    Eerie,
}

impl Weather {
    /// All variants, in fixed order. Indexed by weighted draws.
    pub const ALL: [Self; 7] = [
        Self::Clear,
        Self::Overcast,
        Self::Rain,
        Self::Storm,
        Self::Fog,
        Self::Snow,
        Self::Eerie,
    ];
}

impl fmt::Display for Weather {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Clear => "clear",
            Self::Overcast => "overcast",
            Self::Rain => "rain",
            Self::Storm => "storm",
            Self::Fog => "fog",
            Self::Snow => "snow",
            Self::Eerie => "eerie",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
