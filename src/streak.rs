// Day-login streak rules.

use spacetimedb::SpacetimeType;

use crate::calendar::{days_between, DateKey};
use crate::error::ValidationError;

/// What a login did to the streak
#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakEvent {
    FirstLogin,
    SameDay,
    Continued,
    Broken,
}

impl StreakEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreakEvent::FirstLogin => "first_login",
            StreakEvent::SameDay => "same_day",
            StreakEvent::Continued => "continued",
            StreakEvent::Broken => "broken",
        }
    }

    /// Only these two can raise the best streak
    pub fn extends_streak(&self) -> bool {
        matches!(self, StreakEvent::FirstLogin | StreakEvent::Continued)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakOutcome {
    pub new_streak: u32,
    pub event: StreakEvent,
    /// Login day precedes the last recorded one (clock skew or a backdated event)
    pub clock_anomaly: bool,
}

/// Decide whether a login on `today` holds, extends or resets the streak
pub fn evaluate_login(
    last_login_day: Option<DateKey>,
    today: DateKey,
    current_streak: u32,
) -> Result<StreakOutcome, ValidationError> {
    let Some(last) = last_login_day else {
        return Ok(StreakOutcome { new_streak: 1, event: StreakEvent::FirstLogin, clock_anomaly: false });
    };

    let outcome = match days_between(today, last)? {
        0 => StreakOutcome { new_streak: current_streak, event: StreakEvent::SameDay, clock_anomaly: false },
        1 => StreakOutcome {
            new_streak: current_streak.saturating_add(1),
            event: StreakEvent::Continued,
            clock_anomaly: false,
        },
        d if d > 1 => StreakOutcome { new_streak: 1, event: StreakEvent::Broken, clock_anomaly: false },
        // Never decrement on a backdated login
        _ => StreakOutcome { new_streak: current_streak, event: StreakEvent::SameDay, clock_anomaly: true },
    };
    Ok(outcome)
}
