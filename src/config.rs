// Engine configuration: compiled defaults plus the runtime knobs from the
// engine_config table.

use crate::badges::BadgeRegistry;
use crate::calendar::DayBoundary;
use crate::error::ValidationError;
use crate::journal::TREND_EPSILON;
use crate::league::LeaguePolicy;
use crate::EngineSettings;

/// One-time bonus for the very first login
pub const FIRST_LOGIN_BONUS: u64 = 100;

/// One-time bonus per task kind on its first completion
pub const FIRST_TASK_BONUS: u64 = 150;

/// Bonus each time the best streak is raised
pub const BEST_STREAK_BONUS: u64 = 50;

pub const DEFAULT_MAX_COMMIT_ATTEMPTS: u32 = 5;

/// Weeks (ending with the requested one) the weekly trend looks across
pub const DEFAULT_TREND_WINDOW_WEEKS: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BonusSchedule {
    pub first_login: u64,
    pub first_task: u64,
    pub best_streak_improvement: u64,
}

impl Default for BonusSchedule {
    fn default() -> Self {
        BonusSchedule {
            first_login: FIRST_LOGIN_BONUS,
            first_task: FIRST_TASK_BONUS,
            best_streak_improvement: BEST_STREAK_BONUS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub day_boundary: DayBoundary,
    pub league: LeaguePolicy,
    pub badges: BadgeRegistry,
    pub bonuses: BonusSchedule,
    pub max_commit_attempts: u32,
    pub trend_epsilon: f32,
    pub trend_window_weeks: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            day_boundary: DayBoundary::UTC,
            league: LeaguePolicy::default(),
            badges: BadgeRegistry::default(),
            bonuses: BonusSchedule::default(),
            max_commit_attempts: DEFAULT_MAX_COMMIT_ATTEMPTS,
            trend_epsilon: TREND_EPSILON,
            trend_window_weeks: DEFAULT_TREND_WINDOW_WEEKS,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with the stored settings row
    pub fn from_settings(settings: &EngineSettings) -> Result<Self, ValidationError> {
        if settings.max_commit_attempts == 0 {
            return Err(ValidationError::MalformedPayload("max_commit_attempts must be at least 1".into()));
        }
        Ok(EngineConfig {
            day_boundary: DayBoundary::new(settings.day_boundary_offset_minutes)?,
            max_commit_attempts: settings.max_commit_attempts,
            ..EngineConfig::default()
        })
    }
}
