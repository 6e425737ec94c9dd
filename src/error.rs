// Error taxonomy for the progression engine.
// Reducers flatten these to String at the SpacetimeDB boundary.

use thiserror::Error;

/// Input or state that was rejected before anything was mutated
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("unknown badge id: {0}")]
    UnknownBadge(String),

    #[error("duplicate badge id in catalogue: {0}")]
    DuplicateBadge(String),

    #[error("intensity {0} is outside 1..=5")]
    IntensityOutOfRange(u8),

    #[error("journal entry has no emotions")]
    EmptyEmotions,

    #[error("journal entry has a blank emotion label")]
    BlankEmotion,

    #[error("invalid calendar date {year:04}-{month:02}-{day:02}")]
    InvalidDate { year: i32, month: u8, day: u8 },

    #[error("invalid date range: {0}")]
    InvalidRange(String),

    #[error("malformed child state: {0}")]
    MalformedState(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("invalid league policy: {0}")]
    InvalidPolicy(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("child not found: {0}")]
    UnknownChild(String),

    #[error("child already exists: {0}")]
    ChildExists(String),

    /// Optimistic version check lost against another writer
    #[error("could not save progress for {child_id} after {attempts} attempts, please retry")]
    ConcurrencyConflict { child_id: String, attempts: u32 },

    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    /// Validation and unknown-child failures are the caller's to fix; the rest are retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ConcurrencyConflict { .. } | EngineError::Storage(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
