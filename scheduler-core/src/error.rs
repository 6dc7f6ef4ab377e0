use thiserror::Error;

/// Recoverable failures surfaced to a caller.
///
/// Programming-error conditions (double allocation of a slot, negative
/// bandwidth after a free, duplicate daemon registration) are not part of
/// this enum: spec-wise they're fatal and are raised with `panic!`.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("profile store I/O error: {0}")]
    ProfileIo(#[from] std::io::Error),

    #[error("malformed profile record: {0}")]
    ProfileFormat(#[from] serde_json::Error),

    #[error("no pending job to schedule")]
    NoPendingJob,
}

pub type Result<T> = std::result::Result<T, ScheduleError>;
