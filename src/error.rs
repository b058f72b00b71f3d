use thiserror::Error;

/// Top-level error kind surfaced at the scheduler's tick-level error handler.
///
/// Most layers below the scheduler propagate `anyhow::Error` so callers can
/// attach context freely; `AppError` exists for the handful of cases the
/// scheduler needs to match on by kind (see `scheduler::classify`).
#[derive(Error, Debug)]
pub enum AppError {
    #[error("backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("lease not acquired for token {0}")]
    LeaseNotAcquired(i64),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("unknown agent blueprint: {0}")]
    UnknownBlueprint(String),

    #[error("scheduler invariant violated: {0}")]
    SchedulerInvariant(String),
}
