use thiserror::Error;

/// Errors caused by calling an operation in a state that doesn't allow it.
///
/// These are mistakes in the calling code rather than environmental failures, and are reported immediately to the
/// caller.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum UsageError {
    /// The timer was stopped before it was ever started.
    #[error("timer has not been started")]
    TimerNotStarted,

    /// The timer was asked to send before it measured a duration.
    #[error("timer has no recorded duration to send")]
    NothingRecorded,

    /// The timer already sent its measurement.
    #[error("timer has already sent its measurement")]
    AlreadySent,

    /// A stop was requested from a sender that isn't running.
    #[error("sender is not running")]
    SenderNotRunning,
}
