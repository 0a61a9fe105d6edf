use thiserror::Error;

/// Errors raised by the schedule calculator.
///
/// These are fatal for the affected subscription's scheduling: the store flags
/// the subscription instead of silently falling back to a default.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("Unknown time zone `{0}` (expected an IANA identifier such as `Europe/Berlin`)")]
    InvalidTimeZone(String),

    #[error("Unknown frequency `{0}` (expected daily, weekly or monthly)")]
    InvalidFrequency(String),

    #[error("Invalid time of day `{0}` (expected HH:MM)")]
    InvalidTimeOfDay(String),

    #[error("Unknown report kind `{0}`")]
    InvalidReportKind(String),

    /// The calendar arithmetic left chrono's representable range.
    #[error("No representable next run after {0}")]
    OutOfRange(String),
}

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("Subscription not found: {id}")]
    SubscriptionNotFound { id: String },

    #[error("Delivery record not found: {id}")]
    DeliveryNotFound { id: String },

    /// (recipient_email, report_kind, frequency) must be unique.
    #[error("Subscription already exists for {email} ({kind}, {frequency})")]
    DuplicateSubscription {
        email: String,
        kind: String,
        frequency: String,
    },

    /// The claim on a subscription expired or was taken over before the
    /// schedule could be advanced.
    #[error("Claim lost on subscription {id}")]
    ClaimLost { id: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Failure reported by a [`ReportGenerator`](crate::pipeline::ReportGenerator).
#[derive(Debug, Clone, Error)]
pub enum GenerateError {
    /// The generation service could not be reached.
    #[error("report service unavailable: {0}")]
    Unavailable(String),

    /// The service answered but the payload was unusable.
    #[error("invalid report payload: {0}")]
    InvalidResponse(String),

    #[error("report generation failed: {0}")]
    Failed(String),
}

/// Failure reported by a [`Transport`](crate::pipeline::Transport).
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The relay refused the message (bad address, policy, auth).
    #[error("message rejected: {0}")]
    Rejected(String),

    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// The message could not be built from the report content.
    #[error("message build failed: {0}")]
    Build(String),
}
