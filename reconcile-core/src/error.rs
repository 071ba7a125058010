use std::fmt;

/// The full error taxonomy of the sync engine (spec §7). Every public
/// operation returns `Result<_, SyncError>`; only programmer errors
/// (contract violations) panic.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    // -- Eligibility --
    #[error("sync is disabled by policy")]
    PolicyDisabled,
    #[error("no authenticated session")]
    NotAuthenticated,
    #[error("subscription does not include required feature: {feature}")]
    SubscriptionRequired { feature: String },
    #[error("eligibility conditions not met: {reason}")]
    ConditionsNotMet { reason: String },
    #[error("too many concurrent operations (max {max})")]
    TooManyConcurrentOperations { max: usize },
    #[error("an operation for fingerprint ({family}, {operation:?}) is already active")]
    DuplicateOperation { family: String, operation: String },

    // -- Transport --
    #[error("network unavailable")]
    NetworkUnavailable,
    #[error("operation timed out")]
    Timeout,
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("rate limited{}", .retry_after_ms.map(|m| format!(", retry after {m}ms")).unwrap_or_default())]
    RateLimited { retry_after_ms: Option<u64> },
    #[error("server error {status}{}", .message.as_ref().map(|m| format!(": {m}")).unwrap_or_default())]
    ServerError { status: u16, message: Option<String> },
    #[error("operation cancelled")]
    Cancelled,

    // -- Data --
    #[error("invalid payload for property {property}")]
    InvalidPayload { property: String },
    #[error("schema incompatible for family {family}: {differences:?}")]
    SchemaIncompatible {
        family: String,
        differences: Vec<String>,
    },
    #[error("integrity violation: {kind}")]
    IntegrityViolation { kind: String },

    // -- Conflict --
    #[error("resolution validation failed: {reason}")]
    ResolutionValidationFailed { reason: String },
    #[error("automatic resolution is disabled for this conflict")]
    AutoResolutionDisabled,
    #[error("conflict could not be resolved: {reason}")]
    UnresolvableConflict { reason: String },

    // -- Internal --
    #[error("store failure: {kind}")]
    StoreFailure { kind: String },
    #[error("unknown error: {message}")]
    Unknown { message: String },
}

impl SyncError {
    /// A human-readable message safe to surface to end users: never leaks
    /// internal store/transport error text verbatim (spec §7).
    pub fn user_message(&self) -> String {
        match self {
            SyncError::PolicyDisabled => "Sync is turned off.".to_string(),
            SyncError::NotAuthenticated => "Please sign in to sync.".to_string(),
            SyncError::SubscriptionRequired { .. } => {
                "This feature requires an active subscription.".to_string()
            }
            SyncError::ConditionsNotMet { .. } => {
                "Sync conditions aren't met right now (network, battery, or schedule).".to_string()
            }
            SyncError::TooManyConcurrentOperations { .. } => {
                "Too many syncs are already running.".to_string()
            }
            SyncError::DuplicateOperation { .. } => "That sync is already running.".to_string(),
            SyncError::NetworkUnavailable => "No network connection.".to_string(),
            SyncError::Timeout => "Sync timed out.".to_string(),
            SyncError::Unauthorized | SyncError::Forbidden => {
                "You don't have permission to sync this.".to_string()
            }
            SyncError::NotFound => "The requested item could not be found.".to_string(),
            SyncError::RateLimited { .. } => "Too many requests, please try again shortly.".to_string(),
            SyncError::ServerError { .. } => "The sync server ran into a problem.".to_string(),
            SyncError::Cancelled => "Sync was cancelled.".to_string(),
            SyncError::InvalidPayload { .. } => "One of the records has invalid data.".to_string(),
            SyncError::SchemaIncompatible { .. } => "The data shape doesn't match the server.".to_string(),
            SyncError::IntegrityViolation { .. } => "A data consistency check failed.".to_string(),
            SyncError::ResolutionValidationFailed { .. } => "That conflict resolution isn't valid.".to_string(),
            SyncError::AutoResolutionDisabled => "This conflict needs manual resolution.".to_string(),
            SyncError::UnresolvableConflict { .. } => "This conflict could not be resolved.".to_string(),
            SyncError::StoreFailure { .. } => "A local storage error occurred.".to_string(),
            SyncError::Unknown { .. } => "Something went wrong.".to_string(),
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Exit codes for the CLI front-end (spec §6). Not used by the core engine
/// directly, kept here so the CLI and tests share one source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Ok = 0,
    ConfigError = 2,
    AuthRequired = 3,
    SubscriptionRequired = 4,
    ConflictManualRequired = 5,
    Network = 6,
    Internal = 7,
}

impl From<&SyncError> for ExitCode {
    fn from(err: &SyncError) -> Self {
        match err {
            SyncError::NotAuthenticated | SyncError::Unauthorized => ExitCode::AuthRequired,
            SyncError::SubscriptionRequired { .. } => ExitCode::SubscriptionRequired,
            SyncError::NetworkUnavailable
            | SyncError::Timeout
            | SyncError::RateLimited { .. }
            | SyncError::ServerError { .. } => ExitCode::Network,
            SyncError::StoreFailure { .. } | SyncError::Unknown { .. } | SyncError::IntegrityViolation { .. } => {
                ExitCode::Internal
            }
            SyncError::ResolutionValidationFailed { .. }
            | SyncError::AutoResolutionDisabled
            | SyncError::UnresolvableConflict { .. } => ExitCode::ConflictManualRequired,
            SyncError::PolicyDisabled
            | SyncError::ConditionsNotMet { .. }
            | SyncError::TooManyConcurrentOperations { .. }
            | SyncError::DuplicateOperation { .. }
            | SyncError::Forbidden
            | SyncError::NotFound
            | SyncError::InvalidPayload { .. }
            | SyncError::SchemaIncompatible { .. }
            | SyncError::Cancelled => ExitCode::ConfigError,
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as i32)
    }
}
