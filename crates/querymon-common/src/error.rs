/// Errors raised by monitor execution and alert lifecycle operations.
///
/// Every failure the engine can surface falls into one of these kinds, so
/// callers can branch on severity: a `QueryFailed` stays scoped to one
/// trigger, a `Transient` is retried under backoff, a `Fatal` aborts the
/// current run.
///
/// # Examples
///
/// ```rust
/// use querymon_common::error::AlertError;
///
/// let err = AlertError::Validation("monitor must have 1..=10 triggers".to_string());
/// assert!(err.to_string().contains("triggers"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    /// An invariant on a monitor or trigger definition does not hold.
    #[error("invalid monitor definition: {0}")]
    Validation(String),

    /// The caller lacks access to the monitor or its backing indices.
    #[error("access denied: {0}")]
    AuthZ(String),

    /// A referenced monitor, trigger, or result column does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The query executor rejected or failed the composed query.
    #[error("query execution failed: {0}")]
    QueryFailed(String),

    /// The store pushed back (429); retryable under the backoff policy.
    #[error("storage rejected request, retry later: {0}")]
    Transient(String),

    /// A non-retryable failure; aborts the current monitor run.
    #[error("fatal: {0}")]
    Fatal(String),

    /// The caller's cancellation signal fired mid-operation.
    #[error("operation cancelled: {0}")]
    Cancelled(String),
}

impl AlertError {
    /// Whether the error may succeed on retry without operator intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self, AlertError::Transient(_))
    }
}

/// Convenience `Result` alias for alerting operations.
pub type Result<T> = std::result::Result<T, AlertError>;
