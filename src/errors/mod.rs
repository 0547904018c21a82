use thiserror::Error;

/// Typed error hierarchy for the execution engine.
///
/// Use at module boundaries (driver entry points, policy checks, config
/// validation). Internal/leaf functions can continue using `anyhow::Result`
/// — the `Internal` variant allows seamless conversion via the `?` operator.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    PolicyViolation(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("canceled")]
    Canceled,

    #[error("timed out")]
    TimedOut,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ExecError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn policy(msg: impl Into<String>) -> Self {
        Self::PolicyViolation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether this error is transient (used only for observability; never
    /// changes dispatch behavior).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Canceled | Self::TimedOut | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_input_formats_message_verbatim() {
        let e = ExecError::invalid("commands is required");
        assert_eq!(e.to_string(), "commands is required");
    }

    #[test]
    fn internal_wraps_anyhow_via_from() {
        let cause = anyhow::anyhow!("boom");
        let e: ExecError = cause.into();
        assert!(e.to_string().contains("boom"));
    }

    #[test]
    fn canceled_and_timed_out_are_retryable() {
        assert!(ExecError::Canceled.is_retryable());
        assert!(ExecError::TimedOut.is_retryable());
        assert!(!ExecError::policy("blocked command: rm").is_retryable());
    }
}
