//! Typed errors that callers are expected to match on.
//!
//! Only [`AuditError`] ever escapes an audit. Upstream outages and narrative
//! failures are absorbed inside the orchestrator and show up as reduced data,
//! never as an error.

/// Fatal audit failures.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// The package identifier was rejected before any lookup happened.
    #[error("invalid package identifier '{input}': {reason}")]
    InvalidIdentifier { input: String, reason: String },

    /// The metadata lookup failed, so there is nothing to score.
    #[error("package not found: {package} ({reason})")]
    PackageNotFound { package: String, reason: String },
}

impl AuditError {
    pub(crate) fn invalid(input: impl Into<String>, reason: impl Into<String>) -> Self {
        AuditError::InvalidIdentifier {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

/// Configuration values that would break scoring guarantees.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid scoring weights: {0}")]
    InvalidWeights(String),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}
