use thiserror::Error;

use crate::types::Phase;

/// Error kinds surfaced across the pipeline. Errors local to a unit (one
/// symbol, one article, one provider attempt) are caught at the smallest
/// enclosing boundary and recorded in run state rather than propagated.
#[derive(Error, Debug)]
pub enum ScreenerError {
    #[error("config error: {0}")]
    Config(String),

    /// Timeout, 429, 5xx or an empty/HTML-shaped body. Retried internally;
    /// surfaces only once retries are exhausted.
    #[error("transient provider error ({provider}): {reason}")]
    ProviderTransient { provider: String, reason: String },

    /// 401/403/404 or an unsupported symbol. Short-circuits to the next
    /// provider without retrying.
    #[error("permanent provider error ({provider}): {reason}")]
    ProviderPermanent { provider: String, reason: String },

    /// Every configured provider failed for the symbol.
    #[error("all providers exhausted for {symbol}")]
    ProviderExhausted { symbol: String },

    /// Symbol failed a liquidity or price gate.
    #[error("validation failed for {symbol}: {reason}")]
    Validation { symbol: String, reason: String },

    /// One ensemble component raised; its weight is redistributed.
    #[error("component {component} failed: {reason}")]
    Component { component: String, reason: String },

    #[error("phase {phase:?} exceeded its timeout")]
    PhaseTimeout { phase: Phase },

    #[error("cancelled")]
    Cancelled,

    #[error("cache error: {0}")]
    Cache(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ScreenerError {
    /// Transient errors are retried against the same provider before
    /// failing over.
    pub fn is_transient(&self) -> bool {
        matches!(self, ScreenerError::ProviderTransient { .. })
    }

    pub fn transient(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        ScreenerError::ProviderTransient {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn permanent(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        ScreenerError::ProviderPermanent {
            provider: provider.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ScreenerError::transient("yahoo_chart", "429").is_transient());
        assert!(!ScreenerError::permanent("yahoo_chart", "404").is_transient());
        assert!(!ScreenerError::Cancelled.is_transient());
    }
}
