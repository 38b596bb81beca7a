use thiserror::Error;

use crate::domain::repositories::entity_store::EntityId;

#[derive(Debug, Error)]
pub enum IapSyncError {
    /// Signature, certificate chain or envelope shape could not be trusted.
    #[error("signed data verification failed: {0}")]
    Verification(String),

    /// A local record required by a state transition does not exist (yet).
    #[error("data inconsistency: {0}")]
    DataInconsistency(String),

    /// The plan catalog (or another operator-managed input) is missing
    /// something the event refers to. Retrying will not help.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The App Store Server API does not know the transaction yet.
    #[error("transaction not yet visible upstream: {0}")]
    TransientUpstream(String),

    #[error("App Store Server API error: {0}")]
    Upstream(String),

    /// Malformed or mismatching client input.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IapSyncError {
    /// Whether a FAILURE audit record was already written where the error was
    /// raised.
    pub fn is_audited(&self) -> bool {
        matches!(
            self,
            IapSyncError::DataInconsistency(_) | IapSyncError::Configuration(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: EntityId },

    #[error("{kind} with key '{key}' already exists")]
    UniqueViolation { kind: &'static str, key: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required configuration missing: {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("could not load trusted root certificate: {0}")]
    RootCertificate(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_handler_level_failures_count_as_audited() {
        assert!(IapSyncError::DataInconsistency("x".into()).is_audited());
        assert!(IapSyncError::Configuration("x".into()).is_audited());
        assert!(!IapSyncError::Verification("x".into()).is_audited());
        assert!(!IapSyncError::Store(StoreError::Backend("x".into())).is_audited());
    }
}
