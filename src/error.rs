// Federation error taxonomy.
//
// Store and CLI code returns anyhow::Result. Anything that can surface to a
// peer over HTTP goes through FederationError so the web layer can map it to
// a status code (see web::mod).

/// Errors produced while resolving, delivering or receiving federated objects.
#[derive(Debug, thiserror::Error)]
pub enum FederationError {
    /// A referenced local object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A local request violates an invariant (self-follow, PRIVATE without
    /// recipient, ...).
    #[error("invalid request: {0}")]
    Validation(String),

    /// Inbound call without valid node credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// A peer could not be reached or answered with a failure status.
    #[error("remote node unavailable: {0}")]
    RemoteUnavailable(String),

    /// A peer sent a payload we cannot interpret.
    #[error("malformed remote data: {0}")]
    MalformedRemoteData(String),

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

pub type FederationResult<T> = Result<T, FederationError>;

impl FederationError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        FederationError::NotFound(what.to_string())
    }

    pub fn malformed(what: impl std::fmt::Display) -> Self {
        FederationError::MalformedRemoteData(what.to_string())
    }
}

impl From<reqwest::Error> for FederationError {
    fn from(err: reqwest::Error) -> Self {
        FederationError::RemoteUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_keeps_context_chain() {
        let inner = anyhow::anyhow!("disk full").context("Failed to insert post p1");
        let err: FederationError = inner.into();
        let msg = err.to_string();
        assert!(msg.contains("Failed to insert post p1"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn test_helpers() {
        assert!(matches!(
            FederationError::not_found("post p1"),
            FederationError::NotFound(ref s) if s == "post p1"
        ));
        assert!(matches!(
            FederationError::malformed("no id"),
            FederationError::MalformedRemoteData(_)
        ));
    }
}
