use seguro_proto::WireError;

/// Failures surfaced to callers. None of them are retried inside the relay.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("{0} already exists")]
    Conflict(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Connection-scoped; cleaned up by the connection registry and never
    /// reported to other clients.
    #[error("transport failure: {0}")]
    TransportFailure(String),
}

impl RelayError {
    /// Short machine-readable tag used in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Conflict(_) => "conflict",
            RelayError::NotFound(_) => "not_found",
            RelayError::Forbidden(_) => "forbidden",
            RelayError::InvalidInput(_) => "invalid_input",
            RelayError::TransportFailure(_) => "transport_failure",
        }
    }
}

impl From<WireError> for RelayError {
    fn from(err: WireError) -> Self {
        RelayError::InvalidInput(err.to_string())
    }
}
