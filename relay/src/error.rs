use crate::message::{ChainId, Direction};

pub type Result<T, E = RelayError> = std::result::Result<T, E>;

/// A failure of a relay operation.
///
/// Every variant is surfaced to the immediate caller on the write path. The reconciler is the only component which
/// treats some of them (`Storage`, `Decode`, `NotFound`) as recoverable.
#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    /// Malformed or missing arguments. Raised before any state is touched.
    #[error("invalid arguments: {0}")]
    Validation(String),
    /// Required local configuration, such as the signing key or the mediator address, is absent.
    #[error("missing configuration: {0}")]
    Config(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("failed to decode {what}: {reason}")]
    Decode { what: String, reason: String },
    #[error("no {direction} record for {peer} at sequence {seq}")]
    NotFound {
        direction: Direction,
        peer: ChainId,
        seq: u64,
    },
    #[error("mediator call failed: {0}")]
    Transport(String),
    #[error("local contract returned status {status}: {message}")]
    RemoteCall { status: i32, message: String },
    #[error("signing failed: {0}")]
    Signing(String),
    /// The counters and the message log disagree. This needs an operator; it is never corrected automatically.
    #[error("ledger inconsistency: {0}")]
    Inconsistent(String),
}

impl RelayError {
    pub fn decode(what: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        RelayError::Decode {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the reconciler may skip a record which failed with this error and carry on.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            RelayError::Storage(_) | RelayError::Decode { .. } | RelayError::NotFound { .. }
        )
    }
}

impl From<rusqlite::Error> for RelayError {
    fn from(error: rusqlite::Error) -> Self {
        RelayError::Storage(error.to_string())
    }
}
