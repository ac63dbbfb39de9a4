//! Error taxonomy for contract transactions
use crate::repository::Kind;
use crate::transition::TransitionKind;
use std::convert::Infallible;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    #[error("invalid argument: {0}")]
    Validation(String),
    #[error("{kind} {key} does not exist")]
    NotFound { kind: Kind, key: String },
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("cannot {attempted} while status is {status}")]
    InvalidTransition {
        status: String,
        attempted: TransitionKind,
    },
    #[error("version conflict on {key}: read version {expected}, committed version is {found}")]
    Conflict {
        key: String,
        expected: u64,
        found: u64,
    },
    #[error("unknown transaction {0}")]
    UnknownTransition(String),
    #[error("failed to generate identifier: {0}")]
    Identifier(String),
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("failed to encode record: {0}")]
    Encode(#[from] minicbor::encode::Error<Infallible>),
    #[error("failed to decode record: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("failed to serialise response: {0}")]
    Json(#[from] serde_json::Error),
}

impl LedgerError {
    /// Only version conflicts are worth resubmitting unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Conflict { .. })
    }

    pub(crate) fn not_found(kind: Kind, key: &str) -> Self {
        LedgerError::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    pub(crate) fn invalid(status: impl ToString, attempted: TransitionKind) -> Self {
        LedgerError::InvalidTransition {
            status: status.to_string(),
            attempted,
        }
    }
}
