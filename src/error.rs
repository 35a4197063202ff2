//! Error taxonomy (spec.md §7): protocol/state errors surfaced to clients as
//! a `Response`, and storage errors surfaced either inline or as a
//! `PersistError` frame.

use thiserror::Error;

/// Errors raised by the handler pipeline and topic manager. Each variant
/// maps to exactly one HTTP-style response code via [`BrokerError::status_code`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("unknown action")]
    BadAction,
    #[error("topic must not be empty")]
    EmptyTopic,
    #[error("data must not be empty")]
    EmptyData,
    #[error("data is not a JSON object: {0}")]
    MalformedData(String),
    #[error("schema doesn't match topics current schema")]
    SchemaMismatch,
    #[error("unauthorized")]
    Unauthorized,
    #[error("client id already in use")]
    ClientIdConflict,
    #[error("topic not found: {0}")]
    TopicNotFound(String),
    #[error("topic already exists with a different schema: {0}")]
    TopicAlreadyExistsWithDifferentSchema(String),
    #[error("session is not subscribed to this topic")]
    NotSubscribed,
    #[error("topic has no schema")]
    NoSchema,
    #[error("no such schema version: {0}")]
    NoSuchVersion(u64),
}

impl BrokerError {
    /// HTTP-style status code used on the `Response.code` field.
    pub fn status_code(&self) -> u16 {
        match self {
            BrokerError::BadAction
            | BrokerError::EmptyTopic
            | BrokerError::EmptyData
            | BrokerError::MalformedData(_)
            | BrokerError::SchemaMismatch => 400,
            BrokerError::Unauthorized => 401,
            BrokerError::ClientIdConflict => 409,
            BrokerError::TopicNotFound(_)
            | BrokerError::TopicAlreadyExistsWithDifferentSchema(_)
            | BrokerError::NotSubscribed
            | BrokerError::NoSchema
            | BrokerError::NoSuchVersion(_) => 500,
        }
    }
}

/// Errors raised by a storage backend (spec.md §4.1/§7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("failed to open storage backend: {0}")]
    StorageOpen(String),
    #[error("storage is closed")]
    StorageClosed,
    #[error("persistence queue is full")]
    QueueFull,
    #[error("storage write failed: {0}")]
    WriteError(String),
    #[error("persistence timed out")]
    PersistTimeout,
    #[error("in-memory state was updated but storage delete failed: {0}")]
    StoragePartial(String),
    #[error("operation canceled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(BrokerError::BadAction.status_code(), 400);
        assert_eq!(BrokerError::EmptyTopic.status_code(), 400);
        assert_eq!(BrokerError::SchemaMismatch.status_code(), 400);
        assert_eq!(BrokerError::Unauthorized.status_code(), 401);
        assert_eq!(BrokerError::ClientIdConflict.status_code(), 409);
        assert_eq!(BrokerError::TopicNotFound("t".into()).status_code(), 500);
        assert_eq!(BrokerError::NotSubscribed.status_code(), 500);
    }
}
