//! Error types returned by the engine and its stores.

use crate::domain::{Entity, Role, UserId};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A state machine precondition was violated.
    #[error("{entity} {id}: cannot go from {from} to {to}")]
    InvalidTransition {
        entity: Entity,
        id: i64,
        from: &'static str,
        to: &'static str,
    },
    /// The requested transition is already satisfied; nothing was written.
    #[error("{entity} {id} is already {state}")]
    AlreadyInState {
        entity: Entity,
        id: i64,
        state: &'static str,
    },
    #[error("user {user} cannot be assigned a collection (role is {role}, expected collector)")]
    InvalidAssignee { user: UserId, role: Role },
    #[error("{entity} {id} not found")]
    NotFound { entity: Entity, id: i64 },
    /// Optimistic update lost a race. Retried internally before it reaches a caller.
    #[error("concurrent update on {entity} {id} (gave up after {attempts} attempt(s))")]
    ConcurrencyConflict { entity: Entity, id: i64, attempts: u32 },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl EngineError {
    pub fn not_found(entity: Entity, id: i64) -> Self {
        EngineError::NotFound { entity, id }
    }

    pub fn conflict(entity: Entity, id: i64) -> Self {
        EngineError::ConcurrencyConflict { entity, id, attempts: 1 }
    }

    /// `AlreadyInState` is an idempotent no-op, not a failure.
    pub fn is_noop(&self) -> bool {
        matches!(self, EngineError::AlreadyInState { .. })
    }

    /// Lost optimistic races and transactions the database aborted to break a
    /// serialization or lock cycle. Both are safe to run again from the start.
    pub fn is_conflict(&self) -> bool {
        match self {
            EngineError::ConcurrencyConflict { .. } => true,
            EngineError::Storage(err) => err.is_retryable(),
            _ => false,
        }
    }
}

/// Failures of the persistence layer itself.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database connection failed: {0}")]
    Connection(String),
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error("serialization failure: {0}")]
    SerializationConflict(String),
    #[error("deadlock: {0}")]
    Deadlock(String),
    #[error("corrupt row in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },
    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::SerializationConflict(_) | StoreError::Deadlock(_))
    }
}

impl From<DieselError> for StoreError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::DatabaseError(kind, info) => match kind {
                DatabaseErrorKind::UniqueViolation => StoreError::UniqueViolation(info.message().to_string()),
                DatabaseErrorKind::SerializationFailure => StoreError::SerializationConflict(info.message().to_string()),
                // diesel has no kind for SQLSTATE 40P01; postgres words it this way
                DatabaseErrorKind::Unknown if info.message().starts_with("deadlock detected") => {
                    StoreError::Deadlock(info.message().to_string())
                }
                DatabaseErrorKind::ClosedConnection => StoreError::Connection(info.message().to_string()),
                other => StoreError::Database(format!("{:?}: {}", other, info.message())),
            },
            DieselError::BrokenTransactionManager => StoreError::Connection("broken transaction manager".into()),
            other => StoreError::Database(other.to_string()),
        }
    }
}

impl From<DieselError> for EngineError {
    fn from(err: DieselError) -> Self {
        EngineError::Storage(StoreError::from(err))
    }
}
