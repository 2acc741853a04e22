//! Error types for `nexus-core`.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("bank connection not found: {0}")]
  ConnectionNotFound(String),

  #[error("bank account not found: {0}")]
  AccountNotFound(String),

  #[error("payment initiation not found: {0}")]
  InitiationNotFound(Uuid),

  #[error("scheduled task not found: {0}")]
  TaskNotFound(String),

  #[error("{0} already exists")]
  AlreadyExists(String),

  #[error("initiation request uid {uid:?} was already used with a different body")]
  UidReused { uid: String },

  #[error("invalid amount {input:?}: {reason}")]
  InvalidAmount { input: String, reason: String },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
