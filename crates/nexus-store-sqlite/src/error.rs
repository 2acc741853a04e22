//! Error type for `nexus-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] nexus_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("stored value could not be decoded: {0}")]
  Decode(String),

  #[error("{0} not found")]
  NotFound(String),

  #[error("{0} already exists")]
  AlreadyExists(String),
}

impl Error {
  /// Map a uniqueness violation to [`Error::AlreadyExists`], leaving other
  /// database errors untouched.
  pub(crate) fn on_conflict(self, what: &str) -> Self {
    if let Error::Database(tokio_rusqlite::Error::Rusqlite(
      rusqlite::Error::SqliteFailure(e, _),
    )) = &self
      && e.code == rusqlite::ErrorCode::ConstraintViolation
    {
      return Error::AlreadyExists(what.to_owned());
    }
    self
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
