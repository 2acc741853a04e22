//! Error types for `nexus-iso20022`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("malformed camt document: {0}")]
  Camt(String),

  #[error("unsupported document root: {0}")]
  UnsupportedRoot(String),

  #[error("xml error: {0}")]
  Xml(String),
}

impl From<quick_xml::DeError> for Error {
  fn from(e: quick_xml::DeError) -> Self { Error::Xml(e.to_string()) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
