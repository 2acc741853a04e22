//! Error types and their axum `IntoResponse` mapping.
//!
//! Three layers: protocol errors (EBICS engine, keep the technical code),
//! application errors (not-found, conflict, validation), and everything
//! else, which is logged and collapsed into a neutral 500 body.

use axum::{
  Json,
  http::{HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AppError {
  #[error("unauthorized")]
  Unauthorized,

  #[error("forbidden: superuser required")]
  Forbidden,

  #[error("{0} not found")]
  NotFound(String),

  #[error("conflict: {0}")]
  Conflict(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("ebics error: {0}")]
  Protocol(#[from] nexus_ebics::Error),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("iso20022 error: {0}")]
  Iso20022(#[from] nexus_iso20022::Error),
}

impl AppError {
  pub fn store<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
    Self::Store(Box::new(e))
  }
}

fn error_body(kind: &str, description: String) -> Json<serde_json::Value> {
  Json(json!({ "error": { "type": kind, "description": description } }))
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    match self {
      AppError::Unauthorized => {
        let mut response = (
          StatusCode::UNAUTHORIZED,
          error_body("unauthorized", "Unauthorized".into()),
        )
          .into_response();
        response.headers_mut().insert(
          header::WWW_AUTHENTICATE,
          HeaderValue::from_static("Basic realm=\"nexus\""),
        );
        response
      }
      AppError::Forbidden => (
        StatusCode::FORBIDDEN,
        error_body("forbidden", "Superuser required".into()),
      )
        .into_response(),
      AppError::NotFound(what) => (
        StatusCode::NOT_FOUND,
        error_body("not-found", format!("{what} not found")),
      )
        .into_response(),
      AppError::Conflict(message) => {
        (StatusCode::CONFLICT, error_body("conflict", message)).into_response()
      }
      AppError::BadRequest(message) => {
        (StatusCode::BAD_REQUEST, error_body("bad-request", message))
          .into_response()
      }
      AppError::Protocol(e) => {
        let status = match &e {
          nexus_ebics::Error::Transport(_) => StatusCode::GATEWAY_TIMEOUT,
          nexus_ebics::Error::Bank { .. } => StatusCode::BAD_GATEWAY,
          _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut body = json!({
          "error": { "type": "protocol-error", "description": e.to_string() }
        });
        if let Some(code) = e.technical_code() {
          body["error"]["technicalCode"] = json!(code.name());
        }
        (status, Json(body)).into_response()
      }
      AppError::Store(e) => {
        // Internal detail never reaches the client.
        error!(error = %e, "store failure");
        (
          StatusCode::INTERNAL_SERVER_ERROR,
          error_body("nexus-error", "Internal server error".into()),
        )
          .into_response()
      }
      AppError::Iso20022(e) => {
        error!(error = %e, "iso20022 failure");
        (
          StatusCode::INTERNAL_SERVER_ERROR,
          error_body("nexus-error", "Internal server error".into()),
        )
          .into_response()
      }
    }
  }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn protocol_errors_keep_the_technical_code() {
    let e = AppError::Protocol(nexus_ebics::Error::bank(
      nexus_ebics::TechnicalCode::AmountCheckFailed,
      None,
    ));
    let response = e.into_response();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
  }

  #[test]
  fn store_errors_collapse_to_a_neutral_500() {
    let e = AppError::store(std::io::Error::other("secret detail"));
    let response = e.into_response();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
  }
}
