//! Handlers for `/users`.

use axum::{Json, extract::State, http::HeaderMap};
use serde::Deserialize;
use serde_json::json;

use nexus_core::store::{NexusStore, NexusUser};

use crate::{
  auth::{authenticate_superuser, hash_password},
  error::{AppError, Result},
  state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct CreateUserBody {
  pub username: String,
  pub password: String,
}

/// `POST /users` — create a regular (non-superuser) API user.
pub async fn create<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
  Json(body): Json<CreateUserBody>,
) -> Result<Json<serde_json::Value>>
where
  S: NexusStore + 'static,
{
  authenticate_superuser(&headers, state.store.as_ref()).await?;

  if body.username.is_empty() || body.password.is_empty() {
    return Err(AppError::BadRequest(
      "username and password must be non-empty".into(),
    ));
  }
  if state
    .store
    .get_user(&body.username)
    .await
    .map_err(AppError::store)?
    .is_some()
  {
    return Err(AppError::Conflict(format!(
      "user {} already exists",
      body.username
    )));
  }

  state
    .store
    .upsert_user(NexusUser {
      username:      body.username.clone(),
      password_hash: hash_password(&body.password)?,
      superuser:     false,
    })
    .await
    .map_err(AppError::store)?;

  Ok(Json(json!({ "username": body.username })))
}
