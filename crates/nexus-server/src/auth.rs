//! HTTP Basic authentication against the `nexus_users` table.

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::http::HeaderMap;
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};

use nexus_core::store::{NexusStore, NexusUser};

use crate::error::AppError;

/// Verify the `Authorization` header and return the authenticated user.
pub async fn authenticate<S>(
  headers: &HeaderMap,
  store: &S,
) -> Result<NexusUser, AppError>
where
  S: NexusStore,
{
  let header_val = headers
    .get(axum::http::header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .ok_or(AppError::Unauthorized)?;

  let encoded = header_val
    .strip_prefix("Basic ")
    .ok_or(AppError::Unauthorized)?;

  let decoded = B64.decode(encoded).map_err(|_| AppError::Unauthorized)?;
  let creds =
    std::str::from_utf8(&decoded).map_err(|_| AppError::Unauthorized)?;
  let (username, password) =
    creds.split_once(':').ok_or(AppError::Unauthorized)?;

  let user = store
    .get_user(username)
    .await
    .map_err(AppError::store)?
    .ok_or(AppError::Unauthorized)?;

  let parsed_hash = PasswordHash::new(&user.password_hash)
    .map_err(|_| AppError::Unauthorized)?;
  Argon2::default()
    .verify_password(password.as_bytes(), &parsed_hash)
    .map_err(|_| AppError::Unauthorized)?;

  Ok(user)
}

/// Like [`authenticate`], but additionally requires the superuser flag.
pub async fn authenticate_superuser<S>(
  headers: &HeaderMap,
  store: &S,
) -> Result<NexusUser, AppError>
where
  S: NexusStore,
{
  let user = authenticate(headers, store).await?;
  if !user.superuser {
    return Err(AppError::Forbidden);
  }
  Ok(user)
}

/// Hash a password into the PHC string stored in `nexus_users`.
pub fn hash_password(password: &str) -> Result<String, AppError> {
  use argon2::{PasswordHasher, password_hash::SaltString};
  let salt = SaltString::generate(&mut rand_core::OsRng);
  Argon2::default()
    .hash_password(password.as_bytes(), &salt)
    .map(|h| h.to_string())
    .map_err(|e| AppError::BadRequest(format!("cannot hash password: {e}")))
}
