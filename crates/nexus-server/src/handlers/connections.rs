//! Handlers for `/bank-connections`.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/bank-connections` | |
//! | `POST` | `/bank-connections` | superuser; generates the key triple |
//! | `POST` | `/bank-connections/delete-connection` | superuser |
//! | `GET`  | `/bank-connections/{name}` | subscriber details |
//! | `POST` | `/bank-connections/{name}/connect` | INI → HIA → HPB |
//! | `GET`  | `/bank-connections/{name}/hev` | host version smoke test |
//! | `POST` | `/bank-connections/{name}/fetch-accounts` | HTD |
//! | `GET`  | `/bank-connections/{name}/accounts` | offered accounts |
//! | `POST` | `/bank-connections/{name}/import-account` | bind an offer |
//! | `GET`  | `/bank-connections/{name}/messages[/{id}]` | raw camt bodies |

use axum::{
  Json,
  extract::{Path, State},
  http::{HeaderMap, StatusCode, header},
  response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;

use nexus_core::{
  account::OfferedBankAccount,
  clock::Clock as _,
  connection::{BankConnection, ConnectionType, EbicsDialect, EbicsSubscriber, KeyState},
  store::NexusStore,
};
use nexus_ebics::{
  EbicsSession,
  keys::{BankKeys, SubscriberKeys, fingerprint},
};

use crate::{
  auth::{authenticate, authenticate_superuser},
  error::{AppError, Result},
  state::AppState,
};

// ─── Create ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct EbicsConnectionData {
  #[serde(rename = "ebicsURL")]
  pub ebics_url:  String,
  #[serde(rename = "hostID")]
  pub host_id:    String,
  #[serde(rename = "partnerID")]
  pub partner_id: String,
  #[serde(rename = "userID")]
  pub user_id:    String,
  #[serde(rename = "systemID")]
  pub system_id:  Option<String>,
  #[serde(default)]
  pub dialect:    EbicsDialect,
}

#[derive(Debug, Deserialize)]
pub struct CreateConnectionBody {
  pub name: String,
  #[serde(rename = "type")]
  pub connection_type: ConnectionType,
  pub data: EbicsConnectionData,
}

/// `POST /bank-connections` — create a connection plus its subscriber.
/// The key triple is generated here; INI/HIA stay `NOT_SENT`.
pub async fn create<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
  Json(body): Json<CreateConnectionBody>,
) -> Result<Json<serde_json::Value>>
where
  S: NexusStore + 'static,
{
  let user = authenticate_superuser(&headers, state.store.as_ref()).await?;

  if body.name.is_empty() {
    return Err(AppError::BadRequest("connection name must be non-empty".into()));
  }
  if state
    .store
    .get_connection(&body.name)
    .await
    .map_err(AppError::store)?
    .is_some()
  {
    return Err(AppError::Conflict(format!(
      "connection {} already exists",
      body.name
    )));
  }

  // Three 2048-bit key generations; keep them off the async workers.
  let keys = tokio::task::spawn_blocking(SubscriberKeys::generate)
    .await
    .map_err(|e| AppError::store(std::io::Error::other(e)))??;
  let (signature, authentication, encryption) = keys.to_der()?;

  let connection = BankConnection {
    name:            body.name.clone(),
    connection_type: body.connection_type,
    dialect:         body.data.dialect,
    owner:           user.username,
  };
  let subscriber = EbicsSubscriber {
    connection: body.name.clone(),
    url: body.data.ebics_url,
    host_id: body.data.host_id,
    partner_id: body.data.partner_id,
    user_id: body.data.user_id,
    system_id: body.data.system_id,
    signature_private_key: signature,
    authentication_private_key: authentication,
    encryption_private_key: encryption,
    bank_authentication_public_key: None,
    bank_encryption_public_key: None,
    ini_state: KeyState::NotSent,
    hia_state: KeyState::NotSent,
    next_order_seq: 0,
  };

  state
    .store
    .create_connection(connection, subscriber)
    .await
    .map_err(AppError::store)?;

  Ok(Json(json!({ "name": body.name })))
}

// ─── List / get / delete ─────────────────────────────────────────────────────

/// `GET /bank-connections`
pub async fn list<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
) -> Result<Json<Vec<BankConnection>>>
where
  S: NexusStore + 'static,
{
  authenticate(&headers, state.store.as_ref()).await?;
  Ok(Json(
    state.store.list_connections().await.map_err(AppError::store)?,
  ))
}

/// `GET /bank-connections/{name}` — connection plus subscriber state.
pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
  Path(name): Path<String>,
) -> Result<Json<serde_json::Value>>
where
  S: NexusStore + 'static,
{
  authenticate(&headers, state.store.as_ref()).await?;
  let (connection, subscriber) = load(&state, &name).await?;

  let bank_keys = match (
    &subscriber.bank_authentication_public_key,
    &subscriber.bank_encryption_public_key,
  ) {
    (Some(auth), Some(enc)) => {
      let keys = BankKeys::from_der(auth, enc)?;
      Some(json!({
        "authenticationKeyFingerprint": fingerprint(&keys.authentication)?,
        "encryptionKeyFingerprint": fingerprint(&keys.encryption)?,
      }))
    }
    _ => None,
  };

  Ok(Json(json!({
    "name": connection.name,
    "type": connection.connection_type,
    "dialect": connection.dialect,
    "owner": connection.owner,
    "data": {
      "ebicsURL": subscriber.url,
      "hostID": subscriber.host_id,
      "partnerID": subscriber.partner_id,
      "userID": subscriber.user_id,
      "systemID": subscriber.system_id,
    },
    "iniState": subscriber.ini_state,
    "hiaState": subscriber.hia_state,
    "bankKeys": bank_keys,
  })))
}

#[derive(Debug, Deserialize)]
pub struct DeleteConnectionBody {
  pub name: String,
}

/// `POST /bank-connections/delete-connection` — cascades subscriber,
/// offered accounts and raw messages.
pub async fn delete<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
  Json(body): Json<DeleteConnectionBody>,
) -> Result<StatusCode>
where
  S: NexusStore + 'static,
{
  authenticate_superuser(&headers, state.store.as_ref()).await?;
  if state
    .store
    .get_connection(&body.name)
    .await
    .map_err(AppError::store)?
    .is_none()
  {
    return Err(AppError::NotFound(format!("connection {}", body.name)));
  }
  state
    .store
    .delete_connection(&body.name)
    .await
    .map_err(AppError::store)?;
  Ok(StatusCode::NO_CONTENT)
}

// ─── Key management ──────────────────────────────────────────────────────────

/// `POST /bank-connections/{name}/connect` — run INI, HIA and HPB as
/// needed. The response carries the bank-key fingerprints the operator
/// must confirm out-of-band.
pub async fn connect<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
  Path(name): Path<String>,
) -> Result<Json<serde_json::Value>>
where
  S: NexusStore + 'static,
{
  authenticate_superuser(&headers, state.store.as_ref()).await?;
  let (connection, subscriber) = load(&state, &name).await?;

  let lock = state.locks.for_connection(&name);
  let _guard = lock.lock().await;

  let session = EbicsSession::from_subscriber(&subscriber, connection.dialect)?;

  if subscriber.ini_state != KeyState::Sent {
    let outcome = state.ebics.ini(&session).await;
    let new_state = key_state_after(&outcome);
    state
      .store
      .update_subscriber_states(&name, Some(new_state), None)
      .await
      .map_err(AppError::store)?;
    outcome?;
  }
  if subscriber.hia_state != KeyState::Sent {
    let outcome = state.ebics.hia(&session).await;
    let new_state = key_state_after(&outcome);
    state
      .store
      .update_subscriber_states(&name, None, Some(new_state))
      .await
      .map_err(AppError::store)?;
    outcome?;
  }

  let bank_keys = state.ebics.hpb(&session, state.clock.now()).await?;
  let (auth_der, enc_der) = bank_keys.to_der()?;
  state
    .store
    .update_bank_keys(&name, auth_der, enc_der)
    .await
    .map_err(AppError::store)?;

  Ok(Json(json!({
    "authenticationKeyFingerprint": fingerprint(&bank_keys.authentication)?,
    "encryptionKeyFingerprint": fingerprint(&bank_keys.encryption)?,
  })))
}

/// `GET /bank-connections/{name}/hev` — which EBICS versions the host
/// speaks; a cheap connectivity smoke test.
pub async fn hev<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
  Path(name): Path<String>,
) -> Result<Json<serde_json::Value>>
where
  S: NexusStore + 'static,
{
  authenticate(&headers, state.store.as_ref()).await?;
  let (_, subscriber) = load(&state, &name).await?;
  let versions = state.ebics.hev(&subscriber.url, &subscriber.host_id).await?;
  Ok(Json(json!({
    "versions": versions
      .iter()
      .map(|v| json!({
        "protocolVersion": v.protocol_version,
        "versionNumber": v.version_number,
      }))
      .collect::<Vec<_>>()
  })))
}

// ─── Accounts offered by the bank ────────────────────────────────────────────

/// `POST /bank-connections/{name}/fetch-accounts` — run HTD and refresh
/// the offered-account table.
pub async fn fetch_accounts<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
  Path(name): Path<String>,
) -> Result<Json<serde_json::Value>>
where
  S: NexusStore + 'static,
{
  authenticate_superuser(&headers, state.store.as_ref()).await?;
  let (connection, subscriber) = load(&state, &name).await?;

  let lock = state.locks.for_connection(&name);
  let _guard = lock.lock().await;

  let session = EbicsSession::from_subscriber(&subscriber, connection.dialect)?;
  let offered = state.ebics.fetch_accounts(&session, state.clock.now()).await?;

  let mut stored = 0;
  for account in offered {
    state
      .store
      .upsert_offered_account(OfferedBankAccount {
        offered_account_id: account.account_id,
        connection:         name.clone(),
        iban:               account.iban.unwrap_or_default(),
        bank_code:          account.bank_code.unwrap_or_default(),
        account_holder:     account.account_holder.unwrap_or_default(),
        imported:           None,
      })
      .await
      .map_err(AppError::store)?;
    stored += 1;
  }

  Ok(Json(json!({ "offeredAccounts": stored })))
}

/// `GET /bank-connections/{name}/accounts`
pub async fn offered_accounts<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
  Path(name): Path<String>,
) -> Result<Json<Vec<OfferedBankAccount>>>
where
  S: NexusStore + 'static,
{
  authenticate(&headers, state.store.as_ref()).await?;
  load(&state, &name).await?;
  Ok(Json(
    state
      .store
      .list_offered_accounts(&name)
      .await
      .map_err(AppError::store)?,
  ))
}

#[derive(Debug, Deserialize)]
pub struct ImportAccountBody {
  #[serde(rename = "offeredAccountId")]
  pub offered_account_id: String,
  #[serde(rename = "nexusBankAccountId")]
  pub nexus_bank_account_id: String,
}

/// `POST /bank-connections/{name}/import-account`
pub async fn import_account<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
  Path(name): Path<String>,
  Json(body): Json<ImportAccountBody>,
) -> Result<Json<serde_json::Value>>
where
  S: NexusStore + 'static,
{
  authenticate_superuser(&headers, state.store.as_ref()).await?;
  load(&state, &name).await?;

  let offered = state
    .store
    .list_offered_accounts(&name)
    .await
    .map_err(AppError::store)?;
  if !offered
    .iter()
    .any(|o| o.offered_account_id == body.offered_account_id)
  {
    return Err(AppError::NotFound(format!(
      "offered account {}",
      body.offered_account_id
    )));
  }
  if state
    .store
    .get_account(&body.nexus_bank_account_id)
    .await
    .map_err(AppError::store)?
    .is_some()
  {
    return Err(AppError::Conflict(format!(
      "bank account {} already exists",
      body.nexus_bank_account_id
    )));
  }

  let account = state
    .store
    .import_account(&name, &body.offered_account_id, &body.nexus_bank_account_id)
    .await
    .map_err(AppError::store)?;
  Ok(Json(json!({ "label": account.label, "iban": account.iban })))
}

// ─── Raw messages ────────────────────────────────────────────────────────────

/// `GET /bank-connections/{name}/messages`
pub async fn messages<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
  Path(name): Path<String>,
) -> Result<Json<Vec<nexus_core::message::BankMessage>>>
where
  S: NexusStore + 'static,
{
  authenticate(&headers, state.store.as_ref()).await?;
  load(&state, &name).await?;
  Ok(Json(
    state.store.list_messages(&name).await.map_err(AppError::store)?,
  ))
}

/// `GET /bank-connections/{name}/messages/{id}` — the raw stored bytes.
pub async fn message<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
  Path((name, id)): Path<(String, i64)>,
) -> Result<Response>
where
  S: NexusStore + 'static,
{
  authenticate(&headers, state.store.as_ref()).await?;
  let message = state
    .store
    .get_message(&name, id)
    .await
    .map_err(AppError::store)?
    .ok_or_else(|| AppError::NotFound(format!("message {id}")))?;
  Ok(
    (
      [(header::CONTENT_TYPE, "text/xml; charset=utf-8")],
      message.content,
    )
      .into_response(),
  )
}

// ─── Shared ──────────────────────────────────────────────────────────────────

/// The key state to record after a key-management order: success means the
/// bank holds the key; an invalid-user-state rejection means the bank's
/// view and ours disagree.
fn key_state_after(outcome: &nexus_ebics::Result<()>) -> KeyState {
  use nexus_ebics::TechnicalCode;
  match outcome {
    Ok(()) => KeyState::Sent,
    Err(e)
      if matches!(
        e.technical_code(),
        Some(TechnicalCode::InvalidUserOrUserState)
      ) =>
    {
      KeyState::Unknown
    }
    Err(_) => KeyState::NotSent,
  }
}

async fn load<S>(
  state: &AppState<S>,
  name: &str,
) -> Result<(BankConnection, EbicsSubscriber)>
where
  S: NexusStore,
{
  let connection = state
    .store
    .get_connection(name)
    .await
    .map_err(AppError::store)?
    .ok_or_else(|| AppError::NotFound(format!("connection {name}")))?;
  let subscriber = state
    .store
    .get_subscriber(name)
    .await
    .map_err(AppError::store)?
    .ok_or_else(|| AppError::NotFound(format!("subscriber for {name}")))?;
  Ok((connection, subscriber))
}
