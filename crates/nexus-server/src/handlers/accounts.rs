//! Handlers for `/bank-accounts` and payment initiations.

use axum::{
  Json,
  extract::{Path, State},
  http::HeaderMap,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use nexus_core::{
  account::BankAccount,
  amount::Amount,
  clock::Clock as _,
  initiation::{
    Creditor, PaymentIdentifiers, PaymentInitiation, PaymentInitiationData,
  },
  store::NexusStore,
};

use crate::{
  auth::{authenticate, authenticate_superuser},
  error::{AppError, Result},
  state::AppState,
  workers,
};

/// `GET /bank-accounts`
pub async fn list<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
) -> Result<Json<Vec<BankAccount>>>
where
  S: NexusStore + 'static,
{
  authenticate(&headers, state.store.as_ref()).await?;
  Ok(Json(state.store.list_accounts().await.map_err(AppError::store)?))
}

// ─── Initiation creation ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateInitiationBody {
  pub iban:    String,
  pub bic:     Option<String>,
  pub name:    String,
  pub amount:  String,
  pub subject: String,
  pub uid:     Option<String>,
}

fn same_request(existing: &PaymentInitiation, data: &PaymentInitiationData) -> bool {
  existing.amount == data.amount
    && existing.subject == data.subject
    && existing.creditor == data.creditor
}

/// `POST /bank-accounts/{acct}/payment-initiations`
///
/// Idempotent on `uid`: replaying the same body returns the stored row;
/// reusing the uid with any differing field is a conflict.
pub async fn create_initiation<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
  Path(acct): Path<String>,
  Json(body): Json<CreateInitiationBody>,
) -> Result<Json<PaymentInitiation>>
where
  S: NexusStore + 'static,
{
  authenticate(&headers, state.store.as_ref()).await?;
  require_account(&state, &acct).await?;

  // Validation happens before anything reaches the wire; excess fractional
  // digits and malformed amounts die here with a 400.
  let amount: Amount = body
    .amount
    .parse()
    .map_err(|e: nexus_core::Error| AppError::BadRequest(e.to_string()))?;
  if body.iban.is_empty() || body.name.is_empty() {
    return Err(AppError::BadRequest(
      "creditor iban and name must be non-empty".into(),
    ));
  }

  let data = PaymentInitiationData {
    bank_account: acct.clone(),
    amount,
    subject: body.subject,
    creditor: Creditor { iban: body.iban, bic: body.bic, name: body.name },
    client_uid: body.uid,
  };

  // uid replay: return the stored row, or 409 when the body differs.
  if let Some(uid) = &data.client_uid
    && let Some(existing) = state
      .store
      .get_initiation_by_uid(&acct, uid)
      .await
      .map_err(AppError::store)?
  {
    return if same_request(&existing, &data) {
      Ok(Json(existing))
    } else {
      Err(AppError::Conflict(format!("uid {uid} was used with a different body")))
    };
  }

  let counter = state
    .store
    .next_pain001_counter(&acct)
    .await
    .map_err(AppError::store)?;
  let now = state.clock.now();
  let identifiers = PaymentIdentifiers::derive(now, counter, &acct);

  match state.store.create_initiation(data.clone(), identifiers, now).await {
    Ok(initiation) => Ok(Json(initiation)),
    Err(e) => {
      // Lost a race on the uid: re-read and re-judge.
      if let Some(uid) = &data.client_uid
        && let Some(existing) = state
          .store
          .get_initiation_by_uid(&acct, uid)
          .await
          .map_err(AppError::store)?
      {
        return if same_request(&existing, &data) {
          Ok(Json(existing))
        } else {
          Err(AppError::Conflict(format!(
            "uid {uid} was used with a different body"
          )))
        };
      }
      Err(AppError::store(e))
    }
  }
}

// ─── Initiation reads ────────────────────────────────────────────────────────

/// `GET /bank-accounts/{acct}/payment-initiations`
pub async fn list_initiations<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
  Path(acct): Path<String>,
) -> Result<Json<Vec<PaymentInitiation>>>
where
  S: NexusStore + 'static,
{
  authenticate(&headers, state.store.as_ref()).await?;
  require_account(&state, &acct).await?;
  Ok(Json(
    state.store.list_initiations(&acct).await.map_err(AppError::store)?,
  ))
}

/// `GET /bank-accounts/{acct}/payment-initiations/{id}`
pub async fn get_initiation<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
  Path((acct, id)): Path<(String, Uuid)>,
) -> Result<Json<PaymentInitiation>>
where
  S: NexusStore + 'static,
{
  authenticate(&headers, state.store.as_ref()).await?;
  Ok(Json(load_initiation(&state, &acct, id).await?))
}

// ─── Submission ──────────────────────────────────────────────────────────────

/// `POST /bank-accounts/{acct}/payment-initiations/{id}/submit`
pub async fn submit_initiation<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
  Path((acct, id)): Path<(String, Uuid)>,
) -> Result<Json<serde_json::Value>>
where
  S: NexusStore + 'static,
{
  authenticate_superuser(&headers, state.store.as_ref()).await?;
  let initiation = load_initiation(&state, &acct, id).await?;
  workers::submit_initiation(&state, &initiation).await?;
  Ok(Json(json!({})))
}

/// `POST /bank-accounts/{acct}/submit-all-payment-initiations`
pub async fn submit_all<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
  Path(acct): Path<String>,
) -> Result<Json<serde_json::Value>>
where
  S: NexusStore + 'static,
{
  authenticate_superuser(&headers, state.store.as_ref()).await?;
  require_account(&state, &acct).await?;
  let submitted = workers::submit_all_pending(&state, &acct).await?;
  Ok(Json(json!({ "submitted": submitted })))
}

// ─── Shared ──────────────────────────────────────────────────────────────────

pub(crate) async fn require_account<S>(
  state: &AppState<S>,
  label: &str,
) -> Result<BankAccount>
where
  S: NexusStore,
{
  state
    .store
    .get_account(label)
    .await
    .map_err(AppError::store)?
    .ok_or_else(|| AppError::NotFound(format!("bank account {label}")))
}

async fn load_initiation<S>(
  state: &AppState<S>,
  acct: &str,
  id: Uuid,
) -> Result<PaymentInitiation>
where
  S: NexusStore,
{
  let initiation = state
    .store
    .get_initiation(id)
    .await
    .map_err(AppError::store)?
    .ok_or_else(|| AppError::NotFound(format!("initiation {id}")))?;
  if initiation.bank_account != acct {
    return Err(AppError::NotFound(format!("initiation {id}")));
  }
  Ok(initiation)
}
