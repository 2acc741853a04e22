//! Handlers for fetching and listing account activity.

use std::time::Duration;

use axum::{
  Json,
  extract::{Path, Query, State},
  http::HeaderMap,
};
use serde::Deserialize;
use serde_json::json;

use nexus_core::{
  message::FetchSpec, store::NexusStore, transaction::BankTransactionEntry,
};

use crate::{
  auth::{authenticate, authenticate_superuser},
  error::Result,
  handlers::accounts::require_account,
  state::AppState,
  workers::fetch_transactions,
};

/// `POST /bank-accounts/{acct}/fetch-transactions` — run the EBICS
/// downloads described by the body, parse and ingest.
pub async fn fetch<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
  Path(acct): Path<String>,
  Json(spec): Json<FetchSpec>,
) -> Result<Json<serde_json::Value>>
where
  S: NexusStore + 'static,
{
  authenticate_superuser(&headers, state.store.as_ref()).await?;
  require_account(&state, &acct).await?;

  let stats = fetch_transactions(&state, &acct, spec).await?;
  Ok(Json(json!({
    "newTransactions": stats.new_transactions,
    "downloadedMessages": stats.downloaded_messages,
  })))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
  /// Block up to this long for the first rows to appear.
  #[serde(rename = "long_poll_ms")]
  pub long_poll_ms: Option<u64>,
}

/// `GET /bank-accounts/{acct}/transactions[?long_poll_ms=N]`
///
/// With `long_poll_ms`, an empty ledger blocks until ingestion signals a
/// new row for the account or the window elapses, then re-reads.
pub async fn list<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
  Path(acct): Path<String>,
  Query(params): Query<ListParams>,
) -> Result<Json<serde_json::Value>>
where
  S: NexusStore + 'static,
{
  authenticate(&headers, state.store.as_ref()).await?;
  require_account(&state, &acct).await?;

  // Subscribe before reading so an insert in between is not lost.
  let mut changes = state.watch.subscribe(&acct);
  changes.borrow_and_update();

  let mut transactions: Vec<BankTransactionEntry> = state
    .store
    .list_transactions(&acct)
    .await
    .map_err(crate::error::AppError::store)?;

  if transactions.is_empty()
    && let Some(window_ms) = params.long_poll_ms
    && window_ms > 0
  {
    let _ = tokio::time::timeout(
      Duration::from_millis(window_ms),
      changes.changed(),
    )
    .await;
    transactions = state
      .store
      .list_transactions(&acct)
      .await
      .map_err(crate::error::AppError::store)?;
  }

  Ok(Json(json!({ "transactions": transactions })))
}
