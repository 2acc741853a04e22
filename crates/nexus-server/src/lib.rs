//! HTTP surface, workers and scheduler of the Nexus banking middleware.
//!
//! Exposes an axum [`Router`] backed by any
//! [`nexus_core::store::NexusStore`]. The EBICS engine, the ISO 20022
//! codecs and the storage backend live in their own crates; this one wires
//! them together behind the API of the service.

pub mod auth;
pub mod cron;
pub mod error;
pub mod facade;
pub mod handlers;
pub mod ingest;
pub mod scheduler;
pub mod state;
pub mod sync;
pub mod workers;

use axum::{
  Router,
  routing::{get, post},
};

use nexus_core::store::NexusStore;

pub use error::AppError;
pub use state::AppState;

/// Build the full API router for `state`.
pub fn router<S>(state: AppState<S>) -> Router
where
  S: NexusStore + 'static,
{
  use handlers::{accounts, connections, tasks, transactions, users};

  Router::new()
    .route("/users", post(users::create::<S>))
    // Bank connections
    .route(
      "/bank-connections",
      get(connections::list::<S>).post(connections::create::<S>),
    )
    .route(
      "/bank-connections/delete-connection",
      post(connections::delete::<S>),
    )
    .route("/bank-connections/{name}", get(connections::get_one::<S>))
    .route(
      "/bank-connections/{name}/connect",
      post(connections::connect::<S>),
    )
    .route("/bank-connections/{name}/hev", get(connections::hev::<S>))
    .route(
      "/bank-connections/{name}/fetch-accounts",
      post(connections::fetch_accounts::<S>),
    )
    .route(
      "/bank-connections/{name}/accounts",
      get(connections::offered_accounts::<S>),
    )
    .route(
      "/bank-connections/{name}/import-account",
      post(connections::import_account::<S>),
    )
    .route(
      "/bank-connections/{name}/messages",
      get(connections::messages::<S>),
    )
    .route(
      "/bank-connections/{name}/messages/{id}",
      get(connections::message::<S>),
    )
    // Bank accounts and initiations
    .route("/bank-accounts", get(accounts::list::<S>))
    .route(
      "/bank-accounts/{acct}/payment-initiations",
      get(accounts::list_initiations::<S>).post(accounts::create_initiation::<S>),
    )
    .route(
      "/bank-accounts/{acct}/payment-initiations/{id}",
      get(accounts::get_initiation::<S>),
    )
    .route(
      "/bank-accounts/{acct}/payment-initiations/{id}/submit",
      post(accounts::submit_initiation::<S>),
    )
    .route(
      "/bank-accounts/{acct}/submit-all-payment-initiations",
      post(accounts::submit_all::<S>),
    )
    // Activity
    .route(
      "/bank-accounts/{acct}/fetch-transactions",
      post(transactions::fetch::<S>),
    )
    .route(
      "/bank-accounts/{acct}/transactions",
      get(transactions::list::<S>),
    )
    // Scheduled tasks
    .route(
      "/bank-accounts/{acct}/schedule",
      get(tasks::list::<S>).post(tasks::create::<S>),
    )
    .route(
      "/bank-accounts/{acct}/schedule/{name}",
      get(tasks::get_one::<S>).delete(tasks::delete::<S>),
    )
    .with_state(state)
}

// ─── Integration tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
  };
  use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
  use nexus_core::{
    account::OfferedBankAccount,
    connection::{
      BankConnection, ConnectionType, EbicsDialect, EbicsSubscriber, KeyState,
    },
    store::{NexusStore as _, NexusUser},
    transaction::{CamtEntry, CreditDebit, EntryStatus},
  };
  use nexus_store_sqlite::SqliteStore;
  use tower::ServiceExt as _;

  use super::*;
  use crate::auth::hash_password;

  async fn make_state() -> AppState<SqliteStore> {
    let store = SqliteStore::open_in_memory().await.unwrap();

    store
      .upsert_user(NexusUser {
        username:      "admin".into(),
        password_hash: hash_password("x").unwrap(),
        superuser:     true,
      })
      .await
      .unwrap();
    store
      .upsert_user(NexusUser {
        username:      "viewer".into(),
        password_hash: hash_password("v").unwrap(),
        superuser:     false,
      })
      .await
      .unwrap();

    // A connection with placeholder key blobs; tests never hit the wire.
    store
      .create_connection(
        BankConnection {
          name:            "c1".into(),
          connection_type: ConnectionType::Ebics,
          dialect:         EbicsDialect::H004,
          owner:           "admin".into(),
        },
        EbicsSubscriber {
          connection: "c1".into(),
          url: "http://bank.example/ebicsweb".into(),
          host_id: "HOST01".into(),
          partner_id: "PARTNER1".into(),
          user_id: "USER1".into(),
          system_id: None,
          signature_private_key: vec![0],
          authentication_private_key: vec![0],
          encryption_private_key: vec![0],
          bank_authentication_public_key: None,
          bank_encryption_public_key: None,
          ini_state: KeyState::NotSent,
          hia_state: KeyState::NotSent,
          next_order_seq: 0,
        },
      )
      .await
      .unwrap();
    store
      .upsert_offered_account(OfferedBankAccount {
        offered_account_id: "acct-1".into(),
        connection:         "c1".into(),
        iban:               "FOOIBAN".into(),
        bank_code:          "SANDBOXX".into(),
        account_holder:     "Foo Holder".into(),
        imported:           None,
      })
      .await
      .unwrap();
    store.import_account("c1", "acct-1", "foo").await.unwrap();

    AppState::new(store)
  }

  fn basic(user: &str, pass: &str) -> String {
    format!("Basic {}", B64.encode(format!("{user}:{pass}")))
  }

  async fn request(
    state: AppState<SqliteStore>,
    method: &str,
    uri: &str,
    auth: Option<&str>,
    body: &str,
  ) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder()
      .method(method)
      .uri(uri)
      .header(header::CONTENT_TYPE, "application/json");
    if let Some(auth) = auth {
      builder = builder.header(header::AUTHORIZATION, auth);
    }
    let response = router(state)
      .oneshot(builder.body(Body::from(body.to_string())).unwrap())
      .await
      .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
      .await
      .unwrap();
    let json = if bytes.is_empty() {
      serde_json::Value::Null
    } else {
      serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
  }

  fn entry(reference: &str) -> CamtEntry {
    CamtEntry {
      amount: "1.00".into(),
      currency: "TESTKUDOS".into(),
      credit_debit_indicator: CreditDebit::Credit,
      status: EntryStatus::Book,
      account_servicer_ref: reference.to_owned(),
      bank_transaction_code: None,
      booking_date: None,
      value_date: None,
      details: None,
    }
  }

  // ── Auth ──────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn unauthenticated_requests_return_401() {
    let state = make_state().await;
    let (status, _) =
      request(state, "GET", "/bank-accounts", None, "").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn superuser_routes_reject_regular_users() {
    let state = make_state().await;
    let (status, _) = request(
      state,
      "POST",
      "/bank-accounts/foo/fetch-transactions",
      Some(&basic("viewer", "v")),
      r#"{"level":"report","rangeType":"all"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
  }

  // ── Accounts ──────────────────────────────────────────────────────────

  #[tokio::test]
  async fn accounts_list_shows_the_imported_account() {
    let state = make_state().await;
    let (status, body) = request(
      state,
      "GET",
      "/bank-accounts",
      Some(&basic("viewer", "v")),
      "",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["label"], "foo");
    assert_eq!(body[0]["iban"], "FOOIBAN");
  }

  // ── Initiation validation and idempotency ─────────────────────────────

  #[tokio::test]
  async fn excess_fractional_digits_are_rejected_before_the_wire() {
    let state = make_state().await;
    let (status, body) = request(
      state,
      "POST",
      "/bank-accounts/foo/payment-initiations",
      Some(&basic("admin", "x")),
      r#"{"iban":"TESTIBAN","bic":"SANDBOXX","name":"Tester",
          "amount":"TESTKUDOS:1.001","subject":"test"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
  }

  #[tokio::test]
  async fn initiation_creation_is_idempotent_on_uid() {
    let state = make_state().await;
    let body = r#"{"iban":"TESTIBAN","bic":"SANDBOXX","name":"Tester",
                   "amount":"TESTKUDOS:1","subject":"test payment",
                   "uid":"salt"}"#;

    let (status1, first) = request(
      state.clone(),
      "POST",
      "/bank-accounts/foo/payment-initiations",
      Some(&basic("admin", "x")),
      body,
    )
    .await;
    assert_eq!(status1, StatusCode::OK, "{first}");

    let (status2, second) = request(
      state.clone(),
      "POST",
      "/bank-accounts/foo/payment-initiations",
      Some(&basic("admin", "x")),
      body,
    )
    .await;
    assert_eq!(status2, StatusCode::OK);
    assert_eq!(first["id"], second["id"], "replay must return the same row");

    // Same uid, different subject: conflict.
    let (status3, _) = request(
      state.clone(),
      "POST",
      "/bank-accounts/foo/payment-initiations",
      Some(&basic("admin", "x")),
      r#"{"iban":"TESTIBAN","bic":"SANDBOXX","name":"Tester",
          "amount":"TESTKUDOS:1","subject":"DIFFERENT","uid":"salt"}"#,
    )
    .await;
    assert_eq!(status3, StatusCode::CONFLICT);

    let rows = state.store.list_initiations("foo").await.unwrap();
    assert_eq!(rows.len(), 1, "exactly one row for the uid");
  }

  #[tokio::test]
  async fn consecutive_initiations_get_distinct_identifiers() {
    let state = make_state().await;
    let body = r#"{"iban":"TESTIBAN","name":"Tester",
                   "amount":"TESTKUDOS:2","subject":"s"}"#;
    for _ in 0..2 {
      let (status, _) = request(
        state.clone(),
        "POST",
        "/bank-accounts/foo/payment-initiations",
        Some(&basic("admin", "x")),
        body,
      )
      .await;
      assert_eq!(status, StatusCode::OK);
    }
    let rows = state.store.list_initiations("foo").await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_ne!(
      rows[0].identifiers.end_to_end_id,
      rows[1].identifiers.end_to_end_id
    );
    assert_ne!(
      rows[0].identifiers.payment_information_id,
      rows[1].identifiers.payment_information_id
    );
  }

  // ── Transactions and long-polling ─────────────────────────────────────

  #[tokio::test]
  async fn transactions_list_is_empty_initially() {
    let state = make_state().await;
    let (status, body) = request(
      state,
      "GET",
      "/bank-accounts/foo/transactions",
      Some(&basic("viewer", "v")),
      "",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transactions"].as_array().unwrap().len(), 0);
  }

  #[tokio::test]
  async fn long_poll_returns_once_a_row_appears() {
    let state = make_state().await;

    // Ingest a row shortly after the request starts blocking.
    let background = state.clone();
    tokio::spawn(async move {
      tokio::time::sleep(std::time::Duration::from_millis(50)).await;
      background.store.ingest_entry("foo", entry("LP-1")).await.unwrap();
      background.watch.signal("foo");
    });

    let started = std::time::Instant::now();
    let (status, body) = request(
      state,
      "GET",
      "/bank-accounts/foo/transactions?long_poll_ms=5000",
      Some(&basic("viewer", "v")),
      "",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transactions"].as_array().unwrap().len(), 1);
    assert!(
      started.elapsed() < std::time::Duration::from_secs(4),
      "must return well before the window closes"
    );
  }

  #[tokio::test]
  async fn unknown_account_is_404() {
    let state = make_state().await;
    let (status, _) = request(
      state,
      "GET",
      "/bank-accounts/ghost/transactions",
      Some(&basic("viewer", "v")),
      "",
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
  }

  // ── Scheduled tasks ───────────────────────────────────────────────────

  #[tokio::test]
  async fn schedule_round_trip_and_validation() {
    let state = make_state().await;

    let (bad, _) = request(
      state.clone(),
      "POST",
      "/bank-accounts/foo/schedule",
      Some(&basic("admin", "x")),
      r#"{"name":"t1","cronspec":"not a cron","type":"fetch","params":null}"#,
    )
    .await;
    assert_eq!(bad, StatusCode::BAD_REQUEST);

    let (ok, _) = request(
      state.clone(),
      "POST",
      "/bank-accounts/foo/schedule",
      Some(&basic("admin", "x")),
      r#"{"name":"t1","cronspec":"*/5 * * * *","type":"fetch",
          "params":{"level":"report","rangeType":"since-last"}}"#,
    )
    .await;
    assert_eq!(ok, StatusCode::OK);

    let (dup, _) = request(
      state.clone(),
      "POST",
      "/bank-accounts/foo/schedule",
      Some(&basic("admin", "x")),
      r#"{"name":"t1","cronspec":"*/5 * * * *","type":"fetch","params":null}"#,
    )
    .await;
    assert_eq!(dup, StatusCode::CONFLICT);

    let (status, listed) = request(
      state.clone(),
      "GET",
      "/bank-accounts/foo/schedule",
      Some(&basic("viewer", "v")),
      "",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed[0]["task_name"], "t1");

    let (deleted, _) = request(
      state.clone(),
      "DELETE",
      "/bank-accounts/foo/schedule/t1",
      Some(&basic("admin", "x")),
      "",
    )
    .await;
    assert_eq!(deleted, StatusCode::NO_CONTENT);
  }

  // ── Connection inspection ─────────────────────────────────────────────

  #[tokio::test]
  async fn connection_details_show_subscriber_state() {
    let state = make_state().await;
    let (status, body) = request(
      state,
      "GET",
      "/bank-connections/c1",
      Some(&basic("viewer", "v")),
      "",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["hostID"], "HOST01");
    assert_eq!(body["iniState"], "not_sent");
    assert!(body["bankKeys"].is_null(), "no HPB yet");
  }
}
