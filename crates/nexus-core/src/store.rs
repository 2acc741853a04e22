//! The `NexusStore` trait and supporting types.
//!
//! The trait is implemented by storage backends (e.g. `nexus-store-sqlite`).
//! Higher layers (the HTTP server, the workers, the scheduler) depend on this
//! abstraction, not on any concrete backend.
//!
//! The database is the single source of truth: watermarks move inside the
//! same transaction as the ledger rows they describe, and counters are
//! read-modify-written atomically.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  account::{BankAccount, OfferedBankAccount},
  connection::{BankConnection, EbicsSubscriber, KeyState},
  initiation::{PaymentIdentifiers, PaymentInitiation, PaymentInitiationData},
  message::{BankMessage, FetchLevel},
  task::ScheduledTask,
  transaction::{BankTransactionEntry, CamtEntry},
};

// ─── Users ───────────────────────────────────────────────────────────────────

/// A local API user; credentials are argon2 PHC strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NexusUser {
  pub username:      String,
  #[serde(skip_serializing)]
  pub password_hash: String,
  pub superuser:     bool,
}

// ─── Ingestion outcome ───────────────────────────────────────────────────────

/// What happened to one parsed camt entry during ingestion.
#[derive(Debug, Clone)]
pub enum IngestOutcome {
  /// First sighting: a fresh ledger row.
  New(BankTransactionEntry),
  /// Same `(account, transaction_id)` and same status: dropped.
  Duplicate,
  /// Same transaction id with a progressed status: a superseding row was
  /// inserted and the old row now points at it through `updated_by`.
  StatusUpdated(BankTransactionEntry),
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a Nexus storage backend.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (tokio with `axum`).
pub trait NexusStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Users ─────────────────────────────────────────────────────────────

  /// Create a user, or (for the CLI `superuser` path) promote and re-hash
  /// an existing one.
  fn upsert_user(
    &self,
    user: NexusUser,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_user<'a>(
    &'a self,
    username: &'a str,
  ) -> impl Future<Output = Result<Option<NexusUser>, Self::Error>> + Send + 'a;

  // ── Bank connections and subscribers ──────────────────────────────────

  /// Persist a connection together with its 1:1 subscriber.
  fn create_connection(
    &self,
    connection: BankConnection,
    subscriber: EbicsSubscriber,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_connection<'a>(
    &'a self,
    name: &'a str,
  ) -> impl Future<Output = Result<Option<BankConnection>, Self::Error>> + Send + 'a;

  fn list_connections(
    &self,
  ) -> impl Future<Output = Result<Vec<BankConnection>, Self::Error>> + Send + '_;

  /// Delete a connection, cascading its subscriber, offered accounts and
  /// raw bank messages.
  fn delete_connection<'a>(
    &'a self,
    name: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn get_subscriber<'a>(
    &'a self,
    connection: &'a str,
  ) -> impl Future<Output = Result<Option<EbicsSubscriber>, Self::Error>> + Send + 'a;

  /// Record that INI and/or HIA went out (or came back unknown).
  fn update_subscriber_states<'a>(
    &'a self,
    connection: &'a str,
    ini: Option<KeyState>,
    hia: Option<KeyState>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Store the bank keys obtained through HPB.
  fn update_bank_keys<'a>(
    &'a self,
    connection: &'a str,
    bank_authentication_public_key: Vec<u8>,
    bank_encryption_public_key: Vec<u8>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Atomically claim the next upload order sequence number.
  fn next_order_seq<'a>(
    &'a self,
    connection: &'a str,
  ) -> impl Future<Output = Result<i64, Self::Error>> + Send + 'a;

  // ── Offered and imported bank accounts ────────────────────────────────

  /// Insert or refresh an account reported by HTD/HKD.
  fn upsert_offered_account(
    &self,
    offered: OfferedBankAccount,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn list_offered_accounts<'a>(
    &'a self,
    connection: &'a str,
  ) -> impl Future<Output = Result<Vec<OfferedBankAccount>, Self::Error>> + Send + 'a;

  /// Bind an offered account to a new Nexus bank account with `label`.
  fn import_account<'a>(
    &'a self,
    connection: &'a str,
    offered_account_id: &'a str,
    label: &'a str,
  ) -> impl Future<Output = Result<BankAccount, Self::Error>> + Send + 'a;

  fn get_account<'a>(
    &'a self,
    label: &'a str,
  ) -> impl Future<Output = Result<Option<BankAccount>, Self::Error>> + Send + 'a;

  fn list_accounts(
    &self,
  ) -> impl Future<Output = Result<Vec<BankAccount>, Self::Error>> + Send + '_;

  /// Raise the account's watermark for `level` to `max(existing, seen)`.
  fn update_watermark<'a>(
    &'a self,
    label: &'a str,
    level: FetchLevel,
    seen: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Raise `highest_seen_message_serial_id` to `max(existing, serial)`.
  fn update_message_serial<'a>(
    &'a self,
    label: &'a str,
    serial: i64,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Atomically claim the next pain.001 counter value for the account.
  fn next_pain001_counter<'a>(
    &'a self,
    label: &'a str,
  ) -> impl Future<Output = Result<i64, Self::Error>> + Send + 'a;

  // ── Raw bank messages ─────────────────────────────────────────────────

  /// Store a downloaded response body; returns the assigned serial id.
  fn insert_message<'a>(
    &'a self,
    connection: &'a str,
    fetch_level: FetchLevel,
    message_id: Option<String>,
    content: Vec<u8>,
  ) -> impl Future<Output = Result<i64, Self::Error>> + Send + 'a;

  /// List messages for a connection, newest last, without their bodies.
  fn list_messages<'a>(
    &'a self,
    connection: &'a str,
  ) -> impl Future<Output = Result<Vec<BankMessage>, Self::Error>> + Send + 'a;

  fn get_message<'a>(
    &'a self,
    connection: &'a str,
    id: i64,
  ) -> impl Future<Output = Result<Option<BankMessage>, Self::Error>> + Send + 'a;

  /// Flag a message whose ingestion failed; the raw bytes stay for
  /// forensics.
  fn mark_message_errors(
    &self,
    id: i64,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Ledger ────────────────────────────────────────────────────────────

  /// Insert one parsed entry, deduplicating on
  /// `(bank_account, transaction_id)` and superseding on status change.
  fn ingest_entry<'a>(
    &'a self,
    bank_account: &'a str,
    entry: CamtEntry,
  ) -> impl Future<Output = Result<IngestOutcome, Self::Error>> + Send + 'a;

  /// All ledger rows of an account in discovery (insertion) order.
  fn list_transactions<'a>(
    &'a self,
    bank_account: &'a str,
  ) -> impl Future<Output = Result<Vec<BankTransactionEntry>, Self::Error>> + Send + 'a;

  // ── Payment initiations ───────────────────────────────────────────────

  /// Insert a new initiation. Fails when `client_uid` was already used for
  /// this account (the caller decides between replay and conflict).
  fn create_initiation(
    &self,
    data: PaymentInitiationData,
    identifiers: PaymentIdentifiers,
    preparation_date: DateTime<Utc>,
  ) -> impl Future<Output = Result<PaymentInitiation, Self::Error>> + Send + '_;

  fn get_initiation(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<PaymentInitiation>, Self::Error>> + Send + '_;

  fn get_initiation_by_uid<'a>(
    &'a self,
    bank_account: &'a str,
    client_uid: &'a str,
  ) -> impl Future<Output = Result<Option<PaymentInitiation>, Self::Error>> + Send + 'a;

  fn list_initiations<'a>(
    &'a self,
    bank_account: &'a str,
  ) -> impl Future<Output = Result<Vec<PaymentInitiation>, Self::Error>> + Send + 'a;

  /// Initiations with `submitted = false` and `invalid = false`.
  fn list_unsubmitted_initiations<'a>(
    &'a self,
    bank_account: &'a str,
  ) -> impl Future<Output = Result<Vec<PaymentInitiation>, Self::Error>> + Send + 'a;

  fn mark_initiation_submitted(
    &self,
    id: Uuid,
    submission_date: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn mark_initiation_invalid(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Link the initiation matching `(account, payment_information_id)` to a
  /// confirming ledger row. Returns whether an initiation matched.
  fn confirm_initiation<'a>(
    &'a self,
    bank_account: &'a str,
    payment_information_id: &'a str,
    transaction_row_id: i64,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  // ── Scheduled tasks ───────────────────────────────────────────────────

  fn create_task(
    &self,
    task: ScheduledTask,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_task<'a>(
    &'a self,
    resource_id: &'a str,
    task_name: &'a str,
  ) -> impl Future<Output = Result<Option<ScheduledTask>, Self::Error>> + Send + 'a;

  fn list_tasks<'a>(
    &'a self,
    resource_id: &'a str,
  ) -> impl Future<Output = Result<Vec<ScheduledTask>, Self::Error>> + Send + 'a;

  fn delete_task<'a>(
    &'a self,
    resource_id: &'a str,
    task_name: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Tasks whose `next_scheduled_execution_sec` is unset or `<= now_sec`.
  fn due_tasks(
    &self,
    now_sec: i64,
  ) -> impl Future<Output = Result<Vec<ScheduledTask>, Self::Error>> + Send + '_;

  /// Rewrite the bookkeeping columns after a run.
  fn update_task_times<'a>(
    &'a self,
    resource_id: &'a str,
    task_name: &'a str,
    prev_sec: i64,
    next_sec: i64,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}
