//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::{Duration, TimeZone, Utc};
use uuid::Uuid;

use nexus_core::{
  account::OfferedBankAccount,
  connection::{
    BankConnection, ConnectionType, EbicsDialect, EbicsSubscriber, KeyState,
  },
  initiation::{Creditor, PaymentIdentifiers, PaymentInitiationData},
  message::FetchLevel,
  store::{IngestOutcome, NexusStore, NexusUser},
  task::{ResourceType, ScheduledTask, TaskType},
  transaction::{CamtEntry, CreditDebit, EntryStatus, MovementDetails},
};

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn subscriber(connection: &str) -> EbicsSubscriber {
  EbicsSubscriber {
    connection: connection.to_owned(),
    url: "http://bank.example/ebicsweb".into(),
    host_id: "HOST01".into(),
    partner_id: "PARTNER1".into(),
    user_id: "USER1".into(),
    system_id: None,
    signature_private_key: vec![1, 2, 3],
    authentication_private_key: vec![4, 5, 6],
    encryption_private_key: vec![7, 8, 9],
    bank_authentication_public_key: None,
    bank_encryption_public_key: None,
    ini_state: KeyState::NotSent,
    hia_state: KeyState::NotSent,
    next_order_seq: 0,
  }
}

fn connection(name: &str) -> BankConnection {
  BankConnection {
    name:            name.to_owned(),
    connection_type: ConnectionType::Ebics,
    dialect:         EbicsDialect::H004,
    owner:           "admin".to_owned(),
  }
}

/// Create the admin user plus a connection with an imported account `foo`.
async fn fixture(s: &SqliteStore) {
  s.upsert_user(NexusUser {
    username:      "admin".into(),
    password_hash: "$argon2id$fake".into(),
    superuser:     true,
  })
  .await
  .unwrap();
  s.create_connection(connection("c1"), subscriber("c1")).await.unwrap();
  s.upsert_offered_account(OfferedBankAccount {
    offered_account_id: "acct-1".into(),
    connection:         "c1".into(),
    iban:               "FOOIBAN".into(),
    bank_code:          "SANDBOXX".into(),
    account_holder:     "Foo Holder".into(),
    imported:           None,
  })
  .await
  .unwrap();
  s.import_account("c1", "acct-1", "foo").await.unwrap();
}

fn entry(reference: &str, status: EntryStatus) -> CamtEntry {
  CamtEntry {
    amount: "1.00".into(),
    currency: "TESTKUDOS".into(),
    credit_debit_indicator: CreditDebit::Credit,
    status,
    account_servicer_ref: reference.to_owned(),
    bank_transaction_code: None,
    booking_date: None,
    value_date: None,
    details: Some(MovementDetails {
      unstructured_remittance_information: Some("test payment".into()),
      ..Default::default()
    }),
  }
}

fn initiation_data(uid: Option<&str>) -> PaymentInitiationData {
  PaymentInitiationData {
    bank_account: "foo".into(),
    amount: "TESTKUDOS:1".parse().unwrap(),
    subject: "test payment".into(),
    creditor: Creditor {
      iban: "TESTIBAN".into(),
      bic:  Some("SANDBOXX".into()),
      name: "Tester".into(),
    },
    client_uid: uid.map(str::to_owned),
  }
}

// ─── Connections and subscribers ─────────────────────────────────────────────

#[tokio::test]
async fn connection_and_subscriber_round_trip() {
  let s = store().await;
  fixture(&s).await;

  let conn = s.get_connection("c1").await.unwrap().unwrap();
  assert_eq!(conn.connection_type, ConnectionType::Ebics);
  assert_eq!(conn.owner, "admin");

  let sub = s.get_subscriber("c1").await.unwrap().unwrap();
  assert_eq!(sub.host_id, "HOST01");
  assert_eq!(sub.ini_state, KeyState::NotSent);
  assert!(sub.bank_authentication_public_key.is_none());
}

#[tokio::test]
async fn duplicate_connection_name_conflicts() {
  let s = store().await;
  fixture(&s).await;
  let err = s
    .create_connection(connection("c1"), subscriber("c1"))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::AlreadyExists(_)), "{err}");
}

#[tokio::test]
async fn key_states_and_bank_keys_persist() {
  let s = store().await;
  fixture(&s).await;

  s.update_subscriber_states("c1", Some(KeyState::Sent), Some(KeyState::Sent))
    .await
    .unwrap();
  s.update_bank_keys("c1", vec![1], vec![2]).await.unwrap();

  let sub = s.get_subscriber("c1").await.unwrap().unwrap();
  assert_eq!(sub.ini_state, KeyState::Sent);
  assert_eq!(sub.hia_state, KeyState::Sent);
  assert!(sub.is_ready());
}

#[tokio::test]
async fn delete_connection_cascades_subscriber_and_messages() {
  let s = store().await;
  fixture(&s).await;
  s.insert_message("c1", FetchLevel::Report, None, b"<camt/>".to_vec())
    .await
    .unwrap();

  s.delete_connection("c1").await.unwrap();
  assert!(s.get_subscriber("c1").await.unwrap().is_none());
  assert!(s.list_messages("c1").await.unwrap().is_empty());
  assert!(matches!(
    s.delete_connection("c1").await.unwrap_err(),
    Error::NotFound(_)
  ));
}

#[tokio::test]
async fn order_seq_increments_atomically() {
  let s = store().await;
  fixture(&s).await;
  assert_eq!(s.next_order_seq("c1").await.unwrap(), 0);
  assert_eq!(s.next_order_seq("c1").await.unwrap(), 1);
  assert_eq!(s.next_order_seq("c1").await.unwrap(), 2);
}

// ─── Accounts ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn import_account_binds_the_offer() {
  let s = store().await;
  fixture(&s).await;

  let account = s.get_account("foo").await.unwrap().unwrap();
  assert_eq!(account.iban, "FOOIBAN");
  assert_eq!(account.default_connection.as_deref(), Some("c1"));

  let offered = s.list_offered_accounts("c1").await.unwrap();
  assert_eq!(offered[0].imported.as_deref(), Some("foo"));

  // Importing the same offer under a taken label conflicts.
  assert!(matches!(
    s.import_account("c1", "acct-1", "foo").await.unwrap_err(),
    Error::AlreadyExists(_)
  ));
  assert!(matches!(
    s.import_account("c1", "nope", "bar").await.unwrap_err(),
    Error::NotFound(_)
  ));
}

#[tokio::test]
async fn watermarks_are_monotonic() {
  let s = store().await;
  fixture(&s).await;

  let t1 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
  let t2 = t1 + Duration::hours(2);

  s.update_watermark("foo", FetchLevel::Report, t2).await.unwrap();
  // An older document must not move the watermark backwards.
  s.update_watermark("foo", FetchLevel::Report, t1).await.unwrap();

  let account = s.get_account("foo").await.unwrap().unwrap();
  assert_eq!(account.last_report_timestamp, Some(t2));
  assert_eq!(account.last_statement_timestamp, None);
}

#[tokio::test]
async fn message_serial_only_moves_forward() {
  let s = store().await;
  fixture(&s).await;
  s.update_message_serial("foo", 7).await.unwrap();
  s.update_message_serial("foo", 3).await.unwrap();
  let account = s.get_account("foo").await.unwrap().unwrap();
  assert_eq!(account.highest_seen_message_serial_id, 7);
}

#[tokio::test]
async fn pain001_counter_increments() {
  let s = store().await;
  fixture(&s).await;
  let a = s.next_pain001_counter("foo").await.unwrap();
  let b = s.next_pain001_counter("foo").await.unwrap();
  assert_eq!(b, a + 1);
}

// ─── Ledger ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn ingest_dedupes_on_account_servicer_ref() {
  let s = store().await;
  fixture(&s).await;

  let first = s.ingest_entry("foo", entry("REF-1", EntryStatus::Book)).await.unwrap();
  assert!(matches!(first, IngestOutcome::New(_)));

  let second = s.ingest_entry("foo", entry("REF-1", EntryStatus::Book)).await.unwrap();
  assert!(matches!(second, IngestOutcome::Duplicate));

  let rows = s.list_transactions("foo").await.unwrap();
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].transaction_id, "AcctSvcrRef:REF-1");
}

#[tokio::test]
async fn status_progression_supersedes() {
  let s = store().await;
  fixture(&s).await;

  s.ingest_entry("foo", entry("REF-2", EntryStatus::Pdng)).await.unwrap();
  let booked = s.ingest_entry("foo", entry("REF-2", EntryStatus::Book)).await.unwrap();
  let IngestOutcome::StatusUpdated(new_row) = booked else {
    panic!("expected a status update");
  };

  let rows = s.list_transactions("foo").await.unwrap();
  assert_eq!(rows.len(), 2);
  let old = rows.iter().find(|r| r.status == EntryStatus::Pdng).unwrap();
  assert_eq!(old.updated_by, Some(new_row.id));

  // A regression (BOOK back to PDNG) is dropped as a duplicate.
  let regress = s.ingest_entry("foo", entry("REF-2", EntryStatus::Pdng)).await.unwrap();
  assert!(matches!(regress, IngestOutcome::Duplicate));
}

#[tokio::test]
async fn transactions_list_in_discovery_order() {
  let s = store().await;
  fixture(&s).await;
  for reference in ["B", "A", "C"] {
    s.ingest_entry("foo", entry(reference, EntryStatus::Book)).await.unwrap();
  }
  let rows = s.list_transactions("foo").await.unwrap();
  let refs: Vec<_> =
    rows.iter().map(|r| r.entry.account_servicer_ref.as_str()).collect();
  assert_eq!(refs, vec!["B", "A", "C"]);
  assert!(rows.windows(2).all(|w| w[0].id < w[1].id));
}

// ─── Initiations ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn initiation_round_trip_and_submission() {
  let s = store().await;
  fixture(&s).await;
  let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();

  let created = s
    .create_initiation(
      initiation_data(None),
      PaymentIdentifiers::derive(now, 1, "foo"),
      now,
    )
    .await
    .unwrap();

  let fetched = s.get_initiation(created.id).await.unwrap().unwrap();
  assert_eq!(fetched.amount, created.amount);
  assert_eq!(fetched.subject, "test payment");
  assert!(!fetched.submitted);

  let pending = s.list_unsubmitted_initiations("foo").await.unwrap();
  assert_eq!(pending.len(), 1);

  s.mark_initiation_submitted(created.id, now + Duration::minutes(1))
    .await
    .unwrap();
  let submitted = s.get_initiation(created.id).await.unwrap().unwrap();
  assert!(submitted.submitted);
  assert!(submitted.submission_date.is_some());
  assert!(s.list_unsubmitted_initiations("foo").await.unwrap().is_empty());
}

#[tokio::test]
async fn initiation_uid_is_unique_per_account() {
  let s = store().await;
  fixture(&s).await;
  let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();

  s.create_initiation(
    initiation_data(Some("salt")),
    PaymentIdentifiers::derive(now, 1, "foo"),
    now,
  )
  .await
  .unwrap();

  let err = s
    .create_initiation(
      initiation_data(Some("salt")),
      PaymentIdentifiers::derive(now, 2, "foo"),
      now,
    )
    .await
    .unwrap_err();
  assert!(matches!(err, Error::AlreadyExists(_)), "{err}");

  let found =
    s.get_initiation_by_uid("foo", "salt").await.unwrap().unwrap();
  assert_eq!(found.client_uid.as_deref(), Some("salt"));

  // No uid: any number of otherwise identical initiations is fine.
  for counter in 3..5 {
    s.create_initiation(
      initiation_data(None),
      PaymentIdentifiers::derive(now, counter, "foo"),
      now,
    )
    .await
    .unwrap();
  }
}

#[tokio::test]
async fn confirmation_links_by_payment_information_id() {
  let s = store().await;
  fixture(&s).await;
  let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
  let ids = PaymentIdentifiers::derive(now, 1, "foo");
  let created = s
    .create_initiation(initiation_data(None), ids.clone(), now)
    .await
    .unwrap();

  let mut debit = entry("REF-9", EntryStatus::Book);
  debit.credit_debit_indicator = CreditDebit::Debit;
  debit.details.as_mut().unwrap().payment_information_id =
    Some(ids.payment_information_id.clone());
  let IngestOutcome::New(row) = s.ingest_entry("foo", debit).await.unwrap()
  else {
    panic!("expected new row");
  };

  assert!(
    s.confirm_initiation("foo", &ids.payment_information_id, row.id)
      .await
      .unwrap()
  );
  let confirmed = s.get_initiation(created.id).await.unwrap().unwrap();
  assert_eq!(confirmed.confirmation_transaction_id, Some(row.id));

  // Second match leaves the link untouched.
  assert!(
    !s.confirm_initiation("foo", &ids.payment_information_id, row.id + 1)
      .await
      .unwrap()
  );
}

// ─── Users ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn upsert_user_promotes() {
  let s = store().await;
  s.upsert_user(NexusUser {
    username:      "alice".into(),
    password_hash: "h1".into(),
    superuser:     false,
  })
  .await
  .unwrap();
  s.upsert_user(NexusUser {
    username:      "alice".into(),
    password_hash: "h2".into(),
    superuser:     true,
  })
  .await
  .unwrap();

  let user = s.get_user("alice").await.unwrap().unwrap();
  assert_eq!(user.password_hash, "h2");
  assert!(user.superuser);
  assert!(s.get_user("bob").await.unwrap().is_none());
}

// ─── Scheduled tasks ─────────────────────────────────────────────────────────

fn task(name: &str, cron: &str) -> ScheduledTask {
  ScheduledTask {
    resource_type: ResourceType::BankAccount,
    resource_id:   "foo".into(),
    task_name:     name.to_owned(),
    task_type:     TaskType::Fetch,
    cron_spec:     cron.to_owned(),
    params:        serde_json::json!({"level":"report","rangeType":"all"}),
    next_scheduled_execution_sec: None,
    prev_scheduled_execution_sec: None,
  }
}

#[tokio::test]
async fn tasks_round_trip_and_become_due() {
  let s = store().await;
  fixture(&s).await;

  s.create_task(task("fetch-hourly", "0 * * * *")).await.unwrap();
  assert!(matches!(
    s.create_task(task("fetch-hourly", "0 * * * *")).await.unwrap_err(),
    Error::AlreadyExists(_)
  ));

  // Never-run tasks are immediately due.
  let due = s.due_tasks(1_000).await.unwrap();
  assert_eq!(due.len(), 1);
  assert_eq!(due[0].task_name, "fetch-hourly");
  assert_eq!(due[0].params["level"], "report");

  s.update_task_times("foo", "fetch-hourly", 1_000, 4_600).await.unwrap();
  assert!(s.due_tasks(2_000).await.unwrap().is_empty());
  assert_eq!(s.due_tasks(4_600).await.unwrap().len(), 1);

  let fetched = s.get_task("foo", "fetch-hourly").await.unwrap().unwrap();
  assert_eq!(fetched.prev_scheduled_execution_sec, Some(1_000));

  s.delete_task("foo", "fetch-hourly").await.unwrap();
  assert!(matches!(
    s.delete_task("foo", "fetch-hourly").await.unwrap_err(),
    Error::NotFound(_)
  ));
}
