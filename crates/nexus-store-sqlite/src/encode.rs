//! Encoding and decoding helpers between Rust domain types and the
//! plain-text representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings with fixed microsecond precision and a
//! `Z` suffix, so lexicographic comparison in SQL matches chronological
//! order. Structured fields (camt entries, task params) are compact JSON.

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use nexus_core::{
  account::BankAccount,
  amount::Amount,
  connection::{BankConnection, ConnectionType, EbicsDialect, KeyState},
  initiation::{Creditor, PaymentIdentifiers, PaymentInitiation},
  message::FetchLevel,
  task::{ResourceType, ScheduledTask, TaskType},
  transaction::{BankTransactionEntry, CamtEntry, CreditDebit, EntryStatus},
};

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Decode(format!("timestamp {s:?}: {e}")))
}

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn decode_amount(s: &str) -> Result<Amount> {
  s.parse()
    .map_err(|e| Error::Decode(format!("amount {s:?}: {e}")))
}

// ─── Enums ───────────────────────────────────────────────────────────────────

pub fn encode_connection_type(t: ConnectionType) -> &'static str {
  match t {
    ConnectionType::Ebics => "ebics",
  }
}

pub fn decode_connection_type(s: &str) -> Result<ConnectionType> {
  match s {
    "ebics" => Ok(ConnectionType::Ebics),
    other => Err(Error::Decode(format!("unknown connection type {other:?}"))),
  }
}

pub fn encode_dialect(d: EbicsDialect) -> &'static str {
  match d {
    EbicsDialect::H004 => "h004",
    EbicsDialect::H005 => "h005",
  }
}

pub fn decode_dialect(s: &str) -> Result<EbicsDialect> {
  match s {
    "h004" => Ok(EbicsDialect::H004),
    "h005" => Ok(EbicsDialect::H005),
    other => Err(Error::Decode(format!("unknown dialect {other:?}"))),
  }
}

pub fn encode_key_state(k: KeyState) -> &'static str {
  match k {
    KeyState::NotSent => "not_sent",
    KeyState::Sent => "sent",
    KeyState::Unknown => "unknown",
  }
}

pub fn decode_key_state(s: &str) -> Result<KeyState> {
  match s {
    "not_sent" => Ok(KeyState::NotSent),
    "sent" => Ok(KeyState::Sent),
    "unknown" => Ok(KeyState::Unknown),
    other => Err(Error::Decode(format!("unknown key state {other:?}"))),
  }
}

pub fn encode_fetch_level(l: FetchLevel) -> &'static str { l.as_str() }

pub fn decode_fetch_level(s: &str) -> Result<FetchLevel> {
  match s {
    "report" => Ok(FetchLevel::Report),
    "statement" => Ok(FetchLevel::Statement),
    "notification" => Ok(FetchLevel::Notification),
    "all" => Ok(FetchLevel::All),
    other => Err(Error::Decode(format!("unknown fetch level {other:?}"))),
  }
}

pub fn encode_credit_debit(cd: CreditDebit) -> &'static str {
  match cd {
    CreditDebit::Credit => "CRDT",
    CreditDebit::Debit => "DBIT",
  }
}

pub fn decode_credit_debit(s: &str) -> Result<CreditDebit> {
  match s {
    "CRDT" => Ok(CreditDebit::Credit),
    "DBIT" => Ok(CreditDebit::Debit),
    other => Err(Error::Decode(format!("unknown direction {other:?}"))),
  }
}

pub fn encode_entry_status(s: EntryStatus) -> &'static str {
  match s {
    EntryStatus::Book => "BOOK",
    EntryStatus::Pdng => "PDNG",
    EntryStatus::Info => "INFO",
  }
}

pub fn decode_entry_status(s: &str) -> Result<EntryStatus> {
  match s {
    "BOOK" => Ok(EntryStatus::Book),
    "PDNG" => Ok(EntryStatus::Pdng),
    "INFO" => Ok(EntryStatus::Info),
    other => Err(Error::Decode(format!("unknown entry status {other:?}"))),
  }
}

pub fn encode_task_type(t: TaskType) -> &'static str {
  match t {
    TaskType::Fetch => "fetch",
    TaskType::Submit => "submit",
  }
}

pub fn decode_task_type(s: &str) -> Result<TaskType> {
  match s {
    "fetch" => Ok(TaskType::Fetch),
    "submit" => Ok(TaskType::Submit),
    other => Err(Error::Decode(format!("unknown task type {other:?}"))),
  }
}

pub fn encode_resource_type(r: ResourceType) -> &'static str {
  match r {
    ResourceType::BankAccount => "bank-account",
  }
}

pub fn decode_resource_type(s: &str) -> Result<ResourceType> {
  match s {
    "bank-account" => Ok(ResourceType::BankAccount),
    other => Err(Error::Decode(format!("unknown resource type {other:?}"))),
  }
}

// ─── Raw rows ────────────────────────────────────────────────────────────────

pub struct RawConnection {
  pub name:            String,
  pub connection_type: String,
  pub dialect:         String,
  pub owner:           String,
}

impl RawConnection {
  pub fn into_connection(self) -> Result<BankConnection> {
    Ok(BankConnection {
      name:            self.name,
      connection_type: decode_connection_type(&self.connection_type)?,
      dialect:         decode_dialect(&self.dialect)?,
      owner:           self.owner,
    })
  }
}

pub struct RawAccount {
  pub label:              String,
  pub account_holder:     String,
  pub iban:               String,
  pub bank_code:          String,
  pub default_connection: Option<String>,
  pub last_report:        Option<String>,
  pub last_statement:     Option<String>,
  pub last_notification:  Option<String>,
  pub highest_serial:     i64,
  pub pain001_counter:    i64,
}

impl RawAccount {
  pub fn into_account(self) -> Result<BankAccount> {
    Ok(BankAccount {
      label:              self.label,
      account_holder:     self.account_holder,
      iban:               self.iban,
      bank_code:          self.bank_code,
      default_connection: self.default_connection,
      last_report_timestamp: self
        .last_report
        .as_deref()
        .map(decode_dt)
        .transpose()?,
      last_statement_timestamp: self
        .last_statement
        .as_deref()
        .map(decode_dt)
        .transpose()?,
      last_notification_timestamp: self
        .last_notification
        .as_deref()
        .map(decode_dt)
        .transpose()?,
      highest_seen_message_serial_id: self.highest_serial,
      pain001_counter: self.pain001_counter,
    })
  }
}

pub struct RawTransaction {
  pub id:             i64,
  pub bank_account:   String,
  pub transaction_id: String,
  pub credit_debit:   String,
  pub currency:       String,
  pub amount:         String,
  pub status:         String,
  pub entry_json:     String,
  pub updated_by:     Option<i64>,
}

impl RawTransaction {
  pub fn into_entry(self) -> Result<BankTransactionEntry> {
    let entry: CamtEntry = serde_json::from_str(&self.entry_json)?;
    Ok(BankTransactionEntry {
      id: self.id,
      bank_account: self.bank_account,
      transaction_id: self.transaction_id,
      credit_debit_indicator: decode_credit_debit(&self.credit_debit)?,
      currency: self.currency,
      amount: self.amount,
      status: decode_entry_status(&self.status)?,
      entry,
      updated_by: self.updated_by,
    })
  }
}

pub struct RawInitiation {
  pub id:               String,
  pub bank_account:     String,
  pub preparation_date: String,
  pub submission_date:  Option<String>,
  pub amount:           String,
  pub subject:          String,
  pub creditor_iban:    String,
  pub creditor_bic:     Option<String>,
  pub creditor_name:    String,
  pub message_id:       String,
  pub payment_information_id: String,
  pub end_to_end_id:    String,
  pub instruction_id:   String,
  pub submitted:        bool,
  pub invalid:          bool,
  pub confirmation_transaction_id: Option<i64>,
  pub client_uid:       Option<String>,
}

impl RawInitiation {
  pub fn into_initiation(self) -> Result<PaymentInitiation> {
    Ok(PaymentInitiation {
      id: decode_uuid(&self.id)?,
      bank_account: self.bank_account,
      preparation_date: decode_dt(&self.preparation_date)?,
      submission_date: self
        .submission_date
        .as_deref()
        .map(decode_dt)
        .transpose()?,
      amount: decode_amount(&self.amount)?,
      subject: self.subject,
      creditor: Creditor {
        iban: self.creditor_iban,
        bic:  self.creditor_bic,
        name: self.creditor_name,
      },
      identifiers: PaymentIdentifiers {
        message_id:             self.message_id,
        payment_information_id: self.payment_information_id,
        end_to_end_id:          self.end_to_end_id,
        instruction_id:         self.instruction_id,
      },
      submitted: self.submitted,
      invalid: self.invalid,
      confirmation_transaction_id: self.confirmation_transaction_id,
      client_uid: self.client_uid,
    })
  }
}

pub struct RawTask {
  pub resource_type: String,
  pub resource_id:   String,
  pub task_name:     String,
  pub task_type:     String,
  pub cron_spec:     String,
  pub params:        String,
  pub next_sec:      Option<i64>,
  pub prev_sec:      Option<i64>,
}

impl RawTask {
  pub fn into_task(self) -> Result<ScheduledTask> {
    Ok(ScheduledTask {
      resource_type: decode_resource_type(&self.resource_type)?,
      resource_id: self.resource_id,
      task_name: self.task_name,
      task_type: decode_task_type(&self.task_type)?,
      cron_spec: self.cron_spec,
      params: serde_json::from_str(&self.params)?,
      next_scheduled_execution_sec: self.next_sec,
      prev_scheduled_execution_sec: self.prev_sec,
    })
  }
}
