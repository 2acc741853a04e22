//! Bank accounts known to Nexus, and accounts the bank merely offers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::FetchLevel;

/// An account whose activity Nexus mirrors into its ledger.
///
/// The three watermarks remember the `CreDtTm` of the newest camt document
/// ingested per fetch level; they only ever move forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankAccount {
  pub label:              String,
  pub account_holder:     String,
  pub iban:               String,
  pub bank_code:          String,
  /// Connection used when a fetch or submit names no explicit one.
  pub default_connection: Option<String>,

  pub last_report_timestamp:       Option<DateTime<Utc>>,
  pub last_statement_timestamp:    Option<DateTime<Utc>>,
  pub last_notification_timestamp: Option<DateTime<Utc>>,

  /// Highest bank-message serial observed for this account's connection.
  pub highest_seen_message_serial_id: i64,
  /// Feeds the identifier template of generated pain.001 documents.
  pub pain001_counter: i64,
}

impl BankAccount {
  /// Watermark for one fetch level. `FetchLevel::All` has no single
  /// watermark and yields `None`.
  pub fn watermark(&self, level: FetchLevel) -> Option<DateTime<Utc>> {
    match level {
      FetchLevel::Report => self.last_report_timestamp,
      FetchLevel::Statement => self.last_statement_timestamp,
      FetchLevel::Notification => self.last_notification_timestamp,
      FetchLevel::All => None,
    }
  }
}

/// An account the bank reported via HTD/HKD, not (yet) imported.
///
/// Unique per `(offered_account_id, connection)`; `imported` names the
/// Nexus [`BankAccount`] once the operator binds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferedBankAccount {
  pub offered_account_id: String,
  pub connection:         String,
  pub iban:               String,
  pub bank_code:          String,
  pub account_holder:     String,
  pub imported:           Option<String>,
}
