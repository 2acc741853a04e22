//! Downloaded bank messages and the fetch parameters that produce them.

use serde::{Deserialize, Serialize};

/// Which class of camt document a fetch asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchLevel {
  /// camt.052 intraday account reports.
  Report,
  /// camt.053 end-of-day statements.
  Statement,
  /// camt.054 debit/credit notifications.
  Notification,
  /// Every level in turn.
  All,
}

impl FetchLevel {
  /// The concrete levels a fetch expands to.
  pub fn expand(self) -> &'static [FetchLevel] {
    match self {
      FetchLevel::All => {
        &[FetchLevel::Report, FetchLevel::Statement, FetchLevel::Notification]
      }
      FetchLevel::Report => &[FetchLevel::Report],
      FetchLevel::Statement => &[FetchLevel::Statement],
      FetchLevel::Notification => &[FetchLevel::Notification],
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      FetchLevel::Report => "report",
      FetchLevel::Statement => "statement",
      FetchLevel::Notification => "notification",
      FetchLevel::All => "all",
    }
  }
}

/// How far back a fetch reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "rangeType")]
pub enum FetchRange {
  /// Whatever the bank considers new (no explicit date range).
  Latest,
  /// Everything the bank still has.
  All,
  /// From the account's watermark for the level to now.
  SinceLast,
  /// The last `number` days.
  PreviousDays { number: u32 },
}

/// The full parameter set of one fetch, as carried by the API and by
/// scheduled-task params.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchSpec {
  pub level: FetchLevel,
  #[serde(flatten)]
  pub range: FetchRange,
}

/// A raw response body stored verbatim for forensics. Immutable after
/// insert except for the `errors` flag, set when ingestion fails on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankMessage {
  pub id:          i64,
  pub connection:  String,
  pub fetch_level: FetchLevel,
  /// camt `MsgId` of the outer document, when one was parseable.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub message_id:  Option<String>,
  #[serde(skip)]
  pub content:     Vec<u8>,
  pub errors:      bool,
}
