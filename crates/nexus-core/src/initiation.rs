//! Payment initiations — the outgoing half of the ledger.
//!
//! An initiation is created by the API (idempotently, keyed on an optional
//! client `uid`), turned into a pain.001 and uploaded by the submission
//! driver, and later linked to the confirming camt entry by ingestion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::amount::Amount;

/// Creditor side of an initiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creditor {
  pub iban: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub bic:  Option<String>,
  pub name: String,
}

/// Input for creating an initiation; everything Nexus assigns is absent.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentInitiationData {
  pub bank_account: String,
  pub amount:       Amount,
  pub subject:      String,
  pub creditor:     Creditor,
  /// Opaque client-side request deduper.
  pub client_uid:   Option<String>,
}

/// The identifier triplet plus instruction id stamped into a pain.001.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIdentifiers {
  pub message_id:             String,
  pub payment_information_id: String,
  pub end_to_end_id:          String,
  pub instruction_id:         String,
}

impl PaymentIdentifiers {
  /// Derive the identifier set for the `counter`-th initiation of `label`.
  ///
  /// Template: `leuf-<role>-<timestampHex>-<counterHex>-<accountHex>`, which
  /// keeps ids unique per account without any random component.
  pub fn derive(now: DateTime<Utc>, counter: i64, label: &str) -> Self {
    let ts = now.timestamp_millis();
    let acct = label
      .bytes()
      .fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(b as u32));
    let make =
      |role: &str| format!("leuf-{role}-{ts:x}-{counter:x}-{acct:08x}");
    Self {
      message_id:             make("mp1"),
      payment_information_id: make("p1"),
      end_to_end_id:          make("e2e"),
      instruction_id:         make("i1"),
    }
  }
}

/// A persisted initiation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentInitiation {
  pub id:               Uuid,
  pub bank_account:     String,
  pub preparation_date: DateTime<Utc>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub submission_date:  Option<DateTime<Utc>>,
  pub amount:           Amount,
  pub subject:          String,
  pub creditor:         Creditor,
  pub identifiers:      PaymentIdentifiers,
  pub submitted:        bool,
  /// Rejected by validation or the bank; excluded from submit-all.
  pub invalid:          bool,
  /// Ledger row id of the confirming DBIT entry, set by ingestion.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub confirmation_transaction_id: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub client_uid:       Option<String>,
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn consecutive_counters_yield_distinct_identifier_triplets() {
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
    let a = PaymentIdentifiers::derive(now, 7, "acct");
    let b = PaymentIdentifiers::derive(now, 8, "acct");
    assert_ne!(a.message_id, b.message_id);
    assert_ne!(a.payment_information_id, b.payment_information_id);
    assert_ne!(a.end_to_end_id, b.end_to_end_id);
  }

  #[test]
  fn identifiers_follow_the_template() {
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
    let ids = PaymentIdentifiers::derive(now, 255, "foo");
    assert!(ids.end_to_end_id.starts_with("leuf-e2e-"), "{ids:?}");
    assert!(ids.end_to_end_id.contains("-ff-"), "{ids:?}");
  }
}
