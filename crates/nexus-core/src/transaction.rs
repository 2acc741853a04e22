//! Ledger rows and the canonical form of a parsed camt entry.
//!
//! A [`BankTransactionEntry`] is written once during ingestion and never
//! mutated; a status change arrives as a new row pointing back through
//! `updated_by`. The canonical JSON stored alongside each row is the
//! serialisation of [`CamtEntry`].

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Direction of a booking from the account owner's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreditDebit {
  #[serde(rename = "CRDT")]
  Credit,
  #[serde(rename = "DBIT")]
  Debit,
}

/// camt `Sts` of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
  /// Booked: settled on the account.
  #[serde(rename = "BOOK")]
  Book,
  /// Pending: seen but not settled.
  #[serde(rename = "PDNG")]
  Pdng,
  /// Informational only.
  #[serde(rename = "INFO")]
  Info,
}

// ─── Canonical camt entry ────────────────────────────────────────────────────

/// One party of a money movement, as far as the bank reported it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartyDetails {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub iban: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub bic:  Option<String>,
}

impl PartyDetails {
  pub fn is_empty(&self) -> bool {
    self.name.is_none() && self.iban.is_none() && self.bic.is_none()
  }
}

/// The single money movement of an entry, when the entry carries exactly one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MovementDetails {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub end_to_end_id:          Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub payment_information_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub instruction_id:         Option<String>,
  #[serde(skip_serializing_if = "PartyDetails::is_empty", default)]
  pub debtor:                 PartyDetails,
  #[serde(skip_serializing_if = "PartyDetails::is_empty", default)]
  pub creditor:               PartyDetails,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub unstructured_remittance_information: Option<String>,
}

/// Canonical form of one camt `Ntry`.
///
/// When the entry has no batch, or a batch with more than one transaction,
/// `details` is `None` and the row still captures the outer entry (the
/// money-movement-singleton policy).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CamtEntry {
  pub amount:                  String,
  pub currency:                String,
  pub credit_debit_indicator:  CreditDebit,
  pub status:                  EntryStatus,
  pub account_servicer_ref:    String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub bank_transaction_code:   Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub booking_date:            Option<NaiveDate>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub value_date:              Option<NaiveDate>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub details:                 Option<MovementDetails>,
}

impl CamtEntry {
  /// The ledger dedup key: `AcctSvcrRef:` plus the bank's reference.
  pub fn transaction_id(&self) -> String {
    format!("AcctSvcrRef:{}", self.account_servicer_ref)
  }
}

// ─── Ledger row ──────────────────────────────────────────────────────────────

/// A persisted ledger row; `id` is assigned by the store in discovery order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankTransactionEntry {
  pub id:             i64,
  pub bank_account:   String,
  /// `AcctSvcrRef:<ref>` — unique per bank account.
  pub transaction_id: String,
  pub credit_debit_indicator: CreditDebit,
  pub currency:       String,
  /// Decimal string exactly as reported by the bank.
  pub amount:         String,
  pub status:         EntryStatus,
  pub entry:          CamtEntry,
  /// Row that supersedes this one after a status change, if any.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub updated_by:     Option<i64>,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry() -> CamtEntry {
    CamtEntry {
      amount: "5".into(),
      currency: "TESTKUDOS".into(),
      credit_debit_indicator: CreditDebit::Credit,
      status: EntryStatus::Book,
      account_servicer_ref: "001X7".into(),
      bank_transaction_code: None,
      booking_date: None,
      value_date: None,
      details: Some(MovementDetails {
        unstructured_remittance_information: Some("test payment".into()),
        ..Default::default()
      }),
    }
  }

  #[test]
  fn transaction_id_carries_the_scheme_prefix() {
    assert_eq!(entry().transaction_id(), "AcctSvcrRef:001X7");
  }

  #[test]
  fn canonical_json_round_trips_structurally() {
    let e = entry();
    let json = serde_json::to_value(&e).unwrap();
    let back: CamtEntry = serde_json::from_value(json.clone()).unwrap();
    assert_eq!(serde_json::to_value(&back).unwrap(), json);
  }

  #[test]
  fn direction_serialises_as_iso_codes() {
    assert_eq!(
      serde_json::to_string(&CreditDebit::Debit).unwrap(),
      "\"DBIT\""
    );
    assert_eq!(serde_json::to_string(&EntryStatus::Pdng).unwrap(), "\"PDNG\"");
  }
}
