//! camt.052/053/054 parsing into the canonical entry model.
//!
//! The wire structs below mirror the subset of the schema the participating
//! banks actually emit, across both the older (.001.02) and newer (.001.08)
//! message versions. Everything funnels into [`nexus_core::transaction::CamtEntry`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use quick_xml::de::from_str;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;

use nexus_core::transaction::{
  CamtEntry, CreditDebit, EntryStatus, MovementDetails, PartyDetails,
};

use crate::error::{Error, Result};

// ─── Wire structs ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Document {
  #[serde(rename = "BkToCstmrStmt")]
  statement:    Option<Message>,
  #[serde(rename = "BkToCstmrAcctRpt")]
  report:       Option<Message>,
  #[serde(rename = "BkToCstmrDbtCdtNtfctn")]
  notification: Option<Message>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Message {
  grp_hdr: GroupHeader,
  #[serde(rename = "Stmt", default)]
  stmt:    Vec<Container>,
  #[serde(rename = "Rpt", default)]
  rpt:     Vec<Container>,
  #[serde(rename = "Ntfctn", default)]
  ntfctn:  Vec<Container>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GroupHeader {
  msg_id:    String,
  cre_dt_tm: String,
}

/// One `Stmt`, `Rpt` or `Ntfctn` — identical shape for our purposes.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Container {
  #[serde(rename = "Ntry", default)]
  ntry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Entry {
  amt:           Amount,
  cdt_dbt_ind:   String,
  sts:           Status,
  acct_svcr_ref: Option<String>,
  bookg_dt:      Option<DateChoice>,
  val_dt:        Option<DateChoice>,
  bk_tx_cd:      Option<BankTransactionCode>,
  #[serde(rename = "NtryDtls", default)]
  ntry_dtls:     Vec<EntryDetails>,
}

#[derive(Debug, Deserialize)]
struct Amount {
  #[serde(rename = "@Ccy")]
  currency: String,
  #[serde(rename = "$text")]
  value:    String,
}

/// `<Sts>BOOK</Sts>` in the old versions, `<Sts><Cd>BOOK</Cd></Sts>` in the
/// new ones.
#[derive(Debug, Deserialize)]
struct Status {
  #[serde(rename = "$text")]
  text: Option<String>,
  #[serde(rename = "Cd")]
  cd:   Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DateChoice {
  dt:    Option<String>,
  dt_tm: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BankTransactionCode {
  domn:  Option<Domain>,
  prtry: Option<Proprietary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Domain {
  cd:   String,
  fmly: Option<Family>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Family {
  cd:            String,
  sub_fmly_cd:   Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Proprietary {
  cd: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EntryDetails {
  #[serde(rename = "TxDtls", default)]
  tx_dtls: Vec<TransactionDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TransactionDetails {
  refs:       Option<References>,
  rltd_pties: Option<RelatedParties>,
  rltd_agts:  Option<RelatedAgents>,
  rmt_inf:    Option<RemittanceInformation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct References {
  end_to_end_id: Option<String>,
  pmt_inf_id:    Option<String>,
  instr_id:      Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RelatedParties {
  dbtr:      Option<Party>,
  dbtr_acct: Option<Account>,
  cdtr:      Option<Party>,
  cdtr_acct: Option<Account>,
}

/// `<Dbtr><Nm>…` in the old versions, `<Dbtr><Pty><Nm>…` in the new ones.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Party {
  nm:  Option<String>,
  pty: Option<InnerParty>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InnerParty {
  nm: Option<String>,
}

impl Party {
  fn name(&self) -> Option<String> {
    self
      .nm
      .clone()
      .or_else(|| self.pty.as_ref().and_then(|p| p.nm.clone()))
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Account {
  id: AccountId,
}

#[derive(Debug, Deserialize)]
struct AccountId {
  #[serde(rename = "IBAN")]
  iban: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RelatedAgents {
  dbtr_agt: Option<Agent>,
  cdtr_agt: Option<Agent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Agent {
  fin_instn_id: FinancialInstitution,
}

#[derive(Debug, Deserialize)]
struct FinancialInstitution {
  #[serde(rename = "BIC")]
  bic:   Option<String>,
  #[serde(rename = "BICFI")]
  bicfi: Option<String>,
}

impl FinancialInstitution {
  fn bic(&self) -> Option<String> {
    self.bic.clone().or_else(|| self.bicfi.clone())
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RemittanceInformation {
  #[serde(default)]
  ustrd: Vec<String>,
}

// ─── Public result ───────────────────────────────────────────────────────────

/// One parsed camt document: outer header plus canonical entries.
#[derive(Debug)]
pub struct CamtDocument {
  pub message_id:         String,
  pub creation_timestamp: DateTime<Utc>,
  pub entries:            Vec<CamtEntry>,
  /// Entries that had to be dropped for lack of an `AcctSvcrRef`.
  pub dropped_without_ref: usize,
}

/// Parse a camt.052, camt.053 or camt.054 document.
pub fn parse_camt(xml: &str) -> Result<CamtDocument> {
  let document: Document =
    from_str(xml).map_err(|e| Error::Camt(e.to_string()))?;

  let message = document
    .statement
    .or(document.report)
    .or(document.notification)
    .ok_or_else(|| {
      Error::UnsupportedRoot(
        "expected BkToCstmrStmt, BkToCstmrAcctRpt or BkToCstmrDbtCdtNtfctn"
          .into(),
      )
    })?;

  let creation_timestamp = parse_datetime(&message.grp_hdr.cre_dt_tm)?;

  let mut entries = Vec::new();
  let mut dropped = 0usize;
  for container in message
    .stmt
    .iter()
    .chain(message.rpt.iter())
    .chain(message.ntfctn.iter())
  {
    for entry in &container.ntry {
      match convert_entry(entry)? {
        Some(e) => entries.push(e),
        None => dropped += 1,
      }
    }
  }

  Ok(CamtDocument {
    message_id: message.grp_hdr.msg_id.clone(),
    creation_timestamp,
    entries,
    dropped_without_ref: dropped,
  })
}

// ─── Conversion ──────────────────────────────────────────────────────────────

fn convert_entry(entry: &Entry) -> Result<Option<CamtEntry>> {
  let Some(reference) = entry.acct_svcr_ref.as_deref().filter(|r| !r.is_empty())
  else {
    warn!("dropping camt entry without AcctSvcrRef");
    return Ok(None);
  };

  // Reject amounts the ledger could not reason about.
  let value: Decimal = entry.amt.value.trim().parse().map_err(|_| {
    Error::Camt(format!("unparseable entry amount {:?}", entry.amt.value))
  })?;
  if value <= Decimal::ZERO {
    return Err(Error::Camt(format!("non-positive entry amount {value}")));
  }

  let credit_debit_indicator = match entry.cdt_dbt_ind.as_str() {
    "CRDT" => CreditDebit::Credit,
    "DBIT" => CreditDebit::Debit,
    other => {
      return Err(Error::Camt(format!("unknown CdtDbtInd {other:?}")));
    }
  };

  let status_code = entry.sts.cd.as_deref().or(entry.sts.text.as_deref());
  let status = match status_code.map(str::trim) {
    Some("BOOK") => EntryStatus::Book,
    Some("PDNG") => EntryStatus::Pdng,
    Some("INFO") => EntryStatus::Info,
    other => {
      return Err(Error::Camt(format!("unknown entry status {other:?}")));
    }
  };

  // Money-movement singletons: only an entry with exactly one transaction
  // across all batches gets structured details; everything else keeps the
  // outer entry alone.
  let all_tx: Vec<&TransactionDetails> =
    entry.ntry_dtls.iter().flat_map(|d| d.tx_dtls.iter()).collect();
  let details = match all_tx.as_slice() {
    [single] => Some(convert_movement(single)),
    _ => None,
  };

  Ok(Some(CamtEntry {
    amount: entry.amt.value.trim().to_owned(),
    currency: entry.amt.currency.clone(),
    credit_debit_indicator,
    status,
    account_servicer_ref: reference.to_owned(),
    bank_transaction_code: entry.bk_tx_cd.as_ref().and_then(format_btc),
    booking_date: entry.bookg_dt.as_ref().and_then(parse_date_choice),
    value_date: entry.val_dt.as_ref().and_then(parse_date_choice),
    details,
  }))
}

fn convert_movement(tx: &TransactionDetails) -> MovementDetails {
  let refs = tx.refs.as_ref();
  MovementDetails {
    end_to_end_id: refs.and_then(|r| r.end_to_end_id.clone()),
    payment_information_id: refs.and_then(|r| r.pmt_inf_id.clone()),
    instruction_id: refs.and_then(|r| r.instr_id.clone()),
    debtor: PartyDetails {
      name: tx
        .rltd_pties
        .as_ref()
        .and_then(|p| p.dbtr.as_ref())
        .and_then(Party::name),
      iban: tx
        .rltd_pties
        .as_ref()
        .and_then(|p| p.dbtr_acct.as_ref())
        .and_then(|a| a.id.iban.clone()),
      bic:  tx
        .rltd_agts
        .as_ref()
        .and_then(|a| a.dbtr_agt.as_ref())
        .and_then(|a| a.fin_instn_id.bic()),
    },
    creditor: PartyDetails {
      name: tx
        .rltd_pties
        .as_ref()
        .and_then(|p| p.cdtr.as_ref())
        .and_then(Party::name),
      iban: tx
        .rltd_pties
        .as_ref()
        .and_then(|p| p.cdtr_acct.as_ref())
        .and_then(|a| a.id.iban.clone()),
      bic:  tx
        .rltd_agts
        .as_ref()
        .and_then(|a| a.cdtr_agt.as_ref())
        .and_then(|a| a.fin_instn_id.bic()),
    },
    unstructured_remittance_information: tx
      .rmt_inf
      .as_ref()
      .filter(|r| !r.ustrd.is_empty())
      .map(|r| r.ustrd.join(" ")),
  }
}

fn format_btc(btc: &BankTransactionCode) -> Option<String> {
  if let Some(domn) = &btc.domn {
    let mut parts = vec![domn.cd.clone()];
    if let Some(fmly) = &domn.fmly {
      parts.push(fmly.cd.clone());
      if let Some(sub) = &fmly.sub_fmly_cd {
        parts.push(sub.clone());
      }
    }
    return Some(parts.join("-"));
  }
  btc.prtry.as_ref().map(|p| p.cd.clone())
}

fn parse_date_choice(dc: &DateChoice) -> Option<NaiveDate> {
  if let Some(dt) = &dc.dt {
    return NaiveDate::parse_from_str(dt.trim(), "%Y-%m-%d").ok();
  }
  dc.dt_tm
    .as_ref()
    .and_then(|s| parse_datetime(s).ok())
    .map(|dt| dt.date_naive())
}

/// camt `CreDtTm` arrives with an offset from some banks and as a bare local
/// datetime from others; a bare value is taken as UTC.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  let s = s.trim();
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Ok(dt.with_timezone(&Utc));
  }
  NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
    .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
    .map(|naive| naive.and_utc())
    .map_err(|_| Error::Camt(format!("unparseable CreDtTm {s:?}")))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
