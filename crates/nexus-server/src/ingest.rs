//! Ingestion: raw bank message → parsed camt → deduplicated ledger rows,
//! with confirmation matching, watermark bookkeeping and facade fan-out.

use tracing::{debug, warn};

use nexus_core::{
  message::FetchLevel,
  store::{IngestOutcome, NexusStore},
  transaction::CreditDebit,
};
use nexus_iso20022::parse_camt;

use crate::{
  error::{AppError, Result},
  state::AppState,
};

/// Outcome of ingesting one downloaded document.
#[derive(Debug, Default, Clone, Copy)]
pub struct IngestStats {
  pub new_transactions: u64,
  pub downloaded_messages: u64,
}

impl IngestStats {
  pub fn merge(&mut self, other: IngestStats) {
    self.new_transactions += other.new_transactions;
    self.downloaded_messages += other.downloaded_messages;
  }
}

/// Ingest one camt document downloaded over `connection` for `account`.
///
/// The raw bytes are stored first in every case; a parse failure flags the
/// stored message and ingestion continues with the next document.
pub async fn ingest_document<S>(
  state: &AppState<S>,
  connection: &str,
  account: &str,
  level: FetchLevel,
  document: Vec<u8>,
) -> Result<IngestStats>
where
  S: NexusStore,
{
  let text = String::from_utf8_lossy(&document).into_owned();
  let parsed = parse_camt(&text);

  let store = &state.store;
  let mut stats = IngestStats { downloaded_messages: 1, ..Default::default() };

  let camt = match parsed {
    Ok(camt) => camt,
    Err(e) => {
      let serial = store
        .insert_message(connection, level, None, document)
        .await
        .map_err(AppError::store)?;
      store
        .mark_message_errors(serial)
        .await
        .map_err(AppError::store)?;
      warn!(connection, serial, error = %e, "unparseable bank message");
      return Ok(stats);
    }
  };

  let serial = store
    .insert_message(connection, level, Some(camt.message_id.clone()), document)
    .await
    .map_err(AppError::store)?;

  if camt.dropped_without_ref > 0 {
    warn!(
      connection,
      message = %camt.message_id,
      dropped = camt.dropped_without_ref,
      "entries without AcctSvcrRef were dropped"
    );
  }

  let mut inserted = false;
  // Rows are inserted in document order; row ids reflect discovery order.
  for entry in camt.entries {
    let is_debit = entry.credit_debit_indicator == CreditDebit::Debit;
    let payment_information_id = entry
      .details
      .as_ref()
      .and_then(|d| d.payment_information_id.clone());

    let outcome = store
      .ingest_entry(account, entry)
      .await
      .map_err(AppError::store)?;

    let row = match outcome {
      IngestOutcome::New(row) => {
        stats.new_transactions += 1;
        row
      }
      IngestOutcome::StatusUpdated(row) => row,
      IngestOutcome::Duplicate => continue,
    };
    inserted = true;

    // Newly seen debits may confirm one of our initiations.
    if is_debit && let Some(pmtinf) = payment_information_id {
      let matched = store
        .confirm_initiation(account, &pmtinf, row.id)
        .await
        .map_err(AppError::store)?;
      if matched {
        debug!(account, %pmtinf, row = row.id, "initiation confirmed");
      }
    }

    state.facades.notify_ingested(&row);
  }

  // Watermark and serial move inside the same ingest pass that produced
  // the rows they describe.
  store
    .update_watermark(account, level, camt.creation_timestamp)
    .await
    .map_err(AppError::store)?;
  store
    .update_message_serial(account, serial)
    .await
    .map_err(AppError::store)?;

  if inserted {
    state.watch.signal(account);
  }
  Ok(stats)
}
