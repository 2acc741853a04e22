//! The submit driver: one pain.001 upload per pending initiation, no
//! batching.

use tracing::{info, warn};

use nexus_core::{
  clock::Clock as _, connection::EbicsDialect,
  initiation::PaymentInitiation, store::NexusStore,
};
use nexus_ebics::{EbicsSession, UploadOrder};
use nexus_iso20022::pain001::{DebtorAccount, Pain001Document, PainVersion};

use crate::{
  error::{AppError, Result},
  state::AppState,
  workers::{MAX_ATTEMPTS, backoff, fetch::load_account},
};

/// Upload one initiation. On success the row is flagged submitted with the
/// submission timestamp; a bank rejection leaves it unsubmitted and
/// surfaces the technical code.
pub async fn submit_initiation<S>(
  state: &AppState<S>,
  initiation: &PaymentInitiation,
) -> Result<()>
where
  S: NexusStore,
{
  if initiation.submitted {
    return Ok(());
  }

  let (account, connection, subscriber) =
    load_account(state, &initiation.bank_account).await?;
  let connection_name = connection.name.clone();

  let lock = state.locks.for_connection(&connection_name);
  let _guard = lock.lock().await;

  let session = EbicsSession::from_subscriber(&subscriber, connection.dialect)?;
  let version = match connection.dialect {
    EbicsDialect::H004 => PainVersion::V03,
    EbicsDialect::H005 => PainVersion::V09,
  };
  let debtor = DebtorAccount {
    name:      account.account_holder.clone(),
    iban:      account.iban.clone(),
    bank_code: account.bank_code.clone(),
  };
  let document =
    Pain001Document::render(version, &debtor, initiation, state.clock.now());

  let mut attempt = 0;
  let order_id = loop {
    attempt += 1;
    // A fresh order sequence per attempt: a half-registered transaction
    // at the bank must not collide with the retry.
    let order_seq = state
      .store
      .next_order_seq(&connection_name)
      .await
      .map_err(AppError::store)?;

    match state
      .ebics
      .upload(
        &session,
        UploadOrder::Cct,
        &document.bytes,
        order_seq,
        state.clock.now(),
      )
      .await
    {
      Ok(order_id) => break order_id,
      Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
        warn!(attempt, error = %e, "bank unreachable, backing off");
        tokio::time::sleep(backoff(attempt)).await;
      }
      Err(e) => return Err(e.into()),
    }
  };

  state
    .store
    .mark_initiation_submitted(initiation.id, state.clock.now())
    .await
    .map_err(AppError::store)?;
  info!(
    initiation = %initiation.id,
    account = %initiation.bank_account,
    %order_id,
    "initiation submitted"
  );
  Ok(())
}

/// Submit every pending (unsubmitted, valid) initiation of `label`.
///
/// Failures are logged and leave the row unsubmitted; the remaining
/// initiations are still attempted. Returns how many went out.
pub async fn submit_all_pending<S>(
  state: &AppState<S>,
  label: &str,
) -> Result<u64>
where
  S: NexusStore,
{
  let pending = state
    .store
    .list_unsubmitted_initiations(label)
    .await
    .map_err(AppError::store)?;

  let mut submitted = 0;
  for initiation in &pending {
    match submit_initiation(state, initiation).await {
      Ok(()) => submitted += 1,
      Err(e) => {
        // Authorisation rejections will not heal on their own; flag the
        // row so the next submit-all skips it.
        if authorisation_rejection(&e) {
          state
            .store
            .mark_initiation_invalid(initiation.id)
            .await
            .map_err(AppError::store)?;
        }
        warn!(
          initiation = %initiation.id,
          error = %e,
          "submission failed; leaving unsubmitted"
        );
      }
    }
  }
  Ok(submitted)
}

fn authorisation_rejection(e: &AppError) -> bool {
  use nexus_ebics::TechnicalCode;
  matches!(
    e,
    AppError::Protocol(protocol) if matches!(
      protocol.technical_code(),
      Some(
        TechnicalCode::AccountAuthorisationFailed
          | TechnicalCode::AuthorisationOrderIdentifierFailed
      )
    )
  )
}

#[cfg(test)]
mod tests {
  use nexus_ebics::TechnicalCode;

  use super::*;

  #[test]
  fn only_authorisation_codes_invalidate() {
    let unauthorised = AppError::Protocol(nexus_ebics::Error::bank(
      TechnicalCode::AccountAuthorisationFailed,
      None,
    ));
    assert!(authorisation_rejection(&unauthorised));

    let overdraft = AppError::Protocol(nexus_ebics::Error::bank(
      TechnicalCode::AmountCheckFailed,
      None,
    ));
    assert!(!authorisation_rejection(&overdraft), "overdrafts may heal");

    assert!(!authorisation_rejection(&AppError::NotFound("x".into())));
  }
}
