//! The fetch driver: one EBICS download per requested level, followed by
//! ingestion of every returned document.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use tracing::warn;

use nexus_core::{
  account::BankAccount,
  clock::Clock as _,
  connection::BankConnection,
  message::{FetchLevel, FetchRange, FetchSpec},
  store::NexusStore,
};
use nexus_ebics::{DownloadOrder, EbicsSession};

use crate::{
  error::{AppError, Result},
  ingest::{IngestStats, ingest_document},
  state::AppState,
  workers::{MAX_ATTEMPTS, backoff},
};

fn order_for(level: FetchLevel) -> DownloadOrder {
  match level {
    FetchLevel::Report => DownloadOrder::C52,
    FetchLevel::Statement => DownloadOrder::C53,
    FetchLevel::Notification => DownloadOrder::C54,
    // Expanded before we get here.
    FetchLevel::All => DownloadOrder::C53,
  }
}

/// The date range a fetch asks the bank for, if any.
fn date_range(
  range: FetchRange,
  watermark: Option<DateTime<Utc>>,
  now: DateTime<Utc>,
) -> Option<(NaiveDate, NaiveDate)> {
  match range {
    // The bank decides what is "new"; no explicit range.
    FetchRange::Latest | FetchRange::All => None,
    FetchRange::SinceLast => {
      watermark.map(|from| (from.date_naive(), now.date_naive()))
    }
    FetchRange::PreviousDays { number } => Some((
      (now - ChronoDuration::days(number as i64)).date_naive(),
      now.date_naive(),
    )),
  }
}

/// Run EBICS downloads for `spec` against the account's default connection
/// and ingest everything that comes back. Returns the combined stats.
pub async fn fetch_transactions<S>(
  state: &AppState<S>,
  label: &str,
  spec: FetchSpec,
) -> Result<IngestStats>
where
  S: NexusStore,
{
  let (account, connection, subscriber) = load_account(state, label).await?;
  let connection_name = connection.name.clone();

  // The whole fetch runs under the per-subscriber mutex.
  let lock = state.locks.for_connection(&connection_name);
  let _guard = lock.lock().await;

  let session = EbicsSession::from_subscriber(&subscriber, connection.dialect)?;

  let mut stats = IngestStats::default();
  for level in spec.level.expand() {
    let order = order_for(*level);
    let range =
      date_range(spec.range, account.watermark(*level), state.clock.now());

    let documents =
      download_with_retry(state, &session, order, range).await?;
    for document in documents {
      let document_stats =
        ingest_document(state, &connection_name, label, *level, document)
          .await?;
      stats.merge(document_stats);
    }
  }
  Ok(stats)
}

async fn download_with_retry<S>(
  state: &AppState<S>,
  session: &EbicsSession,
  order: DownloadOrder,
  range: Option<(NaiveDate, NaiveDate)>,
) -> Result<Vec<Vec<u8>>>
where
  S: NexusStore,
{
  let mut attempt = 0;
  loop {
    attempt += 1;
    match state
      .ebics
      .download_documents(session, order, range, state.clock.now())
      .await
    {
      Ok(documents) => return Ok(documents),
      Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
        warn!(attempt, error = %e, "bank unreachable, backing off");
        tokio::time::sleep(backoff(attempt)).await;
      }
      Err(e) => return Err(e.into()),
    }
  }
}

/// Resolve account → default connection → subscriber, with API-shaped
/// errors along the way.
pub(crate) async fn load_account<S>(
  state: &AppState<S>,
  label: &str,
) -> Result<(
  BankAccount,
  BankConnection,
  nexus_core::connection::EbicsSubscriber,
)>
where
  S: NexusStore,
{
  let account = state
    .store
    .get_account(label)
    .await
    .map_err(AppError::store)?
    .ok_or_else(|| AppError::NotFound(format!("bank account {label}")))?;

  let connection_name = account.default_connection.clone().ok_or_else(|| {
    AppError::BadRequest(format!("bank account {label} has no connection"))
  })?;

  let connection = state
    .store
    .get_connection(&connection_name)
    .await
    .map_err(AppError::store)?
    .ok_or_else(|| {
      AppError::NotFound(format!("connection {connection_name}"))
    })?;

  let subscriber = state
    .store
    .get_subscriber(&connection_name)
    .await
    .map_err(AppError::store)?
    .ok_or_else(|| {
      AppError::NotFound(format!("subscriber for {connection_name}"))
    })?;

  Ok((account, connection, subscriber))
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn range_mapping() {
    let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
    let mark = Utc.with_ymd_and_hms(2024, 5, 2, 6, 0, 0).unwrap();

    assert_eq!(date_range(FetchRange::Latest, Some(mark), now), None);
    assert_eq!(date_range(FetchRange::All, Some(mark), now), None);
    assert_eq!(
      date_range(FetchRange::SinceLast, Some(mark), now),
      Some((
        NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
        NaiveDate::from_ymd_opt(2024, 5, 10).unwrap()
      ))
    );
    // No watermark yet: fetch without a range.
    assert_eq!(date_range(FetchRange::SinceLast, None, now), None);
    assert_eq!(
      date_range(FetchRange::PreviousDays { number: 3 }, None, now),
      Some((
        NaiveDate::from_ymd_opt(2024, 5, 7).unwrap(),
        NaiveDate::from_ymd_opt(2024, 5, 10).unwrap()
      ))
    );
  }

  #[test]
  fn levels_map_to_camt_orders() {
    assert_eq!(order_for(FetchLevel::Report), DownloadOrder::C52);
    assert_eq!(order_for(FetchLevel::Statement), DownloadOrder::C53);
    assert_eq!(order_for(FetchLevel::Notification), DownloadOrder::C54);
  }
}
