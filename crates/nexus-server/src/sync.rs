//! In-process coordination: per-connection EBICS serialisation and the
//! per-account notification used by long-polling reads.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex},
};

use tokio::sync::{Mutex as AsyncMutex, watch};

/// One async mutex per bank connection: at most one EBICS transaction may
/// be in flight per subscriber. The whole transaction runs under the guard.
#[derive(Default)]
pub struct ConnectionLocks {
  locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ConnectionLocks {
  pub fn new() -> Self { Self::default() }

  pub fn for_connection(&self, connection: &str) -> Arc<AsyncMutex<()>> {
    self
      .locks
      .lock()
      .expect("lock registry poisoned")
      .entry(connection.to_owned())
      .or_default()
      .clone()
  }
}

/// Per-account insert counter, bumped whenever ingestion writes a ledger
/// row; `GET /transactions` long-polls on it.
///
/// A `watch` channel rather than a `Notify`: the version survives the gap
/// between reading the table and awaiting the change, so a row inserted in
/// between is never lost.
#[derive(Default)]
pub struct TransactionWatch {
  channels: Mutex<HashMap<String, watch::Sender<u64>>>,
}

impl TransactionWatch {
  pub fn new() -> Self { Self::default() }

  fn sender(&self, account: &str) -> watch::Sender<u64> {
    self
      .channels
      .lock()
      .expect("watch registry poisoned")
      .entry(account.to_owned())
      .or_insert_with(|| watch::channel(0).0)
      .clone()
  }

  /// Wake every pending long-poll on `account`.
  pub fn signal(&self, account: &str) {
    self.sender(account).send_modify(|version| *version += 1);
  }

  /// Subscribe before reading the table; await
  /// [`watch::Receiver::changed`] afterwards.
  pub fn subscribe(&self, account: &str) -> watch::Receiver<u64> {
    self.sender(account).subscribe()
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;

  #[tokio::test]
  async fn locks_serialise_per_connection() {
    let locks = ConnectionLocks::new();
    let a = locks.for_connection("c1");
    let b = locks.for_connection("c1");
    let guard = a.lock().await;
    assert!(b.try_lock().is_err(), "same connection must contend");
    drop(guard);
    assert!(locks.for_connection("c2").try_lock().is_ok());
  }

  #[tokio::test]
  async fn signal_wakes_a_subscriber() {
    let watch = TransactionWatch::new();
    let mut rx = watch.subscribe("foo");
    rx.borrow_and_update();

    assert!(
      tokio::time::timeout(Duration::from_millis(20), rx.changed())
        .await
        .is_err(),
      "no signal yet"
    );

    watch.signal("foo");
    tokio::time::timeout(Duration::from_millis(200), rx.changed())
      .await
      .expect("subscriber must wake")
      .unwrap();
  }

  #[tokio::test]
  async fn signal_between_read_and_await_is_not_lost() {
    let watch = TransactionWatch::new();
    let mut rx = watch.subscribe("foo");
    rx.borrow_and_update();

    // The insert lands before the poller awaits: changed() still fires.
    watch.signal("foo");
    tokio::time::timeout(Duration::from_millis(50), rx.changed())
      .await
      .expect("change must be visible")
      .unwrap();
  }

  #[tokio::test]
  async fn signals_are_scoped_per_account() {
    let watch = TransactionWatch::new();
    let mut rx = watch.subscribe("bar");
    rx.borrow_and_update();
    watch.signal("foo");
    assert!(
      tokio::time::timeout(Duration::from_millis(20), rx.changed())
        .await
        .is_err()
    );
  }
}
