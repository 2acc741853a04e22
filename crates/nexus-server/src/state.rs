//! Shared application state threaded through handlers, workers and the
//! scheduler.

use std::sync::Arc;

use nexus_core::clock::Clock;
use nexus_ebics::EbicsClient;

use crate::{facade::FacadeBus, sync::{ConnectionLocks, TransactionWatch}};

/// Everything the service root wires together once at startup.
pub struct AppState<S> {
  pub store:   Arc<S>,
  pub clock:   Arc<dyn Clock>,
  pub ebics:   Arc<EbicsClient>,
  pub facades: Arc<FacadeBus>,
  pub locks:   Arc<ConnectionLocks>,
  pub watch:   Arc<TransactionWatch>,
}

// Manual impl: `S` itself sits behind an `Arc` and need not be `Clone`.
impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self {
      store:   self.store.clone(),
      clock:   self.clock.clone(),
      ebics:   self.ebics.clone(),
      facades: self.facades.clone(),
      locks:   self.locks.clone(),
      watch:   self.watch.clone(),
    }
  }
}

impl<S> AppState<S> {
  /// State with the wall clock, a fresh EBICS client and the default
  /// (logging) facade.
  pub fn new(store: S) -> Self {
    let mut facades = FacadeBus::new();
    facades.register(Arc::new(crate::facade::LoggingFacade));
    Self {
      store:   Arc::new(store),
      clock:   Arc::new(nexus_core::clock::SystemClock),
      ebics:   Arc::new(
        EbicsClient::new(nexus_ebics::DEFAULT_TIMEOUT)
          .expect("HTTP client construction cannot fail"),
      ),
      facades: Arc::new(facades),
      locks:   Arc::new(ConnectionLocks::new()),
      watch:   Arc::new(TransactionWatch::new()),
    }
  }
}
