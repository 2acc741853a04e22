//! The facade bus — the seam where domain-specific consumers (e.g. a Taler
//! wire gateway) plug into the generic ledger.
//!
//! Only the generic contract lives here. Facades observe new ledger rows
//! (while the ingesting transaction still holds the account) and may offer
//! initiations for API routes that book payments on their behalf. Facades
//! must never re-fetch from the bank.

use std::sync::Arc;

use tracing::debug;

use nexus_core::{
  initiation::PaymentInitiationData, transaction::BankTransactionEntry,
};

/// A pluggable consumer of the ledger.
pub trait Facade: Send + Sync {
  fn name(&self) -> &str;

  /// Invoked once per new ledger row, in discovery order.
  fn on_ingested(&self, entry: &BankTransactionEntry);

  /// Initiations this facade wants booked, drained by its own API routes.
  fn select_initiations(&self) -> Vec<PaymentInitiationData> { Vec::new() }
}

/// Registry of facades; every hook fans out to all of them.
#[derive(Default, Clone)]
pub struct FacadeBus {
  facades: Vec<Arc<dyn Facade>>,
}

impl FacadeBus {
  pub fn new() -> Self { Self::default() }

  pub fn register(&mut self, facade: Arc<dyn Facade>) {
    self.facades.push(facade);
  }

  pub fn by_name(&self, name: &str) -> Option<Arc<dyn Facade>> {
    self.facades.iter().find(|f| f.name() == name).cloned()
  }

  pub fn notify_ingested(&self, entry: &BankTransactionEntry) {
    for facade in &self.facades {
      facade.on_ingested(entry);
    }
  }

  /// Initiations selected by the named facade.
  pub fn select_initiations_for(
    &self,
    name: &str,
  ) -> Option<Vec<PaymentInitiationData>> {
    self.by_name(name).map(|f| f.select_initiations())
  }
}

/// Default facade: traces every ingested row.
pub struct LoggingFacade;

impl Facade for LoggingFacade {
  fn name(&self) -> &str { "log" }

  fn on_ingested(&self, entry: &BankTransactionEntry) {
    debug!(
      account = %entry.bank_account,
      transaction = %entry.transaction_id,
      amount = %entry.amount,
      "ingested ledger row"
    );
  }
}
