//! Bank connections and their EBICS subscriber state.
//!
//! A connection names a way to reach one bank. Only the EBICS type exists
//! today; the type tag keeps the door open for others without implying any
//! support for them.

use serde::{Deserialize, Serialize};

/// The protocol family a connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
  Ebics,
}

/// Which EBICS schema generation the bank expects.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EbicsDialect {
  /// EBICS 2.5, schema H004, `OrderType` strings.
  #[default]
  H004,
  /// EBICS 3.0, schema H005, BTF service selectors.
  H005,
}

/// A named link between Nexus and one bank, owned by one local user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankConnection {
  pub name:            String,
  pub connection_type: ConnectionType,
  pub dialect:         EbicsDialect,
  /// Local username that created (and may manage) this connection.
  pub owner:           String,
}

// ─── Subscriber ──────────────────────────────────────────────────────────────

/// Whether the bank has received a key-management order.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
  #[default]
  NotSent,
  Sent,
  Unknown,
}

/// The EBICS client identity behind a connection — one-to-one with a
/// [`BankConnection`] of type `ebics`.
///
/// Private keys are held as PKCS#8 DER blobs; the bank's public keys as
/// SubjectPublicKeyInfo DER, and stay `None` until HPB succeeds.
#[derive(Debug, Clone)]
pub struct EbicsSubscriber {
  pub connection: String,
  pub url:        String,
  pub host_id:    String,
  pub partner_id: String,
  pub user_id:    String,
  /// Optional technical subscriber id some banks require.
  pub system_id:  Option<String>,

  pub signature_private_key:      Vec<u8>,
  pub authentication_private_key: Vec<u8>,
  pub encryption_private_key:     Vec<u8>,

  pub bank_authentication_public_key: Option<Vec<u8>>,
  pub bank_encryption_public_key:     Option<Vec<u8>>,

  pub ini_state: KeyState,
  pub hia_state: KeyState,
  /// Upload order-id sequence position, see the EBICS engine's order ids.
  pub next_order_seq: i64,
}

impl EbicsSubscriber {
  /// The connection is usable for orders beyond key management once both
  /// key uploads went out and the bank keys are known.
  pub fn is_ready(&self) -> bool {
    self.ini_state == KeyState::Sent
      && self.hia_state == KeyState::Sent
      && self.bank_authentication_public_key.is_some()
      && self.bank_encryption_public_key.is_some()
  }
}
