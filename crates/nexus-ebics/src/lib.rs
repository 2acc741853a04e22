//! EBICS client protocol engine for Nexus.
//!
//! Layered bottom-up: crypto primitives ([`crypto`], [`keys`]), the XML
//! surface ([`xml`]), per-transaction data handling ([`transaction`],
//! [`zipped`]), and the phase orchestrator ([`client`]).

pub mod client;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod order;
pub mod transaction;
pub mod xml;
pub mod zipped;

pub use client::{DEFAULT_TIMEOUT, EbicsClient, EbicsSession};
pub use error::{Error, Result, TechnicalCode};
pub use xml::{
  request::{DownloadOrder, UploadOrder},
  response::HtdAccount,
};
