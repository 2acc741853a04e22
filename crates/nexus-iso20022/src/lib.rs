//! ISO 20022 messages as Nexus exchanges them with banks.
//!
//! Only the tags actually seen on the wire are modelled: camt.052/053/054
//! on the way in, pain.001 (dialects .03 and .09) on the way out. This is
//! deliberately not a general ISO 20022 library.

pub mod camt;
pub mod error;
pub mod pain001;

pub use camt::{CamtDocument, parse_camt};
pub use error::{Error, Result};
pub use pain001::{Pain001Document, PainVersion};
