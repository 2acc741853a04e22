//! Error taxonomy of the EBICS engine.
//!
//! Four failure families, matching how the caller must react:
//! transport failures are retryable with backoff; bank-reported codes close
//! the transaction on the bank side; framing errors need operator attention;
//! post-processing failures keep the raw ciphertext around for forensics.

use thiserror::Error;

// ─── Technical return codes ──────────────────────────────────────────────────

/// The bank-assigned technical return codes Nexus interprets. Everything
/// else is surfaced verbatim through [`TechnicalCode::Other`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TechnicalCode {
  Ok,
  DownloadPostprocessDone,
  DownloadPostprocessSkipped,
  TxSegmentNumberUnderrun,
  AuthenticationFailed,
  InvalidUserOrUserState,
  ProcessingError,
  AccountAuthorisationFailed,
  AmountCheckFailed,
  AuthorisationOrderIdentifierFailed,
  NoDownloadDataAvailable,
  Other(String),
}

impl TechnicalCode {
  pub fn from_code(code: &str) -> Self {
    match code {
      "000000" => Self::Ok,
      "011000" => Self::DownloadPostprocessDone,
      "011001" => Self::DownloadPostprocessSkipped,
      "011101" => Self::TxSegmentNumberUnderrun,
      "061001" => Self::AuthenticationFailed,
      "091002" => Self::InvalidUserOrUserState,
      "091116" => Self::ProcessingError,
      "091302" => Self::AccountAuthorisationFailed,
      "091303" => Self::AmountCheckFailed,
      "090003" => Self::AuthorisationOrderIdentifierFailed,
      "090005" => Self::NoDownloadDataAvailable,
      other => Self::Other(other.to_owned()),
    }
  }

  pub fn code(&self) -> &str {
    match self {
      Self::Ok => "000000",
      Self::DownloadPostprocessDone => "011000",
      Self::DownloadPostprocessSkipped => "011001",
      Self::TxSegmentNumberUnderrun => "011101",
      Self::AuthenticationFailed => "061001",
      Self::InvalidUserOrUserState => "091002",
      Self::ProcessingError => "091116",
      Self::AccountAuthorisationFailed => "091302",
      Self::AmountCheckFailed => "091303",
      Self::AuthorisationOrderIdentifierFailed => "090003",
      Self::NoDownloadDataAvailable => "090005",
      Self::Other(code) => code,
    }
  }

  pub fn name(&self) -> &str {
    match self {
      Self::Ok => "EBICS_OK",
      Self::DownloadPostprocessDone => "EBICS_DOWNLOAD_POSTPROCESS_DONE",
      Self::DownloadPostprocessSkipped => "EBICS_DOWNLOAD_POSTPROCESS_SKIPPED",
      Self::TxSegmentNumberUnderrun => "EBICS_TX_SEGMENT_NUMBER_UNDERRUN",
      Self::AuthenticationFailed => "EBICS_AUTHENTICATION_FAILED",
      Self::InvalidUserOrUserState => "EBICS_INVALID_USER_OR_USER_STATE",
      Self::ProcessingError => "EBICS_PROCESSING_ERROR",
      Self::AccountAuthorisationFailed => "EBICS_ACCOUNT_AUTHORISATION_FAILED",
      Self::AmountCheckFailed => "EBICS_AMOUNT_CHECK_FAILED",
      Self::AuthorisationOrderIdentifierFailed => {
        "EBICS_AUTHORISATION_ORDER_IDENTIFIER_FAILED"
      }
      Self::NoDownloadDataAvailable => "EBICS_NO_DOWNLOAD_DATA_AVAILABLE",
      Self::Other(_) => "EBICS_UNKNOWN",
    }
  }

  /// Codes that terminate an INIT without data but without being an error
  /// for the caller.
  pub fn is_ok(&self) -> bool {
    matches!(
      self,
      Self::Ok | Self::DownloadPostprocessDone | Self::DownloadPostprocessSkipped
    )
  }
}

impl std::fmt::Display for TechnicalCode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} ({})", self.name(), self.code())
  }
}

// ─── Error ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum Error {
  /// Bank unreachable, TLS failure, timeout. Retryable with backoff.
  #[error("transport failure: {0}")]
  Transport(#[from] reqwest::Error),

  /// The bank closed the transaction with a technical or business code.
  #[error("bank reported {technical}{}", reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
  Bank {
    technical: TechnicalCode,
    reason:    Option<String>,
  },

  /// Invalid XML, missing field, unexpected phase. Fatal for the
  /// transaction; not retried without operator intervention.
  #[error("protocol framing error: {0}")]
  Framing(String),

  /// The signature on a bank response did not verify.
  #[error("bank signature verification failed")]
  BadSignature,

  /// RSA/AES failure (bad padding, wrong key digest).
  #[error("crypto failure: {0}")]
  CryptoFailure(String),

  /// Decrypt/inflate failed after the bank said OK.
  #[error("post-processing failure: {0}")]
  PostProcess(String),

  /// The upload order-id sequence is exhausted; the subscriber state must
  /// be rotated before retrying.
  #[error("order-id sequence exhausted; rotate subscriber state")]
  OrderIdOverflow,

  /// Key material could not be loaded or produced.
  #[error("key handling error: {0}")]
  Keys(String),
}

impl Error {
  pub fn bank(technical: TechnicalCode, reason: Option<String>) -> Self {
    Self::Bank { technical, reason }
  }

  /// Whether the caller may retry the same operation unchanged.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::Transport(_))
  }

  /// The technical code carried by a bank-reported error, if any.
  pub fn technical_code(&self) -> Option<&TechnicalCode> {
    match self {
      Self::Bank { technical, .. } => Some(technical),
      _ => None,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn code_round_trip() {
    for code in
      ["000000", "011000", "090005", "091302", "091303", "061001", "424242"]
    {
      assert_eq!(TechnicalCode::from_code(code).code(), code);
    }
  }

  #[test]
  fn only_transport_is_retryable() {
    let bank = Error::bank(TechnicalCode::AmountCheckFailed, None);
    assert!(!bank.is_retryable());
    assert!(!Error::BadSignature.is_retryable());
    assert!(!Error::OrderIdOverflow.is_retryable());
  }

  #[test]
  fn bank_error_display_carries_name_and_code() {
    let e = Error::bank(
      TechnicalCode::AccountAuthorisationFailed,
      Some("[EBICS_ACCOUNT_AUTHORISATION_FAILED]".into()),
    );
    let shown = e.to_string();
    assert!(shown.contains("EBICS_ACCOUNT_AUTHORISATION_FAILED"), "{shown}");
    assert!(shown.contains("091302"), "{shown}");
  }
}
