//! The EBICS client: one HTTP POST per phase — INIT → TRANSFER × N →
//! RECEIPT for downloads, INIT → TRANSFER × N for uploads, single-shot
//! envelopes for key management.
//!
//! Concurrency: at most one transaction may be in flight per subscriber.
//! The client itself is stateless; the caller serialises calls per
//! subscriber (the server keeps one async mutex per connection).

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use reqwest::header::CONTENT_TYPE;
use rsa::RsaPublicKey;
use tracing::{debug, info, warn};

use nexus_core::connection::{EbicsDialect, EbicsSubscriber};

use crate::{
  crypto::{b64_encode, deflate, nonce},
  error::{Error, Result, TechnicalCode},
  keys::{BankKeys, SubscriberKeys, public_key_digest},
  order::encode_order_id,
  transaction::{UploadPackage, assemble_download, prepare_upload},
  xml::{
    request::{self, DownloadOrder, RequestContext, UploadOrder},
    response::{
      EbicsResponse, HostVersion, HtdAccount, parse_hev_response,
      parse_hpb_order_data, parse_htd_order_data, parse_response,
    },
    sign_document, verify_document,
  },
  zipped::extract_documents,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

// ─── Session ─────────────────────────────────────────────────────────────────

/// Everything needed to address one bank as one subscriber.
pub struct EbicsSession {
  pub url:        String,
  pub host_id:    String,
  pub partner_id: String,
  pub user_id:    String,
  pub system_id:  Option<String>,
  pub dialect:    EbicsDialect,
  pub keys:       SubscriberKeys,
  pub bank_keys:  Option<BankKeys>,
}

impl EbicsSession {
  /// Build a session from the persisted subscriber row.
  pub fn from_subscriber(
    subscriber: &EbicsSubscriber,
    dialect: EbicsDialect,
  ) -> Result<Self> {
    let keys = SubscriberKeys::from_der(
      &subscriber.signature_private_key,
      &subscriber.authentication_private_key,
      &subscriber.encryption_private_key,
    )?;
    let bank_keys = match (
      &subscriber.bank_authentication_public_key,
      &subscriber.bank_encryption_public_key,
    ) {
      (Some(auth), Some(enc)) => Some(BankKeys::from_der(auth, enc)?),
      _ => None,
    };
    Ok(Self {
      url: subscriber.url.clone(),
      host_id: subscriber.host_id.clone(),
      partner_id: subscriber.partner_id.clone(),
      user_id: subscriber.user_id.clone(),
      system_id: subscriber.system_id.clone(),
      dialect,
      keys,
      bank_keys,
    })
  }

  fn context(&self) -> Result<RequestContext<'_>> {
    let (auth_digest, enc_digest) = match &self.bank_keys {
      Some(bank) => (
        Some(b64_encode(&public_key_digest(&bank.authentication)?)),
        Some(b64_encode(&public_key_digest(&bank.encryption)?)),
      ),
      None => (None, None),
    };
    Ok(RequestContext {
      dialect:    self.dialect,
      host_id:    &self.host_id,
      partner_id: &self.partner_id,
      user_id:    &self.user_id,
      system_id:  self.system_id.as_deref(),
      bank_auth_digest_b64: auth_digest,
      bank_enc_digest_b64:  enc_digest,
    })
  }

  fn bank_keys(&self) -> Result<&BankKeys> {
    self
      .bank_keys
      .as_ref()
      .ok_or_else(|| Error::Keys("bank keys unknown; run HPB first".into()))
  }
}

// ─── Client ──────────────────────────────────────────────────────────────────

pub struct EbicsClient {
  http: reqwest::Client,
}

impl EbicsClient {
  pub fn new(timeout: Duration) -> Result<Self> {
    let http = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(Self { http })
  }

  async fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>> {
    let response = self
      .http
      .post(url)
      .header(CONTENT_TYPE, "text/xml; charset=utf-8")
      .body(body)
      .send()
      .await?
      .error_for_status()?;
    Ok(response.bytes().await?.to_vec())
  }

  /// Sign, POST, verify the bank's signature, parse.
  async fn exchange_signed(
    &self,
    session: &EbicsSession,
    unsigned: Vec<u8>,
  ) -> Result<EbicsResponse> {
    let signed = sign_document(&unsigned, &session.keys.authentication)?;
    let raw = self.post(&session.url, signed).await?;
    if let Some(bank) = &session.bank_keys {
      verify_document(&raw, &bank.authentication)?;
    }
    parse_response(&raw)
  }

  /// POST an envelope whose response carries no bank signature
  /// (key management).
  async fn exchange_unsigned(
    &self,
    session: &EbicsSession,
    body: Vec<u8>,
  ) -> Result<EbicsResponse> {
    let raw = self.post(&session.url, body).await?;
    parse_response(&raw)
  }

  // ── Downloads ─────────────────────────────────────────────────────────

  /// Run one download transaction. `Ok(None)` means the bank had no data
  /// (`EBICS_NO_DOWNLOAD_DATA_AVAILABLE`).
  pub async fn download(
    &self,
    session: &EbicsSession,
    order: DownloadOrder,
    range: Option<(NaiveDate, NaiveDate)>,
    now: DateTime<Utc>,
  ) -> Result<Option<Vec<u8>>> {
    let ctx = session.context()?;
    let init = request::download_init(&ctx, order, range, &nonce(), now);
    let response = self.exchange_signed(session, init).await?;

    if *response.technical()? == TechnicalCode::NoDownloadDataAvailable {
      debug!(order = order.order_type(), "no download data available");
      return Ok(None);
    }
    response.require_ok()?;

    let transaction_id = response
      .transaction_id
      .clone()
      .ok_or_else(|| Error::Framing("download INIT without TransactionID".into()))?;
    let num_segments = response.num_segments.unwrap_or(1);
    let info = response.data_encryption_info.clone().ok_or_else(|| {
      Error::Framing("download INIT without DataEncryptionInfo".into())
    })?;

    let mut segments = vec![response.order_data_b64.clone().ok_or_else(
      || Error::Framing("download INIT without first segment".into()),
    )?];

    // Segments 2..N arrive through TRANSFER phases, in bank order.
    for number in 2..=num_segments {
      let body = request::download_transfer(
        &ctx,
        &transaction_id,
        number,
        number == num_segments,
      );
      let segment_response = self.exchange_signed(session, body).await?;
      segment_response.require_ok()?;
      segments.push(segment_response.order_data_b64.clone().ok_or_else(
        || Error::Framing(format!("transfer segment {number} without data")),
      )?);
    }

    let assembled = assemble_download(&segments, &info, &session.keys);
    let receipt_code = if assembled.is_ok() { 0 } else { 1 };
    if let Err(e) = &assembled {
      // Keep the ciphertext around for forensics before receipting.
      warn!(
        transaction = %transaction_id,
        error = %e,
        ciphertext_b64 = segments.join("").as_str(),
        "download post-processing failed"
      );
    }

    let receipt =
      request::download_receipt(&ctx, &transaction_id, receipt_code);
    let receipt_response = self.exchange_signed(session, receipt).await?;
    let technical = receipt_response.technical()?;
    if !technical.is_ok() {
      return Err(Error::bank(
        technical.clone(),
        receipt_response.report_text.clone(),
      ));
    }

    assembled.map(Some)
  }

  /// Download and split an order that may arrive in a ZIP container.
  pub async fn download_documents(
    &self,
    session: &EbicsSession,
    order: DownloadOrder,
    range: Option<(NaiveDate, NaiveDate)>,
    now: DateTime<Utc>,
  ) -> Result<Vec<Vec<u8>>> {
    match self.download(session, order, range, now).await? {
      Some(order_data) => extract_documents(&order_data),
      None => Ok(Vec::new()),
    }
  }

  // ── Uploads ───────────────────────────────────────────────────────────

  /// Run one upload transaction; returns the order id the transaction ran
  /// under. `order_seq` feeds the client-side id used with H004 banks.
  pub async fn upload(
    &self,
    session: &EbicsSession,
    order: UploadOrder,
    payload: &[u8],
    order_seq: i64,
    now: DateTime<Utc>,
  ) -> Result<String> {
    let bank = session.bank_keys()?;
    let package: UploadPackage = prepare_upload(
      payload,
      &session.keys,
      &session.partner_id,
      &session.user_id,
      &bank.encryption,
    )?;

    let local_order_id = match session.dialect {
      EbicsDialect::H004 => Some(encode_order_id(order_seq)?),
      EbicsDialect::H005 => None,
    };

    let ctx = session.context()?;
    let init = request::upload_init(
      &ctx,
      order,
      &package,
      local_order_id.as_deref(),
      &nonce(),
      now,
    );
    let response = self.exchange_signed(session, init).await?;
    response.require_ok()?;

    let transaction_id = response
      .transaction_id
      .clone()
      .ok_or_else(|| Error::Framing("upload INIT without TransactionID".into()))?;

    let total = package.segments.len() as u32;
    for (index, chunk) in package.segments.iter().enumerate() {
      // 0-based internally, 1-based on the wire.
      let number = index as u32 + 1;
      let body = request::upload_transfer(
        &ctx,
        &transaction_id,
        number,
        number == total,
        chunk,
      );
      let segment_response = self.exchange_signed(session, body).await?;
      segment_response.require_ok()?;
    }

    let order_id = response
      .order_id
      .or(local_order_id)
      .unwrap_or_default();
    info!(order = order.order_type(), %order_id, "upload complete");
    Ok(order_id)
  }

  // ── Key management ────────────────────────────────────────────────────

  /// INI: send the signing public key.
  pub async fn ini(&self, session: &EbicsSession) -> Result<()> {
    let ctx = session.context()?;
    let order_data = request::ini_order_data(
      &ctx,
      &RsaPublicKey::from(&session.keys.signature),
    );
    let body =
      request::ini_request(&ctx, &b64_encode(&deflate(&order_data)?));
    self.exchange_unsigned(session, body).await?.require_ok()
  }

  /// HIA: send the authentication and encryption public keys.
  pub async fn hia(&self, session: &EbicsSession) -> Result<()> {
    let ctx = session.context()?;
    let order_data = request::hia_order_data(
      &ctx,
      &RsaPublicKey::from(&session.keys.authentication),
      &RsaPublicKey::from(&session.keys.encryption),
    );
    let body =
      request::hia_request(&ctx, &b64_encode(&deflate(&order_data)?));
    self.exchange_unsigned(session, body).await?.require_ok()
  }

  /// HPB: fetch the bank keys, encrypted to our encryption key.
  ///
  /// The returned keys are *candidates*: the operator must confirm their
  /// fingerprints out-of-band before the connection counts as ready.
  pub async fn hpb(
    &self,
    session: &EbicsSession,
    now: DateTime<Utc>,
  ) -> Result<BankKeys> {
    let ctx = session.context()?;
    let unsigned = request::hpb_request(&ctx, &nonce(), now);
    let signed = sign_document(&unsigned, &session.keys.authentication)?;
    let raw = self.post(&session.url, signed).await?;
    let response = parse_response(&raw)?;
    response.require_ok()?;

    let info = response.data_encryption_info.ok_or_else(|| {
      Error::Framing("HPB response without DataEncryptionInfo".into())
    })?;
    let order_data_b64 = response.order_data_b64.ok_or_else(|| {
      Error::Framing("HPB response without OrderData".into())
    })?;
    let order_data =
      assemble_download(&[order_data_b64], &info, &session.keys)?;

    let (authentication, encryption) = parse_hpb_order_data(&order_data)?;
    Ok(BankKeys { authentication, encryption })
  }

  /// List the accounts the bank offers this subscriber: HTD first, HKD as
  /// a fallback for hosts that only fill the bank-parameter order.
  pub async fn fetch_accounts(
    &self,
    session: &EbicsSession,
    now: DateTime<Utc>,
  ) -> Result<Vec<HtdAccount>> {
    let mut accounts = Vec::new();
    for order in [DownloadOrder::Htd, DownloadOrder::Hkd] {
      for document in
        self.download_documents(session, order, None, now).await?
      {
        accounts.extend(parse_htd_order_data(&document)?);
      }
      if !accounts.is_empty() {
        break;
      }
    }
    Ok(accounts)
  }

  /// HEV: ask the host which protocol versions it speaks.
  pub async fn hev(
    &self,
    url: &str,
    host_id: &str,
  ) -> Result<Vec<HostVersion>> {
    let raw = self.post(url, request::hev_request(host_id)).await?;
    parse_hev_response(&raw)
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
