//! Builders for every EBICS request document Nexus sends.
//!
//! All builders return the serialised document; those that participate in
//! authentication leave an `<AuthSignature/>` placeholder for
//! [`super::sign_document`] to fill.

use std::io::Cursor;

use chrono::{DateTime, NaiveDate, Utc};
use quick_xml::{
  Writer,
  events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};
use rsa::RsaPublicKey;

use nexus_core::connection::EbicsDialect;

use crate::{
  crypto::b64_encode,
  keys::public_key_parts,
  transaction::UploadPackage,
  xml::{AUTH_SIGNATURE_PLACEHOLDER, NS_DS, NS_H004, NS_H005, NS_HEV},
};

pub const SHA256_ALGORITHM: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
const SECURITY_MEDIUM: &str = "0000";
const PRODUCT: &str = "Nexus";

// ─── Orders ──────────────────────────────────────────────────────────────────

/// EBICS 3 BTF service selector.
#[derive(Debug, Clone)]
pub struct BtfService {
  pub name:      &'static str,
  pub scope:     &'static str,
  pub message:   &'static str,
  pub version:   &'static str,
  pub container: Option<&'static str>,
}

/// Download order types Nexus issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOrder {
  /// camt.052 intraday reports.
  C52,
  /// camt.053 statements.
  C53,
  /// camt.054 notifications.
  C54,
  /// Subscriber details, including reachable accounts.
  Htd,
  /// Bank parameters and account details.
  Hkd,
  /// Order types available for download.
  Haa,
}

impl DownloadOrder {
  pub fn order_type(self) -> &'static str {
    match self {
      Self::C52 => "C52",
      Self::C53 => "C53",
      Self::C54 => "C54",
      Self::Htd => "HTD",
      Self::Hkd => "HKD",
      Self::Haa => "HAA",
    }
  }

  /// The H005 rendering: camt downloads become BTD services, the admin
  /// orders keep their type string.
  fn btf(self) -> Option<BtfService> {
    let svc = |name, message| BtfService {
      name,
      scope: "DE",
      message,
      version: "08",
      container: Some("ZIP"),
    };
    match self {
      Self::C52 => Some(svc("REP", "camt.052")),
      Self::C53 => Some(svc("EOP", "camt.053")),
      Self::C54 => Some(svc("REP", "camt.054")),
      Self::Htd | Self::Hkd | Self::Haa => None,
    }
  }
}

/// Upload order types Nexus issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOrder {
  /// SEPA credit transfer (pain.001).
  Cct,
  /// Core direct variant kept for banks that only accept CCC.
  Ccc,
}

impl UploadOrder {
  pub fn order_type(self) -> &'static str {
    match self {
      Self::Cct => "CCT",
      Self::Ccc => "CCC",
    }
  }

  fn btf(self) -> BtfService {
    BtfService {
      name:      "SCT",
      scope:     "DE",
      message:   "pain.001",
      version:   "09",
      container: None,
    }
  }
}

// ─── Context ─────────────────────────────────────────────────────────────────

/// Everything the builders need to address the bank.
pub struct RequestContext<'a> {
  pub dialect:    EbicsDialect,
  pub host_id:    &'a str,
  pub partner_id: &'a str,
  pub user_id:    &'a str,
  pub system_id:  Option<&'a str>,
  /// Base64 SHA-256 digests of the bank keys; required for everything but
  /// key management.
  pub bank_auth_digest_b64: Option<String>,
  pub bank_enc_digest_b64:  Option<String>,
}

impl RequestContext<'_> {
  fn namespace(&self) -> &'static str {
    match self.dialect {
      EbicsDialect::H004 => NS_H004,
      EbicsDialect::H005 => NS_H005,
    }
  }

  fn version_tag(&self) -> &'static str {
    match self.dialect {
      EbicsDialect::H004 => "H004",
      EbicsDialect::H005 => "H005",
    }
  }
}

// ─── Writer helpers ──────────────────────────────────────────────────────────

type W = Writer<Cursor<Vec<u8>>>;

fn new_writer() -> W {
  let mut w = Writer::new(Cursor::new(Vec::new()));
  w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
    .unwrap();
  w
}

fn start(w: &mut W, tag: &str) {
  w.write_event(Event::Start(BytesStart::new(tag))).unwrap();
}

fn start_with(w: &mut W, tag: &str, attrs: &[(&str, &str)]) {
  let mut e = BytesStart::new(tag);
  for (k, v) in attrs {
    e.push_attribute((*k, *v));
  }
  w.write_event(Event::Start(e)).unwrap();
}

fn end(w: &mut W, tag: &str) {
  w.write_event(Event::End(BytesEnd::new(tag))).unwrap();
}

fn text(w: &mut W, tag: &str, value: &str) {
  start(w, tag);
  w.write_event(Event::Text(BytesText::new(value))).unwrap();
  end(w, tag);
}

fn text_with(w: &mut W, tag: &str, attrs: &[(&str, &str)], value: &str) {
  start_with(w, tag, attrs);
  w.write_event(Event::Text(BytesText::new(value))).unwrap();
  end(w, tag);
}

fn empty(w: &mut W, tag: &str) {
  w.write_event(Event::Empty(BytesStart::new(tag))).unwrap();
}

fn raw(w: &mut W, xml: &str) {
  w.write_event(Event::Text(BytesText::from_escaped(xml))).unwrap();
}

fn finish(w: W) -> Vec<u8> { w.into_inner().into_inner() }

fn timestamp(ts: DateTime<Utc>) -> String {
  ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

// ─── Shared header pieces ────────────────────────────────────────────────────

fn root(w: &mut W, ctx: &RequestContext<'_>, name: &str) {
  start_with(w, name, &[
    ("xmlns", ctx.namespace()),
    ("xmlns:ds", NS_DS),
    ("Version", ctx.version_tag()),
    ("Revision", "1"),
  ]);
}

fn static_identity(w: &mut W, ctx: &RequestContext<'_>) {
  text(w, "PartnerID", ctx.partner_id);
  text(w, "UserID", ctx.user_id);
  if let Some(system) = ctx.system_id {
    text(w, "SystemID", system);
  }
  text_with(w, "Product", &[("Language", "en")], PRODUCT);
}

fn bank_pub_key_digests(w: &mut W, ctx: &RequestContext<'_>) {
  let (auth, enc) = (
    ctx.bank_auth_digest_b64.as_deref().unwrap_or_default(),
    ctx.bank_enc_digest_b64.as_deref().unwrap_or_default(),
  );
  start(w, "BankPubKeyDigests");
  text_with(
    w,
    "Authentication",
    &[("Version", "X002"), ("Algorithm", SHA256_ALGORITHM)],
    auth,
  );
  text_with(
    w,
    "Encryption",
    &[("Version", "E002"), ("Algorithm", SHA256_ALGORITHM)],
    enc,
  );
  end(w, "BankPubKeyDigests");
}

fn btf_service(w: &mut W, svc: &BtfService) {
  start(w, "Service");
  text(w, "ServiceName", svc.name);
  text(w, "Scope", svc.scope);
  if let Some(container) = svc.container {
    start_with(w, "Container", &[("containerType", container)]);
    end(w, "Container");
  }
  text_with(w, "MsgName", &[("version", svc.version)], svc.message);
  end(w, "Service");
}

fn date_range(w: &mut W, range: Option<(NaiveDate, NaiveDate)>) {
  if let Some((from, to)) = range {
    start(w, "DateRange");
    text(w, "Start", &from.format("%Y-%m-%d").to_string());
    text(w, "End", &to.format("%Y-%m-%d").to_string());
    end(w, "DateRange");
  }
}

// ─── Transaction initialisation ──────────────────────────────────────────────

/// INIT request of a download transaction.
pub fn download_init(
  ctx: &RequestContext<'_>,
  order: DownloadOrder,
  range: Option<(NaiveDate, NaiveDate)>,
  nonce: &str,
  now: DateTime<Utc>,
) -> Vec<u8> {
  let mut w = new_writer();
  root(&mut w, ctx, "ebicsRequest");
  start_with(&mut w, "header", &[("authenticate", "true")]);
  start(&mut w, "static");
  text(&mut w, "HostID", ctx.host_id);
  text(&mut w, "Nonce", nonce);
  text(&mut w, "Timestamp", &timestamp(now));
  static_identity(&mut w, ctx);

  start(&mut w, "OrderDetails");
  match (ctx.dialect, order.btf()) {
    (EbicsDialect::H004, _) => {
      text(&mut w, "OrderType", order.order_type());
      text(&mut w, "OrderAttribute", "DZHNN");
      start(&mut w, "StandardOrderParams");
      date_range(&mut w, range);
      end(&mut w, "StandardOrderParams");
    }
    (EbicsDialect::H005, Some(svc)) => {
      text(&mut w, "AdminOrderType", "BTD");
      start(&mut w, "BTDOrderParams");
      btf_service(&mut w, &svc);
      date_range(&mut w, range);
      end(&mut w, "BTDOrderParams");
    }
    (EbicsDialect::H005, None) => {
      text(&mut w, "AdminOrderType", order.order_type());
    }
  }
  end(&mut w, "OrderDetails");

  bank_pub_key_digests(&mut w, ctx);
  text(&mut w, "SecurityMedium", SECURITY_MEDIUM);
  end(&mut w, "static");
  start(&mut w, "mutable");
  text(&mut w, "TransactionPhase", "Initialisation");
  end(&mut w, "mutable");
  end(&mut w, "header");
  raw(&mut w, AUTH_SIGNATURE_PLACEHOLDER);
  start(&mut w, "body");
  end(&mut w, "body");
  end(&mut w, "ebicsRequest");
  finish(w)
}

/// INIT request of an upload transaction. `order_id` is the client-assigned
/// id used with H004 banks; H005 banks assign their own.
pub fn upload_init(
  ctx: &RequestContext<'_>,
  order: UploadOrder,
  package: &UploadPackage,
  order_id: Option<&str>,
  nonce: &str,
  now: DateTime<Utc>,
) -> Vec<u8> {
  let mut w = new_writer();
  root(&mut w, ctx, "ebicsRequest");
  start_with(&mut w, "header", &[("authenticate", "true")]);
  start(&mut w, "static");
  text(&mut w, "HostID", ctx.host_id);
  text(&mut w, "Nonce", nonce);
  text(&mut w, "Timestamp", &timestamp(now));
  static_identity(&mut w, ctx);

  start(&mut w, "OrderDetails");
  match ctx.dialect {
    EbicsDialect::H004 => {
      text(&mut w, "OrderType", order.order_type());
      if let Some(id) = order_id {
        text(&mut w, "OrderID", id);
      }
      text(&mut w, "OrderAttribute", "OZHNN");
      empty(&mut w, "StandardOrderParams");
    }
    EbicsDialect::H005 => {
      text(&mut w, "AdminOrderType", "BTU");
      start(&mut w, "BTUOrderParams");
      btf_service(&mut w, &order.btf());
      end(&mut w, "BTUOrderParams");
    }
  }
  end(&mut w, "OrderDetails");

  bank_pub_key_digests(&mut w, ctx);
  text(&mut w, "SecurityMedium", SECURITY_MEDIUM);
  text(&mut w, "NumSegments", &package.segments.len().to_string());
  end(&mut w, "static");
  start(&mut w, "mutable");
  text(&mut w, "TransactionPhase", "Initialisation");
  end(&mut w, "mutable");
  end(&mut w, "header");
  raw(&mut w, AUTH_SIGNATURE_PLACEHOLDER);

  start(&mut w, "body");
  start(&mut w, "DataTransfer");
  start_with(&mut w, "DataEncryptionInfo", &[("authenticate", "true")]);
  text_with(
    &mut w,
    "EncryptionPubKeyDigest",
    &[("Version", "E002"), ("Algorithm", SHA256_ALGORITHM)],
    &b64_encode(&package.public_key_digest),
  );
  text(
    &mut w,
    "TransactionKey",
    &b64_encode(&package.encrypted_transaction_key),
  );
  end(&mut w, "DataEncryptionInfo");
  text_with(
    &mut w,
    "SignatureData",
    &[("authenticate", "true")],
    &package.signature_blob_b64,
  );
  end(&mut w, "DataTransfer");
  end(&mut w, "body");
  end(&mut w, "ebicsRequest");
  finish(w)
}

// ─── Transfer and receipt phases ─────────────────────────────────────────────

fn phase_request(
  ctx: &RequestContext<'_>,
  transaction_id: &str,
  write_mutable: impl FnOnce(&mut W),
  write_body: impl FnOnce(&mut W),
) -> Vec<u8> {
  let mut w = new_writer();
  root(&mut w, ctx, "ebicsRequest");
  start_with(&mut w, "header", &[("authenticate", "true")]);
  start(&mut w, "static");
  text(&mut w, "HostID", ctx.host_id);
  text(&mut w, "TransactionID", transaction_id);
  end(&mut w, "static");
  start(&mut w, "mutable");
  write_mutable(&mut w);
  end(&mut w, "mutable");
  end(&mut w, "header");
  raw(&mut w, AUTH_SIGNATURE_PLACEHOLDER);
  start(&mut w, "body");
  write_body(&mut w);
  end(&mut w, "body");
  end(&mut w, "ebicsRequest");
  finish(w)
}

/// TRANSFER request of a download: asks the bank for segment `number`.
pub fn download_transfer(
  ctx: &RequestContext<'_>,
  transaction_id: &str,
  number: u32,
  is_last: bool,
) -> Vec<u8> {
  phase_request(
    ctx,
    transaction_id,
    |w| {
      text(w, "TransactionPhase", "Transfer");
      text_with(
        w,
        "SegmentNumber",
        &[("lastSegment", if is_last { "true" } else { "false" })],
        &number.to_string(),
      );
    },
    |_| {},
  )
}

/// TRANSFER request of an upload: carries segment `number` (1-based).
pub fn upload_transfer(
  ctx: &RequestContext<'_>,
  transaction_id: &str,
  number: u32,
  is_last: bool,
  chunk_b64: &str,
) -> Vec<u8> {
  phase_request(
    ctx,
    transaction_id,
    |w| {
      text(w, "TransactionPhase", "Transfer");
      text_with(
        w,
        "SegmentNumber",
        &[("lastSegment", if is_last { "true" } else { "false" })],
        &number.to_string(),
      );
    },
    |w| {
      start(w, "DataTransfer");
      text(w, "OrderData", chunk_b64);
      end(w, "DataTransfer");
    },
  )
}

/// RECEIPT request closing a download; `receipt_code` 0 acknowledges
/// successful consumption of every segment.
pub fn download_receipt(
  ctx: &RequestContext<'_>,
  transaction_id: &str,
  receipt_code: u32,
) -> Vec<u8> {
  phase_request(
    ctx,
    transaction_id,
    |w| {
      text(w, "TransactionPhase", "Receipt");
    },
    |w| {
      start_with(w, "TransferReceipt", &[("authenticate", "true")]);
      text(w, "ReceiptCode", &receipt_code.to_string());
      end(w, "TransferReceipt");
    },
  )
}

// ─── Key management ──────────────────────────────────────────────────────────

fn unsecured_request(
  ctx: &RequestContext<'_>,
  order_type: &str,
  order_data_b64: &str,
) -> Vec<u8> {
  let mut w = new_writer();
  root(&mut w, ctx, "ebicsUnsecuredRequest");
  start_with(&mut w, "header", &[("authenticate", "true")]);
  start(&mut w, "static");
  text(&mut w, "HostID", ctx.host_id);
  static_identity(&mut w, ctx);
  start(&mut w, "OrderDetails");
  match ctx.dialect {
    EbicsDialect::H004 => {
      text(&mut w, "OrderType", order_type);
      text(&mut w, "OrderAttribute", "DZNNN");
    }
    EbicsDialect::H005 => {
      text(&mut w, "AdminOrderType", order_type);
    }
  }
  end(&mut w, "OrderDetails");
  text(&mut w, "SecurityMedium", SECURITY_MEDIUM);
  end(&mut w, "static");
  empty(&mut w, "mutable");
  end(&mut w, "header");
  start(&mut w, "body");
  start(&mut w, "DataTransfer");
  text(&mut w, "OrderData", order_data_b64);
  end(&mut w, "DataTransfer");
  end(&mut w, "body");
  end(&mut w, "ebicsUnsecuredRequest");
  finish(w)
}

/// INI: upload of the signing public key (unauthenticated envelope).
pub fn ini_request(ctx: &RequestContext<'_>, order_data_b64: &str) -> Vec<u8> {
  unsecured_request(ctx, "INI", order_data_b64)
}

/// HIA: upload of the authentication and encryption public keys.
pub fn hia_request(ctx: &RequestContext<'_>, order_data_b64: &str) -> Vec<u8> {
  unsecured_request(ctx, "HIA", order_data_b64)
}

/// HPB: download of the bank keys, signed but without bank-key digests.
pub fn hpb_request(
  ctx: &RequestContext<'_>,
  nonce: &str,
  now: DateTime<Utc>,
) -> Vec<u8> {
  let mut w = new_writer();
  root(&mut w, ctx, "ebicsNoPubKeyDigestsRequest");
  start_with(&mut w, "header", &[("authenticate", "true")]);
  start(&mut w, "static");
  text(&mut w, "HostID", ctx.host_id);
  text(&mut w, "Nonce", nonce);
  text(&mut w, "Timestamp", &timestamp(now));
  static_identity(&mut w, ctx);
  start(&mut w, "OrderDetails");
  match ctx.dialect {
    EbicsDialect::H004 => {
      text(&mut w, "OrderType", "HPB");
      text(&mut w, "OrderAttribute", "DZHNN");
    }
    EbicsDialect::H005 => {
      text(&mut w, "AdminOrderType", "HPB");
    }
  }
  end(&mut w, "OrderDetails");
  text(&mut w, "SecurityMedium", SECURITY_MEDIUM);
  end(&mut w, "static");
  empty(&mut w, "mutable");
  end(&mut w, "header");
  raw(&mut w, AUTH_SIGNATURE_PLACEHOLDER);
  start(&mut w, "body");
  end(&mut w, "body");
  end(&mut w, "ebicsNoPubKeyDigestsRequest");
  finish(w)
}

/// HEV: the version-discovery exchange, outside any EBICS schema version.
pub fn hev_request(host_id: &str) -> Vec<u8> {
  let mut w = new_writer();
  start_with(&mut w, "ebicsHEVRequest", &[("xmlns", NS_HEV)]);
  text(&mut w, "HostID", host_id);
  end(&mut w, "ebicsHEVRequest");
  finish(w)
}

// ─── Key-management order data ───────────────────────────────────────────────

fn rsa_key_value(w: &mut W, key: &RsaPublicKey) {
  let (modulus, exponent) = public_key_parts(key);
  start(w, "PubKeyValue");
  start(w, "ds:RSAKeyValue");
  text(w, "ds:Modulus", &b64_encode(&modulus));
  text(w, "ds:Exponent", &b64_encode(&exponent));
  end(w, "ds:RSAKeyValue");
  end(w, "PubKeyValue");
}

/// The plain (pre-DEFLATE, pre-base64) INI order data.
pub fn ini_order_data(
  ctx: &RequestContext<'_>,
  signature_key: &RsaPublicKey,
) -> Vec<u8> {
  let mut w = new_writer();
  start_with(&mut w, "SignaturePubKeyOrderData", &[
    ("xmlns", "http://www.ebics.org/S001"),
    ("xmlns:ds", NS_DS),
  ]);
  start(&mut w, "SignaturePubKeyInfo");
  rsa_key_value(&mut w, signature_key);
  text(&mut w, "SignatureVersion", "A006");
  end(&mut w, "SignaturePubKeyInfo");
  text(&mut w, "PartnerID", ctx.partner_id);
  text(&mut w, "UserID", ctx.user_id);
  end(&mut w, "SignaturePubKeyOrderData");
  finish(w)
}

/// The plain HIA order data: authentication plus encryption keys.
pub fn hia_order_data(
  ctx: &RequestContext<'_>,
  authentication_key: &RsaPublicKey,
  encryption_key: &RsaPublicKey,
) -> Vec<u8> {
  let mut w = new_writer();
  start_with(&mut w, "HIARequestOrderData", &[
    ("xmlns", ctx.namespace()),
    ("xmlns:ds", NS_DS),
  ]);
  start(&mut w, "AuthenticationPubKeyInfo");
  rsa_key_value(&mut w, authentication_key);
  text(&mut w, "AuthenticationVersion", "X002");
  end(&mut w, "AuthenticationPubKeyInfo");
  start(&mut w, "EncryptionPubKeyInfo");
  rsa_key_value(&mut w, encryption_key);
  text(&mut w, "EncryptionVersion", "E002");
  end(&mut w, "EncryptionPubKeyInfo");
  text(&mut w, "PartnerID", ctx.partner_id);
  text(&mut w, "UserID", ctx.user_id);
  end(&mut w, "HIARequestOrderData");
  finish(w)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn ctx(dialect: EbicsDialect) -> RequestContext<'static> {
    RequestContext {
      dialect,
      host_id: "HOST01",
      partner_id: "PARTNER1",
      user_id: "USER1",
      system_id: None,
      bank_auth_digest_b64: Some("QUJD".into()),
      bank_enc_digest_b64: Some("REVG".into()),
    }
  }

  fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
  }

  #[test]
  fn h004_download_init_carries_order_type_and_digests() {
    let xml = String::from_utf8(download_init(
      &ctx(EbicsDialect::H004),
      DownloadOrder::C53,
      None,
      "00FF",
      now(),
    ))
    .unwrap();
    assert!(xml.contains(r#"<ebicsRequest xmlns="urn:org:ebics:H004""#), "{xml}");
    assert!(xml.contains("<OrderType>C53</OrderType>"), "{xml}");
    assert!(xml.contains("<OrderAttribute>DZHNN</OrderAttribute>"));
    assert!(xml.contains("<Nonce>00FF</Nonce>"));
    assert!(xml.contains("<Timestamp>2024-05-01T10:00:00Z</Timestamp>"));
    assert!(xml.contains(r#"Version="X002""#) && xml.contains("QUJD"));
    assert!(xml.contains("<TransactionPhase>Initialisation</TransactionPhase>"));
    assert!(xml.contains("<AuthSignature/>"), "{xml}");
  }

  #[test]
  fn h004_download_init_with_range() {
    let from = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
    let to = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
    let xml = String::from_utf8(download_init(
      &ctx(EbicsDialect::H004),
      DownloadOrder::C52,
      Some((from, to)),
      "00",
      now(),
    ))
    .unwrap();
    assert!(xml.contains("<DateRange><Start>2024-04-01</Start><End>2024-05-01</End></DateRange>"), "{xml}");
  }

  #[test]
  fn h005_download_init_uses_btf() {
    let xml = String::from_utf8(download_init(
      &ctx(EbicsDialect::H005),
      DownloadOrder::C52,
      None,
      "00",
      now(),
    ))
    .unwrap();
    assert!(xml.contains(r#"xmlns="urn:org:ebics:H005""#), "{xml}");
    assert!(xml.contains("<AdminOrderType>BTD</AdminOrderType>"));
    assert!(xml.contains("<ServiceName>REP</ServiceName>"));
    assert!(xml.contains(r#"<MsgName version="08">camt.052</MsgName>"#));
    assert!(xml.contains(r#"<Container containerType="ZIP">"#), "{xml}");
  }

  #[test]
  fn admin_orders_carry_their_type_string() {
    for (order, tag) in [
      (DownloadOrder::Htd, "<OrderType>HTD</OrderType>"),
      (DownloadOrder::Hkd, "<OrderType>HKD</OrderType>"),
      (DownloadOrder::Haa, "<OrderType>HAA</OrderType>"),
    ] {
      let xml = String::from_utf8(download_init(
        &ctx(EbicsDialect::H004),
        order,
        None,
        "00",
        now(),
      ))
      .unwrap();
      assert!(xml.contains(tag), "{xml}");
    }
  }

  #[test]
  fn h005_admin_order_skips_btf() {
    let xml = String::from_utf8(download_init(
      &ctx(EbicsDialect::H005),
      DownloadOrder::Htd,
      None,
      "00",
      now(),
    ))
    .unwrap();
    assert!(xml.contains("<AdminOrderType>HTD</AdminOrderType>"), "{xml}");
    assert!(!xml.contains("BTDOrderParams"));
  }

  #[test]
  fn transfer_and_receipt_phases() {
    let c = ctx(EbicsDialect::H004);
    let transfer =
      String::from_utf8(download_transfer(&c, "TX1", 2, false)).unwrap();
    assert!(transfer.contains("<TransactionID>TX1</TransactionID>"));
    assert!(
      transfer.contains(r#"<SegmentNumber lastSegment="false">2</SegmentNumber>"#)
    );

    let receipt = String::from_utf8(download_receipt(&c, "TX1", 0)).unwrap();
    assert!(receipt.contains("<TransactionPhase>Receipt</TransactionPhase>"));
    assert!(receipt.contains(r#"<TransferReceipt authenticate="true">"#));
    assert!(receipt.contains("<ReceiptCode>0</ReceiptCode>"));
  }

  #[test]
  fn unsecured_requests_have_no_auth_signature() {
    let xml =
      String::from_utf8(ini_request(&ctx(EbicsDialect::H004), "QUJD")).unwrap();
    assert!(xml.contains("<ebicsUnsecuredRequest"), "{xml}");
    assert!(xml.contains("<OrderType>INI</OrderType>"));
    assert!(xml.contains("<OrderAttribute>DZNNN</OrderAttribute>"));
    assert!(xml.contains("<OrderData>QUJD</OrderData>"));
    assert!(!xml.contains("AuthSignature"));
  }

  #[test]
  fn hpb_request_is_signed_but_digest_free() {
    let xml = String::from_utf8(hpb_request(&ctx(EbicsDialect::H004), "AB", now()))
      .unwrap();
    assert!(xml.contains("<ebicsNoPubKeyDigestsRequest"), "{xml}");
    assert!(xml.contains("<OrderType>HPB</OrderType>"));
    assert!(xml.contains("<AuthSignature/>"));
    assert!(!xml.contains("BankPubKeyDigests"));
  }

  #[test]
  fn hev_request_uses_the_h000_namespace() {
    let xml = String::from_utf8(hev_request("HOST01")).unwrap();
    assert!(xml.contains(r#"xmlns="http://www.ebics.org/H000""#), "{xml}");
    assert!(xml.contains("<HostID>HOST01</HostID>"));
  }

  #[test]
  fn key_order_data_carries_modulus_and_exponent() {
    let private = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let public = rsa::RsaPublicKey::from(&private);
    let c = ctx(EbicsDialect::H004);

    let ini = String::from_utf8(ini_order_data(&c, &public)).unwrap();
    assert!(ini.contains("<SignaturePubKeyOrderData"), "{ini}");
    assert!(ini.contains("<SignatureVersion>A006</SignatureVersion>"));
    assert!(ini.contains("<ds:Modulus>") && ini.contains("<ds:Exponent>"));

    let hia = String::from_utf8(hia_order_data(&c, &public, &public)).unwrap();
    assert!(hia.contains("<AuthenticationVersion>X002</AuthenticationVersion>"));
    assert!(hia.contains("<EncryptionVersion>E002</EncryptionVersion>"));
    assert!(hia.contains("<PartnerID>PARTNER1</PartnerID>"));
  }
}
