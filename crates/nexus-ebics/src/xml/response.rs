//! Parsing of EBICS response documents.
//!
//! One event walker handles `ebicsResponse` and
//! `ebicsKeyManagementResponse`; dedicated helpers parse the HPB and HTD
//! order data and the HEV version list.

use quick_xml::{Reader, events::Event};
use rsa::RsaPublicKey;

use crate::{
  crypto::b64_decode,
  error::{Error, Result, TechnicalCode},
  keys::public_key_from_parts,
};

// ─── Response model ──────────────────────────────────────────────────────────

/// `DataEncryptionInfo` of a download INIT response.
#[derive(Debug, Clone)]
pub struct DataEncryptionInfo {
  /// Digest of the public key the bank encrypted the transaction key to —
  /// one of ours.
  pub public_key_digest:         Vec<u8>,
  pub encrypted_transaction_key: Vec<u8>,
}

/// The fields Nexus reads out of any EBICS response.
#[derive(Debug, Clone, Default)]
pub struct EbicsResponse {
  pub technical_code:   Option<TechnicalCode>,
  /// Human-readable `ReportText`.
  pub report_text:      Option<String>,
  pub business_code:    Option<TechnicalCode>,
  pub transaction_id:   Option<String>,
  pub order_id:         Option<String>,
  pub num_segments:     Option<u32>,
  pub segment_number:   Option<u32>,
  pub data_encryption_info: Option<DataEncryptionInfo>,
  /// Base64 order-data payload of this phase, still encrypted for
  /// transaction downloads, plain for key management.
  pub order_data_b64:   Option<String>,
}

impl EbicsResponse {
  /// The technical code, or a framing error when the bank sent none.
  pub fn technical(&self) -> Result<&TechnicalCode> {
    self
      .technical_code
      .as_ref()
      .ok_or_else(|| Error::Framing("response without technical ReturnCode".into()))
  }

  /// Fail unless the technical and business codes both allow proceeding.
  pub fn require_ok(&self) -> Result<()> {
    let technical = self.technical()?;
    if !technical.is_ok() {
      return Err(Error::bank(technical.clone(), self.report_text.clone()));
    }
    if let Some(business) = &self.business_code
      && !business.is_ok()
    {
      return Err(Error::bank(business.clone(), self.report_text.clone()));
    }
    Ok(())
  }
}

fn local_name(name: &[u8]) -> Vec<u8> {
  match name.iter().rposition(|&b| b == b':') {
    Some(pos) => name[pos + 1..].to_vec(),
    None => name.to_vec(),
  }
}

/// Parse an `ebicsResponse` or `ebicsKeyManagementResponse`.
///
/// The header `ReturnCode` is the technical code; a `ReturnCode` inside
/// `body` is the business code.
pub fn parse_response(xml: &[u8]) -> Result<EbicsResponse> {
  let mut reader = Reader::from_reader(xml);
  let mut buf = Vec::new();
  let mut path: Vec<Vec<u8>> = Vec::new();
  let mut out = EbicsResponse::default();
  let mut text = String::new();

  loop {
    match reader.read_event_into(&mut buf) {
      Ok(Event::Start(ref e)) => {
        path.push(local_name(e.name().as_ref()));
        text.clear();
      }
      Ok(Event::Empty(_)) => {}
      Ok(Event::Text(ref t)) => {
        text.push_str(&t.unescape().map_err(|e| Error::Framing(e.to_string()))?);
      }
      Ok(Event::End(_)) => {
        let element = path.pop().unwrap_or_default();
        let in_body = path.iter().any(|p| p == b"body");
        let value = text.trim().to_owned();
        text.clear();
        if value.is_empty() {
          continue;
        }
        match element.as_slice() {
          b"ReturnCode" if in_body => {
            out.business_code = Some(TechnicalCode::from_code(&value));
          }
          b"ReturnCode" => {
            // The header code wins; some banks repeat it.
            if out.technical_code.is_none() {
              out.technical_code = Some(TechnicalCode::from_code(&value));
            }
          }
          b"ReportText" => out.report_text = Some(value),
          b"TransactionID" => out.transaction_id = Some(value),
          b"OrderID" => out.order_id = Some(value),
          b"NumSegments" => {
            out.num_segments = Some(value.parse().map_err(|_| {
              Error::Framing(format!("bad NumSegments {value:?}"))
            })?);
          }
          b"SegmentNumber" => {
            out.segment_number = Some(value.parse().map_err(|_| {
              Error::Framing(format!("bad SegmentNumber {value:?}"))
            })?);
          }
          b"EncryptionPubKeyDigest" => {
            let info = out.data_encryption_info.get_or_insert_with(|| {
              DataEncryptionInfo {
                public_key_digest:         Vec::new(),
                encrypted_transaction_key: Vec::new(),
              }
            });
            info.public_key_digest = b64_decode(&value)?;
          }
          b"TransactionKey" => {
            let info = out.data_encryption_info.get_or_insert_with(|| {
              DataEncryptionInfo {
                public_key_digest:         Vec::new(),
                encrypted_transaction_key: Vec::new(),
              }
            });
            info.encrypted_transaction_key = b64_decode(&value)?;
          }
          b"OrderData" => out.order_data_b64 = Some(value),
          _ => {}
        }
      }
      Ok(Event::Eof) => break,
      Err(e) => return Err(Error::Framing(e.to_string())),
      _ => {}
    }
    buf.clear();
  }

  if out.technical_code.is_none() {
    return Err(Error::Framing("response without technical ReturnCode".into()));
  }
  Ok(out)
}

// ─── HPB order data ──────────────────────────────────────────────────────────

/// Parse `HPBResponseOrderData` into the bank's `(authentication,
/// encryption)` public keys.
pub fn parse_hpb_order_data(
  xml: &[u8],
) -> Result<(RsaPublicKey, RsaPublicKey)> {
  #[derive(Default)]
  struct KeyParts {
    modulus:  Option<Vec<u8>>,
    exponent: Option<Vec<u8>>,
  }

  let mut reader = Reader::from_reader(xml);
  let mut buf = Vec::new();
  let mut path: Vec<Vec<u8>> = Vec::new();
  let mut auth = KeyParts::default();
  let mut enc = KeyParts::default();
  let mut text = String::new();

  loop {
    match reader.read_event_into(&mut buf) {
      Ok(Event::Start(ref e)) => {
        path.push(local_name(e.name().as_ref()));
        text.clear();
      }
      Ok(Event::Text(ref t)) => {
        text.push_str(&t.unescape().map_err(|e| Error::Framing(e.to_string()))?);
      }
      Ok(Event::End(_)) => {
        let element = path.pop().unwrap_or_default();
        let value = text.trim().to_owned();
        text.clear();
        if value.is_empty() {
          continue;
        }
        let target = if path.iter().any(|p| p == b"AuthenticationPubKeyInfo") {
          Some(&mut auth)
        } else if path.iter().any(|p| p == b"EncryptionPubKeyInfo") {
          Some(&mut enc)
        } else {
          None
        };
        if let Some(parts) = target {
          match element.as_slice() {
            b"Modulus" => parts.modulus = Some(b64_decode(&value)?),
            b"Exponent" => parts.exponent = Some(b64_decode(&value)?),
            _ => {}
          }
        }
      }
      Ok(Event::Eof) => break,
      Err(e) => return Err(Error::Framing(e.to_string())),
      _ => {}
    }
    buf.clear();
  }

  let build = |parts: KeyParts, which: &str| {
    let modulus = parts
      .modulus
      .ok_or_else(|| Error::Framing(format!("HPB data missing {which} modulus")))?;
    let exponent = parts
      .exponent
      .ok_or_else(|| Error::Framing(format!("HPB data missing {which} exponent")))?;
    public_key_from_parts(&modulus, &exponent)
  };
  Ok((build(auth, "authentication")?, build(enc, "encryption")?))
}

// ─── HTD order data ──────────────────────────────────────────────────────────

/// One account the bank reports as reachable for the subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtdAccount {
  pub account_id:     String,
  pub account_holder: Option<String>,
  pub iban:           Option<String>,
  pub bank_code:      Option<String>,
  pub currency:       Option<String>,
}

/// Parse `HTDResponseOrderData` (or the HKD equivalent) into the offered
/// account list.
pub fn parse_htd_order_data(xml: &[u8]) -> Result<Vec<HtdAccount>> {
  let mut reader = Reader::from_reader(xml);
  let mut buf = Vec::new();
  let mut accounts: Vec<HtdAccount> = Vec::new();
  let mut current: Option<HtdAccount> = None;
  let mut element: Vec<u8> = Vec::new();
  let mut international = true;
  let mut text = String::new();

  loop {
    match reader.read_event_into(&mut buf) {
      Ok(Event::Start(ref e)) => {
        element = local_name(e.name().as_ref());
        text.clear();
        match element.as_slice() {
          b"AccountInfo" => {
            let mut account = HtdAccount {
              account_id:     String::new(),
              account_holder: None,
              iban:           None,
              bank_code:      None,
              currency:       None,
            };
            for attr in e.attributes().flatten() {
              match attr.key.as_ref() {
                b"ID" => {
                  account.account_id =
                    String::from_utf8_lossy(&attr.value).into_owned();
                }
                b"Currency" => {
                  account.currency =
                    Some(String::from_utf8_lossy(&attr.value).into_owned());
                }
                _ => {}
              }
            }
            current = Some(account);
          }
          b"AccountNumber" | b"BankCode" => {
            international = e.attributes().flatten().any(|a| {
              a.key.as_ref() == b"international" && a.value.as_ref() == b"true"
            });
          }
          _ => {}
        }
      }
      Ok(Event::Text(ref t)) => {
        text.push_str(&t.unescape().map_err(|e| Error::Framing(e.to_string()))?);
      }
      Ok(Event::End(ref e)) => {
        let closing = local_name(e.name().as_ref());
        let value = text.trim().to_owned();
        text.clear();
        if let Some(account) = current.as_mut()
          && !value.is_empty()
          && closing == element
        {
          match closing.as_slice() {
            // Only the international (IBAN/BIC) forms feed the ledger.
            b"AccountNumber" if international => account.iban = Some(value),
            b"BankCode" if international => account.bank_code = Some(value),
            b"AccountHolder" => account.account_holder = Some(value),
            _ => {}
          }
        }
        if closing == b"AccountInfo"
          && let Some(account) = current.take()
          && !account.account_id.is_empty()
        {
          accounts.push(account);
        }
      }
      Ok(Event::Eof) => break,
      Err(e) => return Err(Error::Framing(e.to_string())),
      _ => {}
    }
    buf.clear();
  }

  Ok(accounts)
}

// ─── HEV ─────────────────────────────────────────────────────────────────────

/// One supported version advertised through HEV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostVersion {
  /// Schema name, e.g. `H004`.
  pub protocol_version: String,
  /// Marketing version, e.g. `02.50`.
  pub version_number:   String,
}

/// Parse an `ebicsHEVResponse` into the supported protocol version list.
pub fn parse_hev_response(xml: &[u8]) -> Result<Vec<HostVersion>> {
  let mut reader = Reader::from_reader(xml);
  let mut buf = Vec::new();
  let mut versions = Vec::new();
  let mut protocol: Option<String> = None;
  let mut text = String::new();

  loop {
    match reader.read_event_into(&mut buf) {
      Ok(Event::Start(ref e))
        if local_name(e.name().as_ref()) == b"VersionNumber" =>
      {
        protocol = e.attributes().flatten().find_map(|a| {
          (a.key.as_ref() == b"ProtocolVersion")
            .then(|| String::from_utf8_lossy(&a.value).into_owned())
        });
        text.clear();
      }
      Ok(Event::Text(ref t)) if protocol.is_some() => {
        text.push_str(&t.unescape().map_err(|e| Error::Framing(e.to_string()))?);
      }
      Ok(Event::End(ref e))
        if local_name(e.name().as_ref()) == b"VersionNumber" =>
      {
        if let Some(protocol_version) = protocol.take() {
          versions.push(HostVersion {
            protocol_version,
            version_number: text.trim().to_owned(),
          });
        }
        text.clear();
      }
      Ok(Event::Eof) => break,
      Err(e) => return Err(Error::Framing(e.to_string())),
      _ => {}
    }
    buf.clear();
  }

  Ok(versions)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_a_download_init_response() {
    let xml = br#"<?xml version="1.0"?>
<ebicsResponse xmlns="urn:org:ebics:H004">
  <header authenticate="true">
    <static>
      <TransactionID>TX42</TransactionID>
      <NumSegments>2</NumSegments>
    </static>
    <mutable>
      <TransactionPhase>Initialisation</TransactionPhase>
      <SegmentNumber lastSegment="false">1</SegmentNumber>
      <ReturnCode>000000</ReturnCode>
      <ReportText>[EBICS_OK] OK</ReportText>
    </mutable>
  </header>
  <body>
    <DataTransfer>
      <DataEncryptionInfo authenticate="true">
        <EncryptionPubKeyDigest Version="E002" Algorithm="http://www.w3.org/2001/04/xmlenc#sha256">QUJD</EncryptionPubKeyDigest>
        <TransactionKey>REVG</TransactionKey>
      </DataEncryptionInfo>
      <OrderData>U0VHMQ==</OrderData>
    </DataTransfer>
    <ReturnCode authenticate="true">000000</ReturnCode>
  </body>
</ebicsResponse>"#;

    let resp = parse_response(xml).unwrap();
    assert_eq!(resp.technical_code, Some(TechnicalCode::Ok));
    assert_eq!(resp.business_code, Some(TechnicalCode::Ok));
    assert_eq!(resp.transaction_id.as_deref(), Some("TX42"));
    assert_eq!(resp.num_segments, Some(2));
    assert_eq!(resp.segment_number, Some(1));
    assert_eq!(resp.order_data_b64.as_deref(), Some("U0VHMQ=="));
    resp.require_ok().map_err(|e| panic!("{e}")).ok();
    let dei = resp.data_encryption_info.unwrap();
    assert_eq!(dei.public_key_digest, b"ABC");
    assert_eq!(dei.encrypted_transaction_key, b"DEF");
  }

  #[test]
  fn no_data_available_surfaces_the_code() {
    let xml = br#"<ebicsResponse xmlns="urn:org:ebics:H004">
  <header authenticate="true">
    <mutable>
      <ReturnCode>090005</ReturnCode>
      <ReportText>[EBICS_NO_DOWNLOAD_DATA_AVAILABLE]</ReportText>
    </mutable>
  </header>
  <body/>
</ebicsResponse>"#;
    let resp = parse_response(xml).unwrap();
    assert_eq!(
      resp.technical_code,
      Some(TechnicalCode::NoDownloadDataAvailable)
    );
    assert!(resp.require_ok().is_err());
  }

  #[test]
  fn business_error_in_body_fails_require_ok() {
    let xml = br#"<ebicsResponse>
  <header authenticate="true"><mutable><ReturnCode>000000</ReturnCode></mutable></header>
  <body><ReturnCode authenticate="true">091302</ReturnCode></body>
</ebicsResponse>"#;
    let resp = parse_response(xml).unwrap();
    let err = resp.require_ok().unwrap_err();
    assert_eq!(
      err.technical_code(),
      Some(&TechnicalCode::AccountAuthorisationFailed)
    );
  }

  #[test]
  fn missing_return_code_is_a_framing_error() {
    assert!(matches!(
      parse_response(b"<ebicsResponse><body/></ebicsResponse>"),
      Err(Error::Framing(_))
    ));
  }

  #[test]
  fn hpb_order_data_yields_two_keys() {
    let private = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let public = rsa::RsaPublicKey::from(&private);
    let (n, e) = crate::keys::public_key_parts(&public);
    let (n64, e64) = (
      crate::crypto::b64_encode(&n),
      crate::crypto::b64_encode(&e),
    );
    let xml = format!(
      r#"<HPBResponseOrderData xmlns="urn:org:ebics:H004">
  <AuthenticationPubKeyInfo>
    <PubKeyValue><ds:RSAKeyValue xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:Modulus>{n64}</ds:Modulus><ds:Exponent>{e64}</ds:Exponent></ds:RSAKeyValue></PubKeyValue>
    <AuthenticationVersion>X002</AuthenticationVersion>
  </AuthenticationPubKeyInfo>
  <EncryptionPubKeyInfo>
    <PubKeyValue><ds:RSAKeyValue xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:Modulus>{n64}</ds:Modulus><ds:Exponent>{e64}</ds:Exponent></ds:RSAKeyValue></PubKeyValue>
    <EncryptionVersion>E002</EncryptionVersion>
  </EncryptionPubKeyInfo>
  <HostID>HOST01</HostID>
</HPBResponseOrderData>"#
    );
    let (auth, enc) = parse_hpb_order_data(xml.as_bytes()).unwrap();
    assert_eq!(
      crate::keys::public_key_digest(&auth).unwrap(),
      crate::keys::public_key_digest(&public).unwrap()
    );
    assert_eq!(
      crate::keys::public_key_digest(&enc).unwrap(),
      crate::keys::public_key_digest(&public).unwrap()
    );
  }

  #[test]
  fn htd_order_data_lists_accounts() {
    let xml = br#"<HTDResponseOrderData xmlns="urn:org:ebics:H004">
  <PartnerInfo>
    <AccountInfo ID="acct-1" Currency="EUR">
      <AccountNumber international="true">DE89370400440532013000</AccountNumber>
      <BankCode international="true">SANDBOXX</BankCode>
      <AccountHolder>Foo Holder</AccountHolder>
    </AccountInfo>
    <AccountInfo ID="acct-2">
      <AccountNumber international="false">532013000</AccountNumber>
      <AccountHolder>Bar Holder</AccountHolder>
    </AccountInfo>
  </PartnerInfo>
  <UserInfo><UserID Status="1">USER1</UserID></UserInfo>
</HTDResponseOrderData>"#;

    let accounts = parse_htd_order_data(xml).unwrap();
    assert_eq!(accounts.len(), 2);
    assert_eq!(accounts[0].account_id, "acct-1");
    assert_eq!(accounts[0].iban.as_deref(), Some("DE89370400440532013000"));
    assert_eq!(accounts[0].bank_code.as_deref(), Some("SANDBOXX"));
    assert_eq!(accounts[0].currency.as_deref(), Some("EUR"));
    assert_eq!(accounts[1].iban, None, "national number must not become IBAN");
    assert_eq!(accounts[1].account_holder.as_deref(), Some("Bar Holder"));
  }

  #[test]
  fn hev_versions() {
    let xml = br#"<ebicsHEVResponse xmlns="http://www.ebics.org/H000">
  <SystemReturnCode><ReturnCode>000000</ReturnCode></SystemReturnCode>
  <VersionNumber ProtocolVersion="H004">02.50</VersionNumber>
  <VersionNumber ProtocolVersion="H005">03.00</VersionNumber>
</ebicsHEVResponse>"#;
    let versions = parse_hev_response(xml).unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].protocol_version, "H004");
    assert_eq!(versions[0].version_number, "02.50");
    assert_eq!(versions[1].protocol_version, "H005");
  }
}
