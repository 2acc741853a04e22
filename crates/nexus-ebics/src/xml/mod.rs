//! EBICS XML: canonicalization of the signed scope, `ds:Signature`
//! embedding, and verification of bank signatures.
//!
//! Request documents are built with `quick-xml`'s writer
//! ([`request`]) and parsed with a hand-written event walker
//! ([`response`]), the same split used for every other XML surface in this
//! workspace.
//!
//! The signed scope of an EBICS document is the set of elements carrying
//! `@authenticate="true"`, in document order. Both sides serialise that
//! scope canonically (exclusive C14N without comments); since all documents
//! involved are namespace-flat and generated without insignificant
//! whitespace, canonical serialisation here means: empty elements expanded,
//! attributes sorted by name, text re-escaped, comments dropped.

pub mod request;
pub mod response;

use std::io::Cursor;

use quick_xml::{
  Reader, Writer,
  events::{BytesEnd, BytesStart, BytesText, Event},
};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::{
  crypto::{b64_decode, b64_encode},
  error::{Error, Result},
};

pub const NS_H004: &str = "urn:org:ebics:H004";
pub const NS_H005: &str = "urn:org:ebics:H005";
pub const NS_HEV: &str = "http://www.ebics.org/H000";
pub const NS_DS: &str = "http://www.w3.org/2000/09/xmldsig#";

/// Placeholder the request builders leave where the signature goes.
pub(crate) const AUTH_SIGNATURE_PLACEHOLDER: &str = "<AuthSignature/>";

// ─── Canonicalization ────────────────────────────────────────────────────────

fn local_name(name: &[u8]) -> &[u8] {
  match name.iter().rposition(|&b| b == b':') {
    Some(pos) => &name[pos + 1..],
    None => name,
  }
}

fn has_authenticate_attr(e: &BytesStart<'_>) -> bool {
  e.attributes().flatten().any(|a| {
    a.key.as_ref() == b"authenticate" && a.value.as_ref() == b"true"
  })
}

/// Re-emit one start tag canonically: attributes sorted by name.
fn emit_canonical_start(
  w: &mut Writer<Cursor<Vec<u8>>>,
  e: &BytesStart<'_>,
) -> Result<()> {
  let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
  let mut attrs: Vec<(String, String)> = e
    .attributes()
    .map(|a| {
      let a = a.map_err(|err| Error::Framing(err.to_string()))?;
      Ok((
        String::from_utf8_lossy(a.key.as_ref()).into_owned(),
        a.unescape_value()
          .map_err(|err| Error::Framing(err.to_string()))?
          .into_owned(),
      ))
    })
    .collect::<Result<_>>()?;
  attrs.sort();

  let mut start = BytesStart::new(name);
  for (k, v) in &attrs {
    start.push_attribute((k.as_str(), v.as_str()));
  }
  w.write_event(Event::Start(start))
    .map_err(|err| Error::Framing(err.to_string()))?;
  Ok(())
}

/// Canonical serialisation of every subtree matched by `select`, in
/// document order, concatenated.
fn canonicalize_matching(
  xml: &[u8],
  select: impl Fn(&BytesStart<'_>) -> bool,
) -> Result<Vec<u8>> {
  let mut reader = Reader::from_reader(xml);
  let mut writer = Writer::new(Cursor::new(Vec::new()));
  let mut buf = Vec::new();
  // Depth within a selected subtree; 0 = outside.
  let mut capture_depth = 0usize;

  loop {
    match reader.read_event_into(&mut buf) {
      Ok(Event::Start(ref e)) => {
        if capture_depth > 0 || select(e) {
          emit_canonical_start(&mut writer, e)?;
          capture_depth += 1;
        }
      }
      Ok(Event::Empty(ref e)) => {
        if capture_depth > 0 || select(e) {
          // C14N expands empty elements.
          emit_canonical_start(&mut writer, e)?;
          let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
          writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(|err| Error::Framing(err.to_string()))?;
        }
      }
      Ok(Event::End(ref e)) => {
        if capture_depth > 0 {
          let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
          writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(|err| Error::Framing(err.to_string()))?;
          capture_depth -= 1;
        }
      }
      Ok(Event::Text(ref t)) => {
        if capture_depth > 0 {
          let text = t
            .unescape()
            .map_err(|err| Error::Framing(err.to_string()))?;
          writer
            .write_event(Event::Text(BytesText::new(&text)))
            .map_err(|err| Error::Framing(err.to_string()))?;
        }
      }
      Ok(Event::CData(ref t)) => {
        if capture_depth > 0 {
          let text = String::from_utf8_lossy(t.as_ref()).into_owned();
          writer
            .write_event(Event::Text(BytesText::new(&text)))
            .map_err(|err| Error::Framing(err.to_string()))?;
        }
      }
      // Comments, PIs and the declaration are outside the canonical form.
      Ok(Event::Comment(_) | Event::PI(_) | Event::Decl(_) | Event::DocType(_)) => {}
      Ok(Event::Eof) => break,
      Err(e) => return Err(Error::Framing(e.to_string())),
      _ => {}
    }
    buf.clear();
  }

  Ok(writer.into_inner().into_inner())
}

/// Canonical bytes of all `@authenticate="true"` subtrees.
pub fn canonicalize_authenticated(xml: &[u8]) -> Result<Vec<u8>> {
  canonicalize_matching(xml, has_authenticate_attr)
}

fn canonicalize_signed_info(xml: &[u8]) -> Result<Vec<u8>> {
  canonicalize_matching(xml, |e| local_name(e.name().as_ref()) == b"SignedInfo")
}

// ─── Signing ─────────────────────────────────────────────────────────────────

fn signed_info_xml(digest_b64: &str) -> String {
  // Built canonically by hand: attributes sorted, no whitespace, and the
  // apostrophes in the xpointer escaped exactly as the canonical
  // re-serialisation escapes them.
  format!(
    concat!(
      "<ds:SignedInfo xmlns:ds=\"{ns}\">",
      "<ds:CanonicalizationMethod Algorithm=\"http://www.w3.org/TR/2001/REC-xml-c14n-20010315\"></ds:CanonicalizationMethod>",
      "<ds:SignatureMethod Algorithm=\"http://www.w3.org/2001/04/xmldsig-more#rsa-sha256\"></ds:SignatureMethod>",
      "<ds:Reference URI=\"#xpointer(//*[@authenticate=&apos;true&apos;])\">",
      "<ds:Transforms>",
      "<ds:Transform Algorithm=\"http://www.w3.org/TR/2001/REC-xml-c14n-20010315\"></ds:Transform>",
      "</ds:Transforms>",
      "<ds:DigestMethod Algorithm=\"http://www.w3.org/2001/04/xmlenc#sha256\"></ds:DigestMethod>",
      "<ds:DigestValue>{digest}</ds:DigestValue>",
      "</ds:Reference>",
      "</ds:SignedInfo>",
    ),
    ns = NS_DS,
    digest = digest_b64,
  )
}

/// Sign `xml` (which must contain the `<AuthSignature/>` placeholder) with
/// the subscriber's authentication key and return the completed document.
pub fn sign_document(
  xml: &[u8],
  authentication_key: &RsaPrivateKey,
) -> Result<Vec<u8>> {
  let digest = Sha256::digest(canonicalize_authenticated(xml)?);
  let signed_info = signed_info_xml(&b64_encode(&digest));

  let signature = authentication_key
    .sign(
      Pkcs1v15Sign::new::<Sha256>(),
      &Sha256::digest(signed_info.as_bytes()),
    )
    .map_err(|e| Error::CryptoFailure(e.to_string()))?;

  let auth_signature = format!(
    "<AuthSignature>{signed_info}<ds:SignatureValue xmlns:ds=\"{NS_DS}\">{}</ds:SignatureValue></AuthSignature>",
    b64_encode(&signature),
  );

  let document = String::from_utf8(xml.to_vec())
    .map_err(|e| Error::Framing(e.to_string()))?;
  if !document.contains(AUTH_SIGNATURE_PLACEHOLDER) {
    return Err(Error::Framing("no AuthSignature placeholder".into()));
  }
  Ok(
    document
      .replacen(AUTH_SIGNATURE_PLACEHOLDER, &auth_signature, 1)
      .into_bytes(),
  )
}

// ─── Verification ────────────────────────────────────────────────────────────

/// Verify a signed EBICS document against the bank's authentication key:
/// the digest over the authenticated scope must match `ds:DigestValue`, and
/// `ds:SignatureValue` must verify over the canonical `ds:SignedInfo`.
pub fn verify_document(
  xml: &[u8],
  bank_authentication_key: &RsaPublicKey,
) -> Result<()> {
  let digest_value = extract_text(xml, b"DigestValue")?
    .ok_or_else(|| Error::Framing("missing ds:DigestValue".into()))?;
  let signature_value = extract_text(xml, b"SignatureValue")?
    .ok_or_else(|| Error::Framing("missing ds:SignatureValue".into()))?;

  let expected = Sha256::digest(canonicalize_authenticated(xml)?);
  if b64_decode(&digest_value)? != expected.as_slice() {
    return Err(Error::BadSignature);
  }

  let signed_info = canonicalize_signed_info(xml)?;
  bank_authentication_key
    .verify(
      Pkcs1v15Sign::new::<Sha256>(),
      &Sha256::digest(&signed_info),
      &b64_decode(&signature_value)?,
    )
    .map_err(|_| Error::BadSignature)
}

/// Text content of the first element with local name `tag`, if present.
pub(crate) fn extract_text(xml: &[u8], tag: &[u8]) -> Result<Option<String>> {
  let mut reader = Reader::from_reader(xml);
  let mut buf = Vec::new();
  let mut inside = false;
  let mut value = String::new();

  loop {
    match reader.read_event_into(&mut buf) {
      Ok(Event::Start(ref e)) if local_name(e.name().as_ref()) == tag => {
        inside = true;
      }
      Ok(Event::Text(ref t)) if inside => {
        value.push_str(
          &t.unescape().map_err(|e| Error::Framing(e.to_string()))?,
        );
      }
      Ok(Event::End(ref e)) if local_name(e.name().as_ref()) == tag => {
        return Ok(Some(value));
      }
      Ok(Event::Eof) => return Ok(None),
      Err(e) => return Err(Error::Framing(e.to_string())),
      _ => {}
    }
    buf.clear();
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  fn keypair() -> (RsaPrivateKey, RsaPublicKey) {
    let private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let public = RsaPublicKey::from(&private);
    (private, public)
  }

  #[test]
  fn canonicalization_selects_authenticated_subtrees_only() {
    let xml = br#"<doc><header authenticate="true" b="2" a="1"><x/>hi</header><skip>no</skip></doc>"#;
    let canonical = canonicalize_authenticated(xml).unwrap();
    let s = String::from_utf8(canonical).unwrap();
    assert_eq!(
      s,
      r#"<header a="1" authenticate="true" b="2"><x></x>hi</header>"#
    );
  }

  #[test]
  fn canonicalization_drops_comments_and_is_stable() {
    let a = br#"<d><h authenticate="true"><!-- c -->v</h></d>"#;
    let b = br#"<d><h authenticate="true">v</h></d>"#;
    assert_eq!(
      canonicalize_authenticated(a).unwrap(),
      canonicalize_authenticated(b).unwrap()
    );
  }

  #[test]
  fn sign_then_verify_round_trips() {
    let (private, public) = keypair();
    let unsigned = br#"<ebicsRequest><header authenticate="true"><static>S</static></header><AuthSignature/><body></body></ebicsRequest>"#;
    let signed = sign_document(unsigned, &private).unwrap();
    verify_document(&signed, &public).unwrap();
  }

  #[test]
  fn tampering_breaks_verification() {
    let (private, public) = keypair();
    let unsigned = br#"<r><header authenticate="true">payload</header><AuthSignature/></r>"#;
    let signed =
      String::from_utf8(sign_document(unsigned, &private).unwrap()).unwrap();
    let tampered = signed.replace("payload", "PAYLOAD");
    assert!(matches!(
      verify_document(tampered.as_bytes(), &public),
      Err(Error::BadSignature)
    ));
  }

  #[test]
  fn wrong_key_breaks_verification() {
    let (private, _) = keypair();
    let (_, other_public) = keypair();
    let unsigned =
      br#"<r><header authenticate="true">x</header><AuthSignature/></r>"#;
    let signed = sign_document(unsigned, &private).unwrap();
    assert!(matches!(
      verify_document(&signed, &other_public),
      Err(Error::BadSignature)
    ));
  }

  #[test]
  fn missing_placeholder_is_a_framing_error() {
    let (private, _) = keypair();
    let err = sign_document(b"<r></r>", &private).unwrap_err();
    assert!(matches!(err, Error::Framing(_)), "{err}");
  }
}
