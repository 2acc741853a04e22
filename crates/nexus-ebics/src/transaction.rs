//! Per-transaction data handling: building the encrypted upload package and
//! reassembling downloaded segments.
//!
//! The phase orchestration itself (INIT → TRANSFER × N → RECEIPT) lives in
//! [`crate::client`]; everything here is pure and unit-testable.

use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::{
  crypto::{
    TransactionKey, b64_decode, b64_encode, deflate, inflate, sign_a006,
  },
  error::{Error, Result},
  keys::{SubscriberKeys, public_key_digest},
  xml::response::DataEncryptionInfo,
};

/// Segment size of upload order data: 4096 base64 characters.
pub const SEGMENT_SIZE: usize = 4096;

// ─── Upload ──────────────────────────────────────────────────────────────────

/// Everything an upload INIT and its transfer phases need.
pub struct UploadPackage {
  /// The transaction key, RSA-wrapped for the bank.
  pub encrypted_transaction_key: Vec<u8>,
  /// Digest of the bank encryption key the transaction key is wrapped for.
  pub public_key_digest: [u8; 32],
  /// E002-encrypted `UserSignatureData`, base64.
  pub signature_blob_b64: String,
  /// Base64 chunks of the deflated, encrypted payload. `chunk_b64(i)` is
  /// 0-based internally; the wire segment number is `i + 1`.
  pub segments: Vec<String>,
}

/// The `UserSignatureData` document wrapping one A006 signature.
fn user_signature_data(
  partner_id: &str,
  user_id: &str,
  signature: &[u8],
) -> String {
  format!(
    concat!(
      "<?xml version=\"1.0\" encoding=\"UTF-8\"?>",
      "<UserSignatureData xmlns=\"http://www.ebics.org/S001\">",
      "<OrderSignatureData>",
      "<SignatureVersion>A006</SignatureVersion>",
      "<SignatureValue>{sig}</SignatureValue>",
      "<PartnerID>{partner}</PartnerID>",
      "<UserID>{user}</UserID>",
      "</OrderSignatureData>",
      "</UserSignatureData>",
    ),
    sig = b64_encode(signature),
    partner = partner_id,
    user = user_id,
  )
}

/// Prepare an order payload for upload:
///
/// 1. A006-sign the plain payload with the subscriber's signing key and wrap
///    the signature in `UserSignatureData`.
/// 2. Generate one transaction key; E002-encrypt the (deflated) signature
///    blob and the (deflated) payload under that same key.
/// 3. Base64 the encrypted payload and split it into wire segments.
pub fn prepare_upload(
  payload: &[u8],
  keys: &SubscriberKeys,
  partner_id: &str,
  user_id: &str,
  bank_encryption_key: &RsaPublicKey,
) -> Result<UploadPackage> {
  let signature = sign_a006(&keys.signature, payload)?;
  let signature_doc = user_signature_data(partner_id, user_id, &signature);

  let key = TransactionKey::generate();
  let signature_blob = key.encrypt(&deflate(signature_doc.as_bytes())?);
  let payload_cipher = key.encrypt(&deflate(payload)?);

  let payload_b64 = b64_encode(&payload_cipher);
  let segments = payload_b64
    .as_bytes()
    .chunks(SEGMENT_SIZE)
    // Chunk boundaries fall on 4-char base64 units, so each piece is
    // itself valid base64.
    .map(|c| String::from_utf8_lossy(c).into_owned())
    .collect();

  Ok(UploadPackage {
    encrypted_transaction_key: key.wrap_for(bank_encryption_key)?,
    public_key_digest: public_key_digest(bank_encryption_key)?,
    signature_blob_b64: b64_encode(&signature_blob),
    segments,
  })
}

// ─── Download ────────────────────────────────────────────────────────────────

/// Select the private key matching the digest the bank encrypted to.
///
/// Encryption operations always use the encryption key; the authentication
/// key is only consulted because some hosts historically encrypted to it.
pub fn select_decryption_key<'a>(
  keys: &'a SubscriberKeys,
  bank_digest: &[u8],
) -> Result<&'a RsaPrivateKey> {
  let enc_digest = public_key_digest(&RsaPublicKey::from(&keys.encryption))?;
  if bank_digest == enc_digest {
    return Ok(&keys.encryption);
  }
  let auth_digest = public_key_digest(&RsaPublicKey::from(&keys.authentication))?;
  if bank_digest == auth_digest {
    return Ok(&keys.authentication);
  }
  Err(Error::CryptoFailure(
    "bank public-key digest matches none of our keys".into(),
  ))
}

/// Reassemble a download: decode every base64 segment in bank order,
/// concatenate, decrypt with the key selected by the bank's digest, inflate.
pub fn assemble_download(
  segments_b64: &[String],
  info: &DataEncryptionInfo,
  keys: &SubscriberKeys,
) -> Result<Vec<u8>> {
  let mut ciphertext = Vec::new();
  for segment in segments_b64 {
    ciphertext.extend(b64_decode(segment)?);
  }

  let private = select_decryption_key(keys, &info.public_key_digest)?;
  let key =
    TransactionKey::unwrap_with(private, &info.encrypted_transaction_key)?;
  let compressed = key
    .decrypt(&ciphertext)
    .map_err(|e| Error::PostProcess(e.to_string()))?;
  inflate(&compressed)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use crate::crypto::verify_a006;

  use super::*;

  fn keys() -> SubscriberKeys {
    let mut rng = rand::thread_rng();
    SubscriberKeys {
      signature:      RsaPrivateKey::new(&mut rng, 1024).unwrap(),
      authentication: RsaPrivateKey::new(&mut rng, 1024).unwrap(),
      encryption:     RsaPrivateKey::new(&mut rng, 1024).unwrap(),
    }
  }

  #[test]
  fn upload_package_round_trips_through_the_bank_side() {
    let subscriber = keys();
    // The "bank" has its own encryption key pair.
    let bank_private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let bank_public = RsaPublicKey::from(&bank_private);

    let payload = b"<Document>pain.001 goes here</Document>".repeat(200);
    let package =
      prepare_upload(&payload, &subscriber, "PARTNER1", "USER1", &bank_public)
        .unwrap();

    assert!(package.segments.len() > 1, "payload should need segmenting");
    assert!(package.segments.iter().all(|s| s.len() <= SEGMENT_SIZE));

    // Bank side: unwrap the key, reassemble the payload, check the A006
    // signature transported in the signature blob.
    let key = TransactionKey::unwrap_with(
      &bank_private,
      &package.encrypted_transaction_key,
    )
    .unwrap();

    let mut ciphertext = Vec::new();
    for segment in &package.segments {
      ciphertext.extend(b64_decode(segment).unwrap());
    }
    let recovered = inflate(&key.decrypt(&ciphertext).unwrap()).unwrap();
    assert_eq!(recovered, payload);

    let sig_doc = inflate(
      &key
        .decrypt(&b64_decode(&package.signature_blob_b64).unwrap())
        .unwrap(),
    )
    .unwrap();
    let sig_doc = String::from_utf8(sig_doc).unwrap();
    assert!(sig_doc.contains("<SignatureVersion>A006</SignatureVersion>"));
    assert!(sig_doc.contains("<PartnerID>PARTNER1</PartnerID>"));

    let sig_b64 = {
      let from = sig_doc.find("<SignatureValue>").unwrap() + 16;
      let to = sig_doc.find("</SignatureValue>").unwrap();
      &sig_doc[from..to]
    };
    verify_a006(
      &RsaPublicKey::from(&subscriber.signature),
      &payload,
      &b64_decode(sig_b64).unwrap(),
    )
    .unwrap();
  }

  #[test]
  fn download_assembly_inverts_the_bank_encryption() {
    let subscriber = keys();
    let order_data = b"<Document>camt.053</Document>".repeat(100);

    // Bank side: deflate, encrypt to our encryption key, segment.
    let key = TransactionKey::generate();
    let ciphertext = key.encrypt(&deflate(&order_data).unwrap());
    let b64 = b64_encode(&ciphertext);
    let segments: Vec<String> = b64
      .as_bytes()
      .chunks(1024)
      .map(|c| String::from_utf8_lossy(c).into_owned())
      .collect();
    let enc_public = RsaPublicKey::from(&subscriber.encryption);
    let info = DataEncryptionInfo {
      public_key_digest:         public_key_digest(&enc_public)
        .unwrap()
        .to_vec(),
      encrypted_transaction_key: key.wrap_for(&enc_public).unwrap(),
    };

    let recovered = assemble_download(&segments, &info, &subscriber).unwrap();
    assert_eq!(recovered, order_data);
  }

  #[test]
  fn unknown_key_digest_is_rejected() {
    let subscriber = keys();
    let info = DataEncryptionInfo {
      public_key_digest:         vec![0u8; 32],
      encrypted_transaction_key: vec![],
    };
    assert!(matches!(
      assemble_download(&["QQ==".into()], &info, &subscriber),
      Err(Error::CryptoFailure(_))
    ));
  }

  #[test]
  fn auth_key_digest_selects_the_auth_key() {
    let subscriber = keys();
    let auth_public = RsaPublicKey::from(&subscriber.authentication);
    let digest = public_key_digest(&auth_public).unwrap();
    let selected = select_decryption_key(&subscriber, &digest).unwrap();
    assert_eq!(selected, &subscriber.authentication);
  }
}
