//! EBICS cryptographic primitives: A006 signatures, E002 hybrid encryption,
//! and the raw-DEFLATE compression applied to order data.

use aes::Aes128;
use aes::cipher::{BlockModeDecrypt, BlockModeEncrypt, KeyIvInit, block_padding::Pkcs7};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use flate2::{
  Compression, read::DeflateDecoder, write::DeflateEncoder,
};
use rand::RngCore;
use rsa::{Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::{
  error::{Error, Result},
  keys::public_key_digest,
};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

// ─── A006 ────────────────────────────────────────────────────────────────────

/// The A006 digest of order data: line endings normalised to LF (every CR
/// stripped), then SHA-256 over the result. Computed over the plain order
/// data, before compression.
pub fn digest_order_data(order_data: &[u8]) -> [u8; 32] {
  let mut hasher = Sha256::new();
  // Filter in chunks rather than allocating a CR-free copy.
  for chunk in order_data.split(|&b| b == b'\r') {
    hasher.update(chunk);
  }
  hasher.finalize().into()
}

/// RSA-PKCS#1-v1.5 signature over the A006 digest.
pub fn sign_a006(
  signature_key: &RsaPrivateKey,
  order_data: &[u8],
) -> Result<Vec<u8>> {
  signature_key
    .sign(Pkcs1v15Sign::new::<Sha256>(), &digest_order_data(order_data))
    .map_err(|e| Error::CryptoFailure(e.to_string()))
}

pub fn verify_a006(
  signature_key: &RsaPublicKey,
  order_data: &[u8],
  signature: &[u8],
) -> Result<()> {
  signature_key
    .verify(
      Pkcs1v15Sign::new::<Sha256>(),
      &digest_order_data(order_data),
      signature,
    )
    .map_err(|_| Error::BadSignature)
}

// ─── E002 ────────────────────────────────────────────────────────────────────

/// A per-transaction AES-128 key. One key protects both the user-signature
/// blob and the payload of an upload, so the key outlives a single
/// `encrypt` call.
#[derive(Clone)]
pub struct TransactionKey([u8; 16]);

impl TransactionKey {
  pub fn generate() -> Self {
    let mut key = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut key);
    Self(key)
  }

  pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
    let key: [u8; 16] = bytes
      .try_into()
      .map_err(|_| Error::CryptoFailure("transaction key must be 16 bytes".into()))?;
    Ok(Self(key))
  }

  /// AES-128-CBC with an all-zero IV, PKCS#7 padding.
  pub fn encrypt(&self, plain: &[u8]) -> Vec<u8> {
    Aes128CbcEnc::new(&self.0.into(), &[0u8; 16].into())
      .encrypt_padded_vec::<Pkcs7>(plain)
  }

  pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
    Aes128CbcDec::new(&self.0.into(), &[0u8; 16].into())
      .decrypt_padded_vec::<Pkcs7>(ciphertext)
      .map_err(|e| Error::CryptoFailure(format!("AES unpadding: {e}")))
  }

  /// RSA-encrypt the key to the bank's encryption public key.
  pub fn wrap_for(&self, bank_encryption_key: &RsaPublicKey) -> Result<Vec<u8>> {
    bank_encryption_key
      .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, &self.0)
      .map_err(|e| Error::CryptoFailure(e.to_string()))
  }

  /// Recover a wrapped key with our encryption private key.
  pub fn unwrap_with(
    encryption_key: &RsaPrivateKey,
    wrapped: &[u8],
  ) -> Result<Self> {
    let bytes = encryption_key
      .decrypt(Pkcs1v15Encrypt, wrapped)
      .map_err(|e| Error::CryptoFailure(e.to_string()))?;
    Self::from_bytes(&bytes)
  }
}

/// The product of E002 encryption, ready for `DataEncryptionInfo`.
pub struct E002Cipher {
  pub encrypted_transaction_key: Vec<u8>,
  /// SHA-256 of the recipient public key's SPKI DER.
  pub public_key_digest: [u8; 32],
  pub ciphertext: Vec<u8>,
}

/// One-shot E002: fresh transaction key, AES-CBC ciphertext, wrapped key.
pub fn encrypt_e002(
  plain: &[u8],
  bank_encryption_key: &RsaPublicKey,
) -> Result<(E002Cipher, TransactionKey)> {
  let key = TransactionKey::generate();
  let cipher = E002Cipher {
    encrypted_transaction_key: key.wrap_for(bank_encryption_key)?,
    public_key_digest: public_key_digest(bank_encryption_key)?,
    ciphertext: key.encrypt(plain),
  };
  Ok((cipher, key))
}

/// Inverse of [`encrypt_e002`]. The caller selects `encryption_key` by
/// matching the digest the bank sent against our own public-key digests.
pub fn decrypt_e002(
  ciphertext: &[u8],
  encrypted_transaction_key: &[u8],
  encryption_key: &RsaPrivateKey,
) -> Result<Vec<u8>> {
  let key = TransactionKey::unwrap_with(encryption_key, encrypted_transaction_key)?;
  key.decrypt(ciphertext)
}

// ─── DEFLATE ─────────────────────────────────────────────────────────────────

/// Raw RFC 1951 DEFLATE (no gzip or zlib framing), as EBICS applies to
/// order data before encryption.
pub fn deflate(data: &[u8]) -> Result<Vec<u8>> {
  use std::io::Write as _;
  let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
  encoder
    .write_all(data)
    .and_then(|_| encoder.finish())
    .map_err(|e| Error::CryptoFailure(format!("deflate: {e}")))
}

pub fn inflate(data: &[u8]) -> Result<Vec<u8>> {
  use std::io::Read as _;
  let mut out = Vec::new();
  DeflateDecoder::new(data)
    .read_to_end(&mut out)
    .map(|_| out)
    .map_err(|e| Error::PostProcess(format!("inflate: {e}")))
}

// ─── Nonce ───────────────────────────────────────────────────────────────────

/// A fresh 128-bit nonce, upper-hex as EBICS headers carry it.
pub fn nonce() -> String {
  let mut bytes = [0u8; 16];
  rand::thread_rng().fill_bytes(&mut bytes);
  hex::encode_upper(bytes)
}

/// Base64 as used throughout the protocol for binary fields.
pub fn b64_encode(data: &[u8]) -> String { B64.encode(data) }

pub fn b64_decode(data: &str) -> Result<Vec<u8>> {
  // Banks are liberal with whitespace inside base64 blobs.
  let compact: String = data.chars().filter(|c| !c.is_whitespace()).collect();
  B64
    .decode(compact)
    .map_err(|e| Error::Framing(format!("invalid base64: {e}")))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
