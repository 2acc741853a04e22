//! RSA key material for an EBICS subscriber and its bank.
//!
//! Private keys travel as PKCS#8 DER (the form the store persists), bank
//! public keys as SubjectPublicKeyInfo DER. Key digests are SHA-256 over the
//! SPKI encoding; their hex form is what the operator confirms out-of-band
//! after HPB.

use rsa::{
  BigUint, RsaPrivateKey, RsaPublicKey,
  pkcs8::{
    DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey,
  },
  traits::PublicKeyParts,
};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

pub const KEY_BITS: usize = 2048;

/// The subscriber's three private keys.
#[derive(Clone)]
pub struct SubscriberKeys {
  pub signature:      RsaPrivateKey,
  pub authentication: RsaPrivateKey,
  pub encryption:     RsaPrivateKey,
}

impl SubscriberKeys {
  /// Generate a fresh key triple for a new connection.
  pub fn generate() -> Result<Self> {
    let mut rng = rand::thread_rng();
    let new_key = |rng: &mut _| {
      RsaPrivateKey::new(rng, KEY_BITS).map_err(|e| Error::Keys(e.to_string()))
    };
    Ok(Self {
      signature:      new_key(&mut rng)?,
      authentication: new_key(&mut rng)?,
      encryption:     new_key(&mut rng)?,
    })
  }

  /// Load from the three PKCS#8 DER blobs the store holds.
  pub fn from_der(
    signature: &[u8],
    authentication: &[u8],
    encryption: &[u8],
  ) -> Result<Self> {
    let load = |der: &[u8]| {
      RsaPrivateKey::from_pkcs8_der(der)
        .map_err(|e| Error::Keys(e.to_string()))
    };
    Ok(Self {
      signature:      load(signature)?,
      authentication: load(authentication)?,
      encryption:     load(encryption)?,
    })
  }

  /// Serialise for persistence: `(signature, authentication, encryption)`.
  pub fn to_der(&self) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
    let dump = |key: &RsaPrivateKey| {
      key
        .to_pkcs8_der()
        .map(|d| d.as_bytes().to_vec())
        .map_err(|e| Error::Keys(e.to_string()))
    };
    Ok((
      dump(&self.signature)?,
      dump(&self.authentication)?,
      dump(&self.encryption)?,
    ))
  }
}

/// The bank's two public keys, known after HPB.
#[derive(Clone)]
pub struct BankKeys {
  pub authentication: RsaPublicKey,
  pub encryption:     RsaPublicKey,
}

impl BankKeys {
  pub fn from_der(authentication: &[u8], encryption: &[u8]) -> Result<Self> {
    let load = |der: &[u8]| {
      RsaPublicKey::from_public_key_der(der)
        .map_err(|e| Error::Keys(e.to_string()))
    };
    Ok(Self {
      authentication: load(authentication)?,
      encryption:     load(encryption)?,
    })
  }

  pub fn to_der(&self) -> Result<(Vec<u8>, Vec<u8>)> {
    Ok((
      public_key_der(&self.authentication)?,
      public_key_der(&self.encryption)?,
    ))
  }
}

// ─── Digests and encodings ───────────────────────────────────────────────────

pub fn public_key_der(key: &RsaPublicKey) -> Result<Vec<u8>> {
  key
    .to_public_key_der()
    .map(|d| d.as_ref().to_vec())
    .map_err(|e| Error::Keys(e.to_string()))
}

/// SHA-256 over the SPKI DER encoding — the digest exchanged in
/// `BankPubKeyDigests` and `DataEncryptionInfo`.
pub fn public_key_digest(key: &RsaPublicKey) -> Result<[u8; 32]> {
  Ok(Sha256::digest(public_key_der(key)?).into())
}

/// Hex fingerprint shown to the operator for out-of-band confirmation.
pub fn fingerprint(key: &RsaPublicKey) -> Result<String> {
  Ok(hex::encode_upper(public_key_digest(key)?))
}

/// Rebuild a public key from the modulus/exponent pair carried in EBICS
/// key-management order data.
pub fn public_key_from_parts(
  modulus: &[u8],
  exponent: &[u8],
) -> Result<RsaPublicKey> {
  RsaPublicKey::new(
    BigUint::from_bytes_be(modulus),
    BigUint::from_bytes_be(exponent),
  )
  .map_err(|e| Error::Keys(e.to_string()))
}

/// The big-endian modulus/exponent pair of one of our public keys, as
/// embedded in INI/HIA order data.
pub fn public_key_parts(key: &RsaPublicKey) -> (Vec<u8>, Vec<u8>) {
  (key.n().to_bytes_be(), key.e().to_bytes_be())
}

#[cfg(test)]
mod tests {
  use super::*;

  // 2048-bit generation is slow; one shared key pair per test run.
  fn test_key() -> RsaPrivateKey {
    RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap()
  }

  #[test]
  fn private_key_der_round_trip() {
    let key = test_key();
    let der = key.to_pkcs8_der().unwrap().as_bytes().to_vec();
    let back = RsaPrivateKey::from_pkcs8_der(&der).unwrap();
    assert_eq!(key, back);
  }

  #[test]
  fn public_key_rebuilds_from_parts() {
    let key = RsaPublicKey::from(&test_key());
    let (n, e) = public_key_parts(&key);
    let rebuilt = public_key_from_parts(&n, &e).unwrap();
    assert_eq!(
      public_key_digest(&key).unwrap(),
      public_key_digest(&rebuilt).unwrap()
    );
  }

  #[test]
  fn fingerprint_is_uppercase_hex_of_the_digest() {
    let key = RsaPublicKey::from(&test_key());
    let fp = fingerprint(&key).unwrap();
    assert_eq!(fp.len(), 64);
    assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(fp, fp.to_uppercase());
  }
}
