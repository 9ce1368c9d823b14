//! AES-256-GCM sealing of remote-server tokens.
//!
//! Sealed layout: `nonce (12 bytes) ‖ ciphertext+tag`, base64-encoded for
//! storage in a text column.

use std::fmt;

use aes_gcm::{
  Aes256Gcm, KeyInit, Nonce,
  aead::Aead,
};
use base64::{Engine, engine::general_purpose::STANDARD};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

const KEY_PREFIX: &str = "base64:";
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Symmetric box keyed once from the master secret.
#[derive(Clone)]
pub struct SecretBox {
  cipher: Aes256Gcm,
}

impl fmt::Debug for SecretBox {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("SecretBox(..)")
  }
}

impl SecretBox {
  /// Derive the key from `secret`.
  ///
  /// `base64:<data>` uses the first 32 decoded bytes (at least 32 required);
  /// any other string is hashed with SHA-256.
  pub fn from_secret(secret: &str) -> Result<Self> {
    let secret = secret.trim();
    if secret.is_empty() {
      return Err(Error::MissingToken);
    }

    let key: Vec<u8> = match secret.strip_prefix(KEY_PREFIX) {
      Some(encoded) => {
        let raw = STANDARD
          .decode(encoded.trim())
          .map_err(|e| Error::InvalidKey(e.to_string()))?;
        if raw.len() < KEY_LEN {
          return Err(Error::InvalidKey(format!(
            "decoded key is {} bytes, need at least {KEY_LEN}",
            raw.len()
          )));
        }
        raw[..KEY_LEN].to_vec()
      }
      None => Sha256::digest(secret.as_bytes()).to_vec(),
    };

    let cipher =
      Aes256Gcm::new_from_slice(&key).map_err(|e| Error::InvalidKey(e.to_string()))?;
    Ok(Self { cipher })
  }

  pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
    if plaintext.is_empty() {
      return Err(Error::MissingToken);
    }
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let sealed = self
      .cipher
      .encrypt(Nonce::from_slice(&nonce), plaintext)
      .map_err(|_| Error::Decrypt)?;

    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
  }

  pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() {
      return Err(Error::MissingToken);
    }
    if data.len() <= NONCE_LEN {
      return Err(Error::Decrypt);
    }
    let (nonce, sealed) = data.split_at(NONCE_LEN);
    self
      .cipher
      .decrypt(Nonce::from_slice(nonce), sealed)
      .map_err(|_| Error::Decrypt)
  }

  /// Encrypt a token for storage.
  pub fn seal(&self, token: &str) -> Result<String> {
    Ok(STANDARD.encode(self.encrypt(token.as_bytes())?))
  }

  /// Reverse of [`SecretBox::seal`].
  pub fn open(&self, sealed: &str) -> Result<String> {
    let sealed = sealed.trim();
    if sealed.is_empty() {
      return Err(Error::MissingToken);
    }
    let data = STANDARD.decode(sealed).map_err(|_| Error::Decrypt)?;
    let plain = self.decrypt(&data)?;
    String::from_utf8(plain).map_err(|_| Error::Decrypt)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn seal_then_open() {
    let sb = SecretBox::from_secret("correct horse battery staple").unwrap();
    let sealed = sb.seal("tok-123").unwrap();
    assert_ne!(sealed, "tok-123");
    assert_eq!(sb.open(&sealed).unwrap(), "tok-123");
  }

  #[test]
  fn nonce_is_fresh_per_call() {
    let sb = SecretBox::from_secret("k").unwrap();
    assert_ne!(sb.seal("same").unwrap(), sb.seal("same").unwrap());
  }

  #[test]
  fn tampering_fails_with_decrypt() {
    let sb = SecretBox::from_secret("k").unwrap();
    let mut raw = sb.encrypt(b"secret").unwrap();
    let last = raw.len() - 1;
    raw[last] ^= 0x01;
    assert!(matches!(sb.decrypt(&raw), Err(Error::Decrypt)));
  }

  #[test]
  fn wrong_key_fails_with_decrypt() {
    let a = SecretBox::from_secret("alpha").unwrap();
    let b = SecretBox::from_secret("beta").unwrap();
    let sealed = a.seal("x").unwrap();
    assert!(matches!(b.open(&sealed), Err(Error::Decrypt)));
  }

  #[test]
  fn empty_inputs_are_missing_token() {
    assert!(matches!(SecretBox::from_secret("  "), Err(Error::MissingToken)));
    let sb = SecretBox::from_secret("k").unwrap();
    assert!(matches!(sb.seal(""), Err(Error::MissingToken)));
    assert!(matches!(sb.open(""), Err(Error::MissingToken)));
    assert!(matches!(sb.decrypt(&[]), Err(Error::MissingToken)));
  }

  #[test]
  fn truncated_ciphertext_fails_with_decrypt() {
    let sb = SecretBox::from_secret("k").unwrap();
    assert!(matches!(sb.decrypt(&[1, 2, 3]), Err(Error::Decrypt)));
  }

  #[test]
  fn base64_key_must_be_long_enough() {
    let short = format!("base64:{}", STANDARD.encode([7u8; 16]));
    assert!(matches!(SecretBox::from_secret(&short), Err(Error::InvalidKey(_))));

    let long = format!("base64:{}", STANDARD.encode([7u8; 40]));
    let exact = format!("base64:{}", STANDARD.encode([7u8; 32]));
    let a = SecretBox::from_secret(&long).unwrap();
    let b = SecretBox::from_secret(&exact).unwrap();
    // Only the first 32 bytes form the key.
    assert_eq!(b.open(&a.seal("t").unwrap()).unwrap(), "t");
  }

  #[test]
  fn debug_does_not_leak_key() {
    let sb = SecretBox::from_secret("hunter2").unwrap();
    assert_eq!(format!("{sb:?}"), "SecretBox(..)");
  }
}
