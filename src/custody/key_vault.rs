// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Keypair generation and authenticated encryption of private keys at rest.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use alloy::primitives::keccak256;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use k256::{elliptic_curve::sec1::ToEncodedPoint, PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

/// Algorithm tag stored next to every ciphertext.
pub const KEY_ALGORITHM: &str = "secp256k1/aes-256-gcm";

const MASTER_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Errors raised by key generation and key encryption.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("master key is not configured")]
    MissingMasterKey,

    #[error("master key is malformed: {0}")]
    MalformedMasterKey(String),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("encryption failed")]
    Encryption,

    #[error("decryption failed (wrong master key or tampered ciphertext)")]
    Decryption,

    #[error("ciphertext is malformed: {0}")]
    MalformedCiphertext(String),

    #[error("unsupported key algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// 256-bit key-encryption key. Zeroized on drop.
#[derive(Clone)]
pub struct MasterKey([u8; MASTER_KEY_LEN]);

impl MasterKey {
    pub fn from_bytes(bytes: [u8; MASTER_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a master key from hex (64 characters, optional `0x`) or base64.
    pub fn parse(raw: &str) -> Result<Self, CryptoError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CryptoError::MissingMasterKey);
        }

        let hex_candidate = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let decoded = if hex_candidate.len() == MASTER_KEY_LEN * 2
            && hex_candidate.chars().all(|c| c.is_ascii_hexdigit())
        {
            alloy::hex::decode(hex_candidate)
                .map_err(|e| CryptoError::MalformedMasterKey(e.to_string()))?
        } else {
            BASE64
                .decode(trimmed)
                .map_err(|e| CryptoError::MalformedMasterKey(e.to_string()))?
        };
        let mut decoded = Zeroizing::new(decoded);

        if decoded.len() != MASTER_KEY_LEN {
            return Err(CryptoError::MalformedMasterKey(format!(
                "expected {MASTER_KEY_LEN} bytes, got {}",
                decoded.len()
            )));
        }

        let mut key = [0u8; MASTER_KEY_LEN];
        key.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self(key))
    }

    /// Load the master key from an environment variable.
    pub fn from_env(var: &str) -> Result<Self, CryptoError> {
        let raw = std::env::var(var).map_err(|_| CryptoError::MissingMasterKey)?;
        Self::parse(&raw)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

/// Public key plus encrypted private key, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMaterial {
    /// Uncompressed SEC1 public key, hex without `0x` and without the `04` tag
    pub public_key: String,
    /// base64(nonce || ciphertext || tag)
    pub encrypted_private_key: String,
    /// Algorithm tag, always [`KEY_ALGORITHM`] for keys written by this build
    pub algorithm: String,
}

/// Encrypt a private key under the master key with a fresh random nonce.
pub fn encrypt(private_key: &SecretKey, master_key: &MasterKey) -> Result<String, CryptoError> {
    let plaintext = Zeroizing::new(private_key.to_bytes().to_vec());
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = master_key
        .cipher()
        .encrypt(&nonce, plaintext.as_slice())
        .map_err(|_| CryptoError::Encryption)?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(sealed))
}

/// Decrypt a ciphertext produced by [`encrypt`].
pub fn decrypt(ciphertext: &str, master_key: &MasterKey) -> Result<SecretKey, CryptoError> {
    let sealed = BASE64
        .decode(ciphertext.trim())
        .map_err(|e| CryptoError::MalformedCiphertext(e.to_string()))?;
    if sealed.len() <= NONCE_LEN {
        return Err(CryptoError::MalformedCiphertext(
            "ciphertext too short".to_string(),
        ));
    }

    let (nonce_bytes, body) = sealed.split_at(NONCE_LEN);
    let plaintext = Zeroizing::new(
        master_key
            .cipher()
            .decrypt(Nonce::from_slice(nonce_bytes), body)
            .map_err(|_| CryptoError::Decryption)?,
    );

    SecretKey::from_slice(&plaintext).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Derive the EVM address (`0x`-prefixed, lowercase hex) of a public key.
pub fn derive_address(public_key: &PublicKey) -> String {
    let uncompressed = public_key.to_encoded_point(false);
    let hash = keccak256(&uncompressed.as_bytes()[1..]);
    format!("0x{}", alloy::hex::encode(&hash[12..]))
}

/// Key custody boundary: every key that reaches storage passes through here.
#[derive(Debug, Clone)]
pub struct KeyVault {
    master_key: MasterKey,
}

impl KeyVault {
    pub fn new(master_key: MasterKey) -> Self {
        Self { master_key }
    }

    /// Generate a fresh secp256k1 keypair.
    pub fn generate_key_pair() -> (PublicKey, SecretKey) {
        let secret = SecretKey::random(&mut k256::elliptic_curve::rand_core::OsRng);
        (secret.public_key(), secret)
    }

    /// Generate a keypair and return it sealed, together with its address.
    ///
    /// The plaintext key is dropped (and zeroized) before this returns.
    pub fn generate_sealed(&self) -> Result<(KeyMaterial, String), CryptoError> {
        let (public_key, secret) = Self::generate_key_pair();
        let material = self.seal(&public_key, &secret)?;
        Ok((material, derive_address(&public_key)))
    }

    pub fn seal(
        &self,
        public_key: &PublicKey,
        private_key: &SecretKey,
    ) -> Result<KeyMaterial, CryptoError> {
        let uncompressed = public_key.to_encoded_point(false);
        Ok(KeyMaterial {
            public_key: alloy::hex::encode(&uncompressed.as_bytes()[1..]),
            encrypted_private_key: encrypt(private_key, &self.master_key)?,
            algorithm: KEY_ALGORITHM.to_string(),
        })
    }

    /// Decrypt key material for signing. Callers should drop the key as soon
    /// as the signature is produced.
    pub fn unseal(&self, material: &KeyMaterial) -> Result<SecretKey, CryptoError> {
        if material.algorithm != KEY_ALGORITHM {
            return Err(CryptoError::UnsupportedAlgorithm(material.algorithm.clone()));
        }
        decrypt(&material.encrypted_private_key, &self.master_key)
    }

    /// Parse the public key stored in key material.
    pub fn public_key(material: &KeyMaterial) -> Result<PublicKey, CryptoError> {
        let mut sec1 = vec![0x04];
        sec1.extend(
            alloy::hex::decode(&material.public_key)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?,
        );
        PublicKey::from_sec1_bytes(&sec1).map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }
}
