// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signer construction from custodial and operator keys.

use alloy::signers::local::PrivateKeySigner;
use k256::{ecdsa::SigningKey, SecretKey};
use zeroize::Zeroizing;

use super::client::LedgerError;

/// Create a signer from a decrypted custodial key.
pub fn signer_from_secret(secret: &SecretKey) -> PrivateKeySigner {
    PrivateKeySigner::from_signing_key(SigningKey::from(secret))
}

/// Create a signer from a hex private key (64 characters, optional `0x`).
///
/// Used for the operator (minter) key loaded from the environment.
pub fn signer_from_hex(private_key_hex: &str) -> Result<PrivateKeySigner, LedgerError> {
    let trimmed = private_key_hex.trim();
    let key_bytes = Zeroizing::new(
        alloy::hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed))
            .map_err(|e| LedgerError::InvalidInput(format!("Invalid private key: {e}")))?,
    );

    PrivateKeySigner::from_slice(&key_bytes)
        .map_err(|e| LedgerError::InvalidInput(format!("Invalid private key: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custody::{derive_address, KeyVault};

    #[test]
    fn signer_address_matches_derived_address() {
        let (public, secret) = KeyVault::generate_key_pair();
        let signer = signer_from_secret(&secret);
        assert_eq!(
            format!("{:#x}", signer.address()),
            derive_address(&public)
        );
    }

    #[test]
    fn signer_from_hex_accepts_prefixed_keys() {
        let (_, secret) = KeyVault::generate_key_pair();
        let hex = alloy::hex::encode(secret.to_bytes());

        let plain = signer_from_hex(&hex).unwrap();
        let prefixed = signer_from_hex(&format!("0x{hex}")).unwrap();
        assert_eq!(plain.address(), prefixed.address());
        assert_eq!(plain.address(), signer_from_secret(&secret).address());
    }

    #[test]
    fn signer_from_hex_rejects_garbage() {
        assert!(matches!(
            signer_from_hex("zz"),
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(matches!(
            signer_from_hex(&"00".repeat(32)),
            Err(LedgerError::InvalidInput(_))
        ));
    }
}
