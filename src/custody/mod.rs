// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Key Custody
//!
//! Custodial signing keys are generated here and never leave this module in
//! plaintext form except as a short-lived [`k256::SecretKey`] handed to a
//! signer. Everything that touches the database is [`KeyMaterial`]: the
//! public key plus an AES-256-GCM ciphertext of the private scalar.
//!
//! ## Security Model
//!
//! - Keys are secp256k1 (the EVM signing curve)
//! - Every encryption draws a fresh 96-bit nonce from the OS RNG
//! - The master key is loaded once from `KEY_ENCRYPTION_KEY`
//! - Plaintext buffers are zeroized on drop

pub mod key_vault;

pub use key_vault::{
    decrypt, derive_address, encrypt, CryptoError, KeyMaterial, KeyVault, MasterKey,
    KEY_ALGORITHM,
};
