//! Credential vault
//!
//! Stores long-lived secrets (SSH private keys) encrypted at rest under a
//! passphrase-derived key. Independent of the authorization gate.

mod keys;

pub use keys::{KeyVault, VaultError, PBKDF2_ROUNDS};
