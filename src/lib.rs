//! Guarded infrastructure operations for automated agents
//!
//! The safety layer of a container-management agent: an authorization gate
//! that decides whether each potentially destructive operation executes,
//! is simulated, prompts a human, or is refused, backed by a persistent,
//! hot-reloadable rule store and an append-only audit log; plus a
//! passphrase-encrypted vault for SSH private keys.
//!
//! The agent loop, the container backend, and the interactive CLI are
//! external collaborators: they hand the gate an operation name, a preview,
//! and an async action closure, and hand the vault a passphrase when a
//! secret must be materialized.

pub mod logging;
pub mod permissions;
pub mod security;
pub mod vault;

pub use permissions::{
    classify, Classification, ExecuteOutcome, ExecuteRequest, PermissionDecision,
    PermissionManager, PromptCallback, RuleDecision, RuleStore,
};
pub use vault::{KeyVault, VaultError};
