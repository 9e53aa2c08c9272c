//! Authorization gate for guarded operations
//!
//! This module decides, per requested operation, whether to execute
//! immediately, simulate, prompt a human, or refuse. Decisions combine a
//! static whitelist, ephemeral in-session approvals, and a hot-reloadable
//! persistent rule store; every attempt lands in an append-only audit log.

mod audit;
mod manager;
mod rules;

pub use audit::{AuditEntry, AuditLog};
pub use manager::{
    classify, Classification, ExecuteOutcome, ExecuteRequest, PermissionDecision,
    PermissionManager, PromptCallback, DEFAULT_AUDIT_LOG, DEFAULT_RULES_FILE,
};
pub use rules::{Rule, RuleDecision, RuleStore, RuleWatcherHandle, DEFAULT_POLL_INTERVAL};
