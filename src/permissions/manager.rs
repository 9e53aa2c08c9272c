//! Permission manager implementation
//!
//! The gate every potentially destructive operation passes through. It
//! combines a static whitelist, per-session approvals, and the persistent
//! rule store to decide whether to execute an operation, simulate it,
//! prompt a human, or refuse, and writes one audit entry per attempt.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Result;
use serde_json::Value;

use super::audit::{AuditEntry, AuditLog};
use super::rules::{RuleDecision, RuleStore};

/// Default location of the persistent rule file
pub const DEFAULT_RULES_FILE: &str = "permissions_rules.json";
/// Default location of the audit log
pub const DEFAULT_AUDIT_LOG: &str = "logs/permissions.log";

/// The human's answer to a confirmation prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    /// Allow this one invocation
    AllowOnce,
    /// Allow this exact command for the rest of the session
    AllowCommand,
    /// Allow this operation for the rest of the session
    AllowSession,
    /// Refuse
    Deny,
}

/// Read/write partition used to decide whether confirmation is needed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Never requires confirmation
    Read,
    /// Requires confirmation unless whitelisted or approved
    Write,
}

/// Classify an operation as read-only or write
///
/// The read set is a small closed list; everything else is a write.
pub fn classify(operation: &str) -> Classification {
    match operation {
        "list_containers" | "get_logs" | "inspect_container" | "list_images"
        | "list_volumes" | "list_networks" | "check_resource" => Classification::Read,
        _ => Classification::Write,
    }
}

/// Confirmation prompt supplied by the interactive front end
///
/// The prompt blocks the calling task until the human answers; there is no
/// timeout, and cancelling mid-prompt is not supported. Absence of a prompt
/// means every confirmation request is denied (fail closed).
pub trait PromptCallback: Send + Sync {
    /// Ask the human to decide on an operation
    fn prompt(
        &self,
        operation: &str,
        impact: Option<&str>,
        command_preview: Option<&str>,
    ) -> PermissionDecision;
}

impl<F> PromptCallback for F
where
    F: Fn(&str, Option<&str>, Option<&str>) -> PermissionDecision + Send + Sync,
{
    fn prompt(
        &self,
        operation: &str,
        impact: Option<&str>,
        command_preview: Option<&str>,
    ) -> PermissionDecision {
        self(operation, impact, command_preview)
    }
}

/// A request to run a guarded operation
#[derive(Debug, Clone, Default)]
pub struct ExecuteRequest {
    operation: String,
    args: Value,
    command_preview: Option<String>,
    impact: Option<String>,
    command_key: Option<String>,
    classification: Option<Classification>,
    decision_override: Option<PermissionDecision>,
}

impl ExecuteRequest {
    /// Create a request for the named operation
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    /// Attach an argument snapshot for the audit trail
    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    /// Attach the command this operation would run
    pub fn with_preview(mut self, preview: impl Into<String>) -> Self {
        self.command_preview = Some(preview.into());
        self
    }

    /// Attach a human-readable impact description
    pub fn with_impact(mut self, impact: impl Into<String>) -> Self {
        self.impact = Some(impact.into());
        self
    }

    /// Attach a key identifying this exact invocation (operation + target)
    ///
    /// "Allow for this command" approvals are scoped to this key, narrower
    /// than "allow for this operation".
    pub fn with_command_key(mut self, key: impl Into<String>) -> Self {
        self.command_key = Some(key.into());
        self
    }

    /// Force the read/write classification instead of deriving it
    pub fn with_classification(mut self, classification: Classification) -> Self {
        self.classification = Some(classification);
        self
    }

    /// Supply the confirmation decision directly, skipping the prompt
    ///
    /// Used by tests and automation.
    pub fn with_decision_override(mut self, decision: PermissionDecision) -> Self {
        self.decision_override = Some(decision);
        self
    }
}

/// Outcome of a guarded execution
///
/// Refusals and dry-run simulations are expected, common outcomes and so are
/// values rather than errors; an action that ran and broke surfaces as `Err`
/// from [`PermissionManager::execute`].
#[derive(Debug)]
pub enum ExecuteOutcome<T> {
    /// The action ran; its result is returned verbatim
    Executed(T),
    /// Policy or the human refused; the action never ran
    Refused(String),
    /// Dry-run mode; the action never ran
    Simulated(String),
}

impl<T> ExecuteOutcome<T> {
    /// Whether the action actually ran
    pub fn is_executed(&self) -> bool {
        matches!(self, ExecuteOutcome::Executed(_))
    }

    /// The refusal or simulation message, if any
    pub fn message(&self) -> Option<&str> {
        match self {
            ExecuteOutcome::Executed(_) => None,
            ExecuteOutcome::Refused(msg) | ExecuteOutcome::Simulated(msg) => Some(msg),
        }
    }
}

#[derive(Default)]
struct SessionApprovals {
    session: HashSet<String>,
    command: HashSet<String>,
}

/// Manages authorization for guarded operations
pub struct PermissionManager {
    /// Operations that never require confirmation
    whitelist: HashSet<String>,
    /// When set, approved actions are described instead of executed
    dry_run: bool,
    /// Identity recorded in audit entries
    user: String,
    /// Ephemeral approvals for the current run
    approvals: Mutex<SessionApprovals>,
    /// Persistent rules, shared with the reload watcher
    rules: RuleStore,
    /// Append-only audit trail
    audit: AuditLog,
    /// Interactive confirmation prompt, if the front end supplied one
    prompt: Option<Arc<dyn PromptCallback>>,
}

impl PermissionManager {
    /// Create a manager with environment-driven defaults
    ///
    /// `DOCKHAND_SAFE_OPERATIONS` seeds the whitelist (comma-separated),
    /// `DOCKHAND_DRY_RUN` enables dry-run mode, and `DOCKHAND_USER` (then
    /// `USER`) sets the audit identity.
    pub fn new() -> Self {
        Self {
            whitelist: whitelist_from_env(),
            dry_run: dry_run_from_env(),
            user: user_from_env(),
            approvals: Mutex::new(SessionApprovals::default()),
            rules: RuleStore::open(DEFAULT_RULES_FILE),
            audit: AuditLog::new(DEFAULT_AUDIT_LOG),
            prompt: None,
        }
    }

    /// Extend the whitelist with additional operations
    pub fn with_whitelist<I, S>(mut self, operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.whitelist.extend(operations.into_iter().map(Into::into));
        self
    }

    /// Set dry-run mode explicitly
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set the audit identity explicitly
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Write audit entries to the given file
    pub fn with_audit_log(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.audit = AuditLog::new(path);
        self
    }

    /// Load persistent rules from the given file
    pub fn with_rules_file(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.rules = RuleStore::open(path);
        self
    }

    /// Use an already-opened rule store
    pub fn with_rule_store(mut self, rules: RuleStore) -> Self {
        self.rules = rules;
        self
    }

    /// Supply the interactive confirmation prompt
    pub fn with_prompt(mut self, prompt: Arc<dyn PromptCallback>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Whether dry-run mode is active
    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// The rule store, for administrative commands and the reload watcher
    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    /// Whether an operation would require confirmation right now
    pub fn needs_confirmation(&self, operation: &str, command_key: Option<&str>) -> bool {
        if self.bypasses_confirmation(operation, command_key) {
            return false;
        }
        classify(operation) == Classification::Write
    }

    /// Record approval for one exact command for the rest of the run
    pub fn approve_for_command(&self, command_key: impl Into<String>) {
        self.approvals
            .lock()
            .unwrap()
            .command
            .insert(command_key.into());
    }

    /// Record approval for an operation for the rest of the run
    pub fn approve_for_session(&self, operation: impl Into<String>) {
        self.approvals
            .lock()
            .unwrap()
            .session
            .insert(operation.into());
    }

    /// Run an operation through the gate
    ///
    /// Decision resolution: a persistent deny short-circuits everything;
    /// then confirmation is required unless the operation is whitelisted,
    /// session- or command-approved, persistently allowed, or read-only;
    /// then dry-run mode replaces execution with a description. Every call
    /// writes exactly one audit entry.
    pub async fn execute<F, Fut, T>(
        &self,
        request: ExecuteRequest,
        action: F,
    ) -> Result<ExecuteOutcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let ExecuteRequest {
            operation,
            args,
            command_preview,
            impact,
            command_key,
            classification,
            decision_override,
        } = request;

        // Persistent deny takes precedence over everything, whitelist included
        if self.rules.get_decision(&operation, None) == Some(RuleDecision::Deny) {
            self.log_action(
                &operation,
                &args,
                "denied_by_config",
                &command_preview,
                &impact,
                started,
            );
            return Ok(ExecuteOutcome::Refused(
                "Operation denied by persistent configuration".to_string(),
            ));
        }

        let required = match classification {
            Some(Classification::Read) => false,
            Some(Classification::Write) => {
                !self.bypasses_confirmation(&operation, command_key.as_deref())
            }
            None => self.needs_confirmation(&operation, command_key.as_deref()),
        };

        if required {
            let decision = match decision_override {
                Some(decision) => decision,
                None => match &self.prompt {
                    Some(prompt) => {
                        prompt.prompt(&operation, impact.as_deref(), command_preview.as_deref())
                    }
                    // Fail closed when nobody can answer
                    None => PermissionDecision::Deny,
                },
            };

            match decision {
                PermissionDecision::Deny => {
                    self.log_action(&operation, &args, "denied", &command_preview, &impact, started);
                    return Ok(ExecuteOutcome::Refused(
                        "Operation cancelled by the user".to_string(),
                    ));
                }
                PermissionDecision::AllowCommand => {
                    if let Some(key) = &command_key {
                        self.approve_for_command(key.clone());
                    }
                }
                PermissionDecision::AllowSession => {
                    self.approve_for_session(operation.clone());
                }
                PermissionDecision::AllowOnce => {}
            }
        }

        // Checked after confirmation: simulation does not bypass
        // authorization, only side effects
        if self.dry_run {
            self.log_action(
                &operation,
                &args,
                "allowed_dry_run",
                &command_preview,
                &impact,
                started,
            );
            let described = command_preview.as_deref().unwrap_or(&operation);
            return Ok(ExecuteOutcome::Simulated(format!(
                "Dry-run mode: would execute {}",
                described
            )));
        }

        match action().await {
            Ok(result) => {
                self.log_action(&operation, &args, "allowed", &command_preview, &impact, started);
                Ok(ExecuteOutcome::Executed(result))
            }
            Err(e) => {
                self.log_action(
                    &operation,
                    &args,
                    &format!("error: {}", e),
                    &command_preview,
                    &impact,
                    started,
                );
                Err(e)
            }
        }
    }

    /// Whitelist, approval-cache, and persistent-allow bypass check
    fn bypasses_confirmation(&self, operation: &str, command_key: Option<&str>) -> bool {
        if self.whitelist.contains(operation) {
            return true;
        }
        {
            let approvals = self.approvals.lock().unwrap();
            if approvals.session.contains(operation) {
                return true;
            }
            if let Some(key) = command_key {
                if approvals.command.contains(key) {
                    return true;
                }
            }
        }
        self.rules.get_decision(operation, None) == Some(RuleDecision::Allow)
    }

    fn log_action(
        &self,
        operation: &str,
        args: &Value,
        decision: &str,
        command_preview: &Option<String>,
        impact: &Option<String>,
        started: Instant,
    ) {
        let mut entry = AuditEntry::new(self.user.clone(), operation);
        entry.args = args.clone();
        entry.decision = decision.to_string();
        entry.dry_run = self.dry_run;
        entry.command_preview = command_preview.clone();
        entry.impact = impact.clone();
        entry.duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.audit.append(&entry);
    }
}

impl Default for PermissionManager {
    fn default() -> Self {
        Self::new()
    }
}

fn whitelist_from_env() -> HashSet<String> {
    std::env::var("DOCKHAND_SAFE_OPERATIONS")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn dry_run_from_env() -> bool {
    std::env::var("DOCKHAND_DRY_RUN")
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "y"))
        .unwrap_or(false)
}

fn user_from_env() -> String {
    std::env::var("DOCKHAND_USER")
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_read_operations() {
        assert_eq!(classify("list_containers"), Classification::Read);
        assert_eq!(classify("get_logs"), Classification::Read);
        assert_eq!(classify("check_resource"), Classification::Read);
    }

    #[test]
    fn test_classify_everything_else_is_write() {
        assert_eq!(classify("restart_container"), Classification::Write);
        assert_eq!(classify("delete_container"), Classification::Write);
        assert_eq!(classify("no_such_operation"), Classification::Write);
    }

    fn manager_in(dir: &tempfile::TempDir) -> PermissionManager {
        PermissionManager::new()
            .with_user("test")
            .with_dry_run(false)
            .with_rules_file(dir.path().join("rules.json"))
            .with_audit_log(dir.path().join("permissions.log"))
    }

    #[test]
    fn test_needs_confirmation_for_write_operations() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir);

        assert!(manager.needs_confirmation("restart_container", None));
        assert!(!manager.needs_confirmation("list_containers", None));
    }

    #[test]
    fn test_whitelist_bypasses_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir).with_whitelist(["restart_container"]);

        assert!(!manager.needs_confirmation("restart_container", None));
        assert!(manager.needs_confirmation("delete_container", None));
    }

    #[test]
    fn test_session_and_command_approvals_bypass_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir);

        manager.approve_for_session("restart_container");
        assert!(!manager.needs_confirmation("restart_container", None));

        manager.approve_for_command("delete:web");
        assert!(!manager.needs_confirmation("delete_container", Some("delete:web")));
        assert!(manager.needs_confirmation("delete_container", Some("delete:db")));
    }

    #[test]
    fn test_persistent_allow_bypasses_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir);

        manager.rules().add_rule(
            "pull_image",
            RuleDecision::Allow,
            "trusted registry",
            Default::default(),
        );
        assert!(!manager.needs_confirmation("pull_image", None));
    }
}
