//! Persistent authorization rules with hot reload
//!
//! Rules live in a JSON file that an operator may edit from outside the
//! process; a background watcher picks up external changes within the poll
//! interval. The in-memory cache and the backing file are the only state
//! shared across tasks, so every read, mutation, and reload holds the same
//! exclusive lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// How often the watcher compares the backing file's mtime
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

const RULE_FILE_VERSION: &str = "1.0";

/// Persistent decision attached to a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleDecision {
    /// Skip confirmation for matching operations
    Allow,
    /// Refuse matching operations outright
    Deny,
    /// Fall through to the normal confirmation flow
    Ask,
}

/// A single authorization rule
///
/// Rules are immutable once created. Updates are modeled as new rules
/// prepended to the list, so older conflicting rules become unreachable but
/// stay on disk for history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Operation name this rule applies to
    pub operation: String,
    /// What to do when the rule matches
    pub decision: RuleDecision,
    /// When the rule was created (RFC 3339, UTC)
    pub created_at: String,
    /// Free-form note about why the rule exists
    pub context: String,
    /// Parameter constraints; empty means the rule matches unconditionally
    #[serde(default)]
    pub params: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RuleFile {
    version: String,
    rules: Vec<Rule>,
}

impl Default for RuleFile {
    fn default() -> Self {
        Self {
            version: RULE_FILE_VERSION.to_string(),
            rules: Vec::new(),
        }
    }
}

struct StoreState {
    file: RuleFile,
    last_mtime: Option<SystemTime>,
}

/// Thread-safe store of persistent authorization rules
///
/// Cloning is cheap and shares the underlying state, so a clone can be
/// handed to the background watcher.
#[derive(Clone)]
pub struct RuleStore {
    path: PathBuf,
    state: Arc<Mutex<StoreState>>,
}

impl RuleStore {
    /// Open a rule store backed by the given file
    ///
    /// A missing or corrupt file yields an empty store. Corruption must
    /// never crash the process, only reset the visible rule set.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file = load_rule_file(&path);
        let last_mtime = file_mtime(&path);

        Self {
            path,
            state: Arc::new(Mutex::new(StoreState { file, last_mtime })),
        }
    }

    /// Get the backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up the persistent decision for an operation
    ///
    /// Scans rules in priority order (most recently added first). A rule
    /// with empty `params` is immediately authoritative; a rule carrying
    /// params is authoritative only when every one of them is present in
    /// the caller-supplied params with an equal value, otherwise scanning
    /// continues. First match wins: a rule added later always outranks an
    /// earlier one for the same operation, even when the earlier rule is
    /// more specific.
    pub fn get_decision(
        &self,
        operation: &str,
        params: Option<&HashMap<String, String>>,
    ) -> Option<RuleDecision> {
        let state = self.state.lock().unwrap();
        for rule in &state.file.rules {
            if rule.operation != operation {
                continue;
            }
            if rule.params.is_empty() {
                return Some(rule.decision);
            }
            if let Some(supplied) = params {
                if rule
                    .params
                    .iter()
                    .all(|(k, v)| supplied.get(k) == Some(v))
                {
                    return Some(rule.decision);
                }
            }
        }
        None
    }

    /// Prepend a new rule and persist the whole store
    pub fn add_rule(
        &self,
        operation: impl Into<String>,
        decision: RuleDecision,
        context: impl Into<String>,
        params: HashMap<String, String>,
    ) -> Rule {
        let rule = Rule {
            operation: operation.into(),
            decision,
            created_at: Utc::now().to_rfc3339(),
            context: context.into(),
            params,
        };

        let mut state = self.state.lock().unwrap();
        state.file.rules.insert(0, rule.clone());
        self.persist(&mut state);
        rule
    }

    /// List all rules in priority order
    pub fn list_rules(&self) -> Vec<Rule> {
        self.state.lock().unwrap().file.rules.clone()
    }

    /// Clear all rules and persist the empty store
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.file = RuleFile::default();
        self.persist(&mut state);
    }

    /// Reload from disk if the backing file changed underneath us
    ///
    /// Returns true when a reload happened.
    pub fn reload_if_changed(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        let current = file_mtime(&self.path);
        if current > state.last_mtime {
            tracing::info!("Reloading authorization rules from {}", self.path.display());
            state.file = load_rule_file(&self.path);
            state.last_mtime = current;
            true
        } else {
            false
        }
    }

    /// Spawn a background task that polls for external edits
    ///
    /// The returned handle cancels the task; drop it without calling
    /// [`RuleWatcherHandle::shutdown`] and the task keeps running for the
    /// lifetime of the runtime.
    pub fn spawn_watcher(&self, interval: Duration) -> RuleWatcherHandle {
        let store = self.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a fresh store
            // is not reloaded before anything could have changed.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        store.reload_if_changed();
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        RuleWatcherHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    /// Whole-file rewrite; readers never observe a partially-written store
    fn persist(&self, state: &mut StoreState) {
        if let Err(e) = self.write_rule_file(&state.file) {
            tracing::warn!("Failed to persist rules to {}: {}", self.path.display(), e);
            return;
        }
        // Refresh the stored mtime so the watcher does not reload our own write
        state.last_mtime = file_mtime(&self.path);
    }

    fn write_rule_file(&self, file: &RuleFile) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(file)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

/// Cancellation handle for the rule-file watcher
pub struct RuleWatcherHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl RuleWatcherHandle {
    /// Stop the watcher and wait for the task to finish
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}

fn load_rule_file(path: &Path) -> RuleFile {
    if !path.exists() {
        return RuleFile::default();
    }
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(
                    "Rule file {} is corrupt ({}); starting with an empty rule set",
                    path.display(),
                    e
                );
                RuleFile::default()
            }
        },
        Err(e) => {
            tracing::warn!("Failed to read rule file {}: {}", path.display(), e);
            RuleFile::default()
        }
    }
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> RuleStore {
        RuleStore::open(dir.path().join("rules.json"))
    }

    #[test]
    fn test_missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.list_rules().is_empty());
        assert_eq!(store.get_decision("restart_container", None), None);
    }

    #[test]
    fn test_corrupt_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = RuleStore::open(&path);
        assert!(store.list_rules().is_empty());
    }

    #[test]
    fn test_add_rule_prepends_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.add_rule("restart_container", RuleDecision::Deny, "", HashMap::new());
        store.add_rule("pull_image", RuleDecision::Allow, "trusted registry", HashMap::new());

        let rules = store.list_rules();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].operation, "pull_image");

        // A fresh store sees the persisted state
        let reopened = RuleStore::open(store.path());
        assert_eq!(reopened.list_rules().len(), 2);
        assert_eq!(
            reopened.get_decision("restart_container", None),
            Some(RuleDecision::Deny)
        );
    }

    #[test]
    fn test_params_must_all_match() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut params = HashMap::new();
        params.insert("env".to_string(), "prod".to_string());
        store.add_rule("delete_container", RuleDecision::Deny, "", params);

        let mut supplied = HashMap::new();
        supplied.insert("env".to_string(), "prod".to_string());
        assert_eq!(
            store.get_decision("delete_container", Some(&supplied)),
            Some(RuleDecision::Deny)
        );

        supplied.insert("env".to_string(), "staging".to_string());
        assert_eq!(store.get_decision("delete_container", Some(&supplied)), None);

        // Gate-style lookups carry no params, so a params rule never matches them
        assert_eq!(store.get_decision("delete_container", None), None);
    }

    #[test]
    fn test_recency_outranks_specificity() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut prod = HashMap::new();
        prod.insert("env".to_string(), "prod".to_string());
        store.add_rule("x", RuleDecision::Deny, "", prod.clone());
        store.add_rule("x", RuleDecision::Allow, "", HashMap::new());

        // The later, unconditional rule wins even for the params the older
        // rule named.
        assert_eq!(store.get_decision("x", Some(&prod)), Some(RuleDecision::Allow));
    }

    #[test]
    fn test_reset_clears_rules() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.add_rule("restart_container", RuleDecision::Allow, "", HashMap::new());
        store.reset();

        assert!(store.list_rules().is_empty());
        assert!(RuleStore::open(store.path()).list_rules().is_empty());
    }

    #[test]
    fn test_reload_picks_up_external_edit() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.add_rule("restart_container", RuleDecision::Allow, "", HashMap::new());

        // Simulate another process rewriting the file
        std::thread::sleep(Duration::from_millis(20));
        let external = RuleFile {
            version: RULE_FILE_VERSION.to_string(),
            rules: vec![Rule {
                operation: "delete_container".to_string(),
                decision: RuleDecision::Deny,
                created_at: Utc::now().to_rfc3339(),
                context: "edited out of band".to_string(),
                params: HashMap::new(),
            }],
        };
        std::fs::write(store.path(), serde_json::to_string_pretty(&external).unwrap()).unwrap();

        assert!(store.reload_if_changed());
        assert_eq!(
            store.get_decision("delete_container", None),
            Some(RuleDecision::Deny)
        );
        assert_eq!(store.get_decision("restart_container", None), None);

        // Unchanged file: no reload
        assert!(!store.reload_if_changed());
    }

    #[tokio::test]
    async fn test_watcher_reloads_and_shuts_down() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.add_rule("restart_container", RuleDecision::Allow, "", HashMap::new());

        let handle = store.spawn_watcher(Duration::from_millis(25));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let external = RuleFile {
            version: RULE_FILE_VERSION.to_string(),
            rules: Vec::new(),
        };
        std::fs::write(store.path(), serde_json::to_string_pretty(&external).unwrap()).unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(store.list_rules().is_empty());

        handle.shutdown().await;
    }
}
