//! File-permission audit for sensitive files
//!
//! Checks that the files this crate writes secrets and policy into are not
//! readable by group or others. Pure inspection; rendering and remediation
//! belong to the CLI layer.

use std::path::{Path, PathBuf};

use serde::Serialize;

/// Files worth auditing by default
pub const SENSITIVE_FILES: &[&str] = &["permissions_rules.json", "ssh_keys.enc"];

/// Outcome of a single file check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileModeStatus {
    /// No group/other access bits set
    Secure,
    /// Group or others can read, write, or execute
    Insecure,
    /// The file does not exist
    Missing,
}

/// Report for one audited file
#[derive(Debug, Clone, Serialize)]
pub struct FileModeReport {
    /// The audited path
    pub path: PathBuf,
    /// Whether the mode is acceptable
    pub status: FileModeStatus,
    /// The last three octal digits of the mode, when the file exists
    pub mode: Option<String>,
}

/// Audit the access modes of the given files
pub fn audit_file_modes<I, P>(paths: I) -> Vec<FileModeReport>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    paths
        .into_iter()
        .map(|p| audit_file_mode(p.as_ref()))
        .collect()
}

/// Audit a single file's access mode
pub fn audit_file_mode(path: &Path) -> FileModeReport {
    match std::fs::metadata(path) {
        Ok(metadata) => {
            let (status, mode) = inspect_mode(&metadata);
            FileModeReport {
                path: path.to_path_buf(),
                status,
                mode: Some(mode),
            }
        }
        Err(_) => FileModeReport {
            path: path.to_path_buf(),
            status: FileModeStatus::Missing,
            mode: None,
        },
    }
}

#[cfg(unix)]
fn inspect_mode(metadata: &std::fs::Metadata) -> (FileModeStatus, String) {
    use std::os::unix::fs::PermissionsExt;
    let mode = metadata.permissions().mode();
    let status = if mode & 0o077 == 0 {
        FileModeStatus::Secure
    } else {
        FileModeStatus::Insecure
    };
    (status, format!("{:03o}", mode & 0o777))
}

#[cfg(not(unix))]
fn inspect_mode(_metadata: &std::fs::Metadata) -> (FileModeStatus, String) {
    // No unix mode bits to inspect; presence is all we can report
    (FileModeStatus::Secure, String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_reported() {
        let dir = tempfile::tempdir().unwrap();
        let report = audit_file_mode(&dir.path().join("absent"));
        assert_eq!(report.status, FileModeStatus::Missing);
        assert!(report.mode.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_owner_only_file_is_secure() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.enc");
        std::fs::write(&path, "x").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();

        let report = audit_file_mode(&path);
        assert_eq!(report.status, FileModeStatus::Secure);
        assert_eq!(report.mode.as_deref(), Some("600"));
    }

    #[cfg(unix)]
    #[test]
    fn test_group_readable_file_is_insecure() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, "{}").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let report = audit_file_mode(&path);
        assert_eq!(report.status, FileModeStatus::Insecure);
        assert_eq!(report.mode.as_deref(), Some("644"));
    }
}
