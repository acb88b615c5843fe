// Shared types and utilities for snapshot-restore

pub mod action;
pub mod cmdline;
pub mod command;
pub mod config;
pub mod format;
pub mod page;
pub mod patch;

pub use action::{Action, ActionOutcome};
pub use cmdline::{CmdlineSource, ProcCmdline, SnapshotRef};
pub use command::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};
pub use config::RestoreConfig;
pub use page::{PageState, PageView};
pub use patch::{Anchor, LineEdit, PatchOutcome, PatchRule};

/// Result of a privileged operation, as reported back to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
}

impl OperationResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Validate a snapshot name taken from the kernel command line
///
/// The name ends up as an argument to `timeshift --snapshot`, so it is held to
/// the same rules as a single path component.
///
/// # Validation Rules
/// - Name must not be empty and must be ≤ 255 characters
/// - Cannot contain `/`, `@`, whitespace, null bytes, or `..`
/// - Cannot start with `-` or `.`
pub fn validate_snapshot_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Snapshot name cannot be empty".to_string());
    }

    if name.len() > 255 {
        return Err("Snapshot name too long (max 255 characters)".to_string());
    }

    if name.contains('/') {
        return Err("Snapshot name cannot contain '/'".to_string());
    }

    if name.contains('@') {
        return Err("Snapshot name cannot contain '@'".to_string());
    }

    if name.chars().any(char::is_whitespace) {
        return Err("Snapshot name cannot contain whitespace".to_string());
    }

    if name.contains('\0') {
        return Err("Snapshot name cannot contain null bytes".to_string());
    }

    if name.contains("..") {
        return Err("Snapshot name cannot contain '..'".to_string());
    }

    // Would be parsed as an option by timeshift
    if name.starts_with('-') {
        return Err("Snapshot name cannot start with '-'".to_string());
    }

    if name.starts_with('.') {
        return Err("Snapshot name cannot start with '.'".to_string());
    }

    Ok(())
}
