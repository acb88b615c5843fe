//! Structured audit logging for privileged operations

use chrono::Utc;

/// Audit log entry for security-relevant events
#[derive(Debug, serde::Serialize)]
struct AuditEvent {
    timestamp: String,
    user_id: String,
    user_name: Option<String>,
    process_id: u32,
    operation: String,
    resource: String,
    result: String,
    details: Option<String>,
}

impl AuditEvent {
    fn new(operation: &str, resource: &str, success: bool) -> Self {
        let user_id = caller_uid();
        let user_name = get_username_from_uid(&user_id);

        Self {
            timestamp: Utc::now().to_rfc3339(),
            user_id,
            user_name,
            process_id: std::process::id(),
            operation: operation.to_string(),
            resource: resource.to_string(),
            result: if success { "success" } else { "failure" }.to_string(),
            details: None,
        }
    }

    fn with_details(mut self, details: Option<&str>) -> Self {
        self.details = details.map(str::to_string);
        self
    }

    /// Log the audit event as structured JSON
    fn log(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            log::info!(target: "audit", "{json}");
        } else {
            log::info!(
                target: "audit",
                "user={} pid={} operation={} resource={} result={}",
                self.user_id,
                self.process_id,
                self.operation,
                self.resource,
                self.result
            );
        }
    }
}

/// UID of the user who asked for the operation
///
/// pkexec records the invoking user in `PKEXEC_UID`; otherwise this is the
/// real UID of the process.
fn caller_uid() -> String {
    std::env::var("PKEXEC_UID").unwrap_or_else(|_| nix::unistd::getuid().to_string())
}

/// Get username from UID (best effort)
fn get_username_from_uid(uid_str: &str) -> Option<String> {
    use std::process::Command;

    let output = Command::new("id")
        .arg("-un")
        .arg(uid_str)
        .output()
        .ok()?;

    if output.status.success() {
        String::from_utf8(output.stdout)
            .ok()
            .map(|s| s.trim().to_string())
    } else {
        None
    }
}

/// Log a snapshot restore attempt
pub fn log_snapshot_restore(snapshot_name: &str, success: bool, error: Option<&str>) {
    AuditEvent::new("restore_snapshot", snapshot_name, success)
        .with_details(error)
        .log();
}

/// Log a change to another package's configuration or services
pub fn log_config_change(resource: &str, success: bool, details: Option<&str>) {
    AuditEvent::new("modify_configuration", resource, success)
        .with_details(details)
        .log();
}
