//! Boot-flag detection from the kernel command line
//!
//! When GRUB boots a Timeshift snapshot through grub-btrfs, the root subvolume
//! on the command line points into `timeshift-btrfs/snapshots/<name>/@`. The
//! `<name>` part is the snapshot identifier Timeshift expects on restore.

use anyhow::{Context, Result, bail};
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};

/// Substring that marks a snapshot boot
pub const SNAPSHOT_MARKER: &str = "timeshift-btrfs/snapshots/";

/// Layout of Timeshift snapshot names (e.g. `2023-10-28_12-00-00`)
pub const TIMESHIFT_NAME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Reported when the running system is not a snapshot boot
pub const NOT_SNAPSHOT_BOOT: &str = "Snapshot not detected. Did you really boot into the snapshot?";

/// Source of the running kernel command line
pub trait CmdlineSource {
    fn read_cmdline(&self) -> Result<String>;
}

/// Reads the command line from procfs (or a stand-in file)
#[derive(Debug, Clone)]
pub struct ProcCmdline {
    pub path: PathBuf,
}

impl ProcCmdline {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for ProcCmdline {
    fn default() -> Self {
        Self::new("/proc/cmdline")
    }
}

impl CmdlineSource for ProcCmdline {
    fn read_cmdline(&self) -> Result<String> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        Ok(raw.trim().to_string())
    }
}

impl CmdlineSource for str {
    fn read_cmdline(&self) -> Result<String> {
        Ok(self.trim().to_string())
    }
}

impl CmdlineSource for String {
    fn read_cmdline(&self) -> Result<String> {
        self.as_str().read_cmdline()
    }
}

/// The snapshot the system is currently booted from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRef {
    /// Timeshift snapshot name, e.g. "2023-10-28_12-00-00"
    pub name: String,
    /// Value of the `subvol=` option, if present
    pub subvol_path: Option<String>,
    /// Creation time parsed from the name
    pub taken_at: Option<NaiveDateTime>,
}

impl SnapshotRef {
    pub fn new(name: impl Into<String>, subvol_path: Option<String>) -> Self {
        let name = name.into();
        let taken_at = NaiveDateTime::parse_from_str(&name, TIMESHIFT_NAME_FORMAT).ok();
        Self {
            name,
            subvol_path,
            taken_at,
        }
    }

    /// Date for display, `dd/mm/YYYY`
    pub fn display_date(&self) -> Option<String> {
        self.taken_at.map(|t| crate::format::format_snapshot_date(&t))
    }

    /// Time of day for display, `HH:MM:SS`
    pub fn display_time(&self) -> Option<String> {
        self.taken_at.map(|t| crate::format::format_snapshot_time(&t))
    }
}

/// Check whether the command line carries the snapshot marker
pub fn is_snapshot_boot(cmdline: &str) -> bool {
    cmdline.contains(SNAPSHOT_MARKER)
}

/// Extract the snapshot identifier following the first marker
///
/// The identifier runs until the first space, `@` or `/`. Returns `None` when
/// the marker is absent.
pub fn extract_snapshot_name(cmdline: &str) -> Option<&str> {
    let start = cmdline.find(SNAPSHOT_MARKER)? + SNAPSHOT_MARKER.len();
    let rest = &cmdline[start..];
    let end = rest
        .find(|c: char| c.is_whitespace() || c == '@' || c == '/')
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

/// Extract the value of the first `subvol=` option
///
/// Handles both a bare `subvol=` and one nested in `rootflags=`.
pub fn extract_subvol(cmdline: &str) -> Option<&str> {
    const KEY: &str = "subvol=";

    let start = cmdline.find(KEY)? + KEY.len();
    let rest = &cmdline[start..];
    let end = rest
        .find(|c: char| c.is_whitespace() || c == ',')
        .unwrap_or(rest.len());
    let value = &rest[..end];

    if value.is_empty() { None } else { Some(value) }
}

/// Parse a command line into a snapshot reference
///
/// `Ok(None)` means the system was booted normally.
pub fn parse_cmdline(cmdline: &str) -> Result<Option<SnapshotRef>> {
    if !is_snapshot_boot(cmdline) {
        return Ok(None);
    }

    let Some(name) = extract_snapshot_name(cmdline) else {
        return Ok(None);
    };

    if let Err(e) = crate::validate_snapshot_name(name) {
        bail!("Could not parse snapshot information: {}", e);
    }

    Ok(Some(SnapshotRef::new(
        name,
        extract_subvol(cmdline).map(str::to_string),
    )))
}

/// Read the command line from `source` and detect a snapshot boot
pub fn detect<S: CmdlineSource + ?Sized>(source: &S) -> Result<Option<SnapshotRef>> {
    let cmdline = source.read_cmdline()?;
    let detected = parse_cmdline(&cmdline)?;

    match &detected {
        Some(snapshot) => log::info!("Booted from snapshot {}", snapshot.name),
        None => log::debug!("Not a snapshot boot"),
    }

    Ok(detected)
}

/// Detect from a command-line file
pub fn detect_from_path(path: &Path) -> Result<Option<SnapshotRef>> {
    detect(&ProcCmdline::new(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SNAPSHOT_CMDLINE: &str = "BOOT_IMAGE=/timeshift-btrfs/snapshots/2023-10-28_12-00-00/@/boot/vmlinuz-linux \
        root=UUID=1234-abcd rw rootflags=subvol=timeshift-btrfs/snapshots/2023-10-28_12-00-00/@ quiet splash";

    #[test]
    fn test_extracts_name_between_marker_and_at() {
        let cmdline = "root=UUID=x rootflags=subvol=timeshift-btrfs/snapshots/2023-10-28_12-00-00@ quiet";
        assert_eq!(
            extract_snapshot_name(cmdline),
            Some("2023-10-28_12-00-00")
        );
    }

    #[test]
    fn test_extracts_name_terminated_by_slash_space_or_end() {
        assert_eq!(
            extract_snapshot_name("x=timeshift-btrfs/snapshots/abc/@ y"),
            Some("abc")
        );
        assert_eq!(
            extract_snapshot_name("x=timeshift-btrfs/snapshots/abc y"),
            Some("abc")
        );
        assert_eq!(
            extract_snapshot_name("x=timeshift-btrfs/snapshots/abc"),
            Some("abc")
        );
    }

    #[test]
    fn test_first_marker_wins() {
        assert_eq!(
            extract_snapshot_name(SNAPSHOT_CMDLINE),
            Some("2023-10-28_12-00-00")
        );
        let two = "a=timeshift-btrfs/snapshots/first/@ b=timeshift-btrfs/snapshots/second/@";
        assert_eq!(extract_snapshot_name(two), Some("first"));
    }

    #[test]
    fn test_marker_absent() {
        let cmdline = "BOOT_IMAGE=/@/boot/vmlinuz-linux root=UUID=1234 rw rootflags=subvol=@ quiet";
        assert!(!is_snapshot_boot(cmdline));
        assert_eq!(extract_snapshot_name(cmdline), None);
        assert_eq!(parse_cmdline(cmdline).unwrap(), None);
    }

    #[test]
    fn test_extract_subvol() {
        assert_eq!(
            extract_subvol(SNAPSHOT_CMDLINE),
            Some("timeshift-btrfs/snapshots/2023-10-28_12-00-00/@")
        );
        assert_eq!(
            extract_subvol("rootflags=subvol=@,compress=zstd quiet"),
            Some("@")
        );
        assert_eq!(extract_subvol("root=/dev/sda1 quiet"), None);
    }

    #[test]
    fn test_parse_cmdline_builds_snapshot_ref() {
        let snapshot = parse_cmdline(SNAPSHOT_CMDLINE).unwrap().unwrap();
        assert_eq!(snapshot.name, "2023-10-28_12-00-00");
        assert_eq!(
            snapshot.subvol_path.as_deref(),
            Some("timeshift-btrfs/snapshots/2023-10-28_12-00-00/@")
        );
        assert_eq!(snapshot.display_date().as_deref(), Some("28/10/2023"));
        assert_eq!(snapshot.display_time().as_deref(), Some("12:00:00"));
    }

    #[test]
    fn test_empty_identifier_is_an_error() {
        let cmdline = "rootflags=subvol=timeshift-btrfs/snapshots/@ quiet";
        assert!(is_snapshot_boot(cmdline));
        assert!(parse_cmdline(cmdline).is_err());
    }

    #[test]
    fn test_name_without_timestamp_has_no_date() {
        let snapshot = SnapshotRef::new("manual", None);
        assert_eq!(snapshot.taken_at, None);
        assert_eq!(snapshot.display_date(), None);
    }

    #[test]
    fn test_detect_from_injected_text() {
        let detected = detect(SNAPSHOT_CMDLINE).unwrap();
        assert_eq!(detected.unwrap().name, "2023-10-28_12-00-00");

        let normal = String::from("root=UUID=1234 rw quiet");
        assert_eq!(detect(&normal).unwrap(), None);
    }

    #[test]
    fn test_detect_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", SNAPSHOT_CMDLINE).unwrap();

        let detected = detect_from_path(file.path()).unwrap().unwrap();
        assert_eq!(detected.name, "2023-10-28_12-00-00");
    }

    #[test]
    fn test_detect_missing_file_is_error() {
        let source = ProcCmdline::new("/nonexistent/cmdline");
        assert!(detect(&source).is_err());
    }
}
