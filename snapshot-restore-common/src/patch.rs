//! Idempotent configuration patching for cooperating packages
//!
//! A rule locates its target line structurally (optional `[section]` plus a
//! `key=` prefix) instead of by line number, checks whether the desired text
//! is already there, and only then rewrites the line. When the anchor can no
//! longer be found the rule is reported as flagged and the file is left alone.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// How to find the line a rule applies to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Anchor {
    /// INI-style section the key must live in (e.g. "Service")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,

    /// Key at the start of the line, before `=`
    pub key: String,

    /// Also accept a commented-out `#key=` line when no active one exists
    #[serde(default)]
    pub match_commented: bool,
}

/// Change made to the anchored line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LineEdit {
    /// Append text to the end of the line
    Append { text: String },
    /// Replace the first occurrence of `from`
    Replace { from: String, to: String },
    /// Replace the whole line
    SetLine { line: String },
}

impl LineEdit {
    /// Text the edit introduces; must contain the rule's marker
    fn inserted_text(&self) -> &str {
        match self {
            LineEdit::Append { text } => text,
            LineEdit::Replace { to, .. } => to,
            LineEdit::SetLine { line } => line,
        }
    }
}

/// A single patch against a file owned by another package
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatchRule {
    /// Name used in logs
    pub name: String,
    pub file: PathBuf,
    pub anchor: Anchor,
    /// Substring whose presence on the target line means "already patched"
    pub marker: String,
    pub edit: LineEdit,
}

/// What happened (or would happen) when applying a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    AlreadyApplied,
    /// The target file does not exist
    FileMissing,
    /// No line matches the anchor, the file layout probably changed
    AnchorMissing,
    /// The anchored line exists but the edit cannot be made on it
    NotApplicable,
}

impl PatchOutcome {
    /// Outcomes that need a human to look at the target file
    pub fn is_flagged(&self) -> bool {
        matches!(
            self,
            PatchOutcome::FileMissing | PatchOutcome::AnchorMissing | PatchOutcome::NotApplicable
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PatchOutcome::Applied => "applied",
            PatchOutcome::AlreadyApplied => "already applied",
            PatchOutcome::FileMissing => "file missing",
            PatchOutcome::AnchorMissing => "anchor not found",
            PatchOutcome::NotApplicable => "edit not applicable",
        }
    }
}

struct Target {
    index: usize,
    commented: bool,
}

fn sets_key(line: &str, key: &str) -> bool {
    line.strip_prefix(key)
        .is_some_and(|rest| rest.trim_start().starts_with('='))
}

fn section_header(line: &str) -> Option<&str> {
    line.strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .map(str::trim)
}

fn split_ending(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}

/// Whether a `key=` line assigns nothing, like systemd's `ExecStart=` reset
fn has_empty_value(line: &str, key: &str) -> bool {
    line[key.len()..]
        .trim_start()
        .strip_prefix('=')
        .is_some_and(|value| value.trim().is_empty())
}

/// Locate the line to edit
///
/// With `skip_empty`, active lines without a value are passed over in favour
/// of a later one that has a value; they are still used when nothing else
/// matches.
fn find_target(lines: &[&str], anchor: &Anchor, skip_empty: bool) -> Option<Target> {
    let mut section: Option<&str> = None;
    let mut commented = None;
    let mut empty = None;

    for (index, raw) in lines.iter().enumerate() {
        let line = split_ending(raw).0.trim();

        if let Some(name) = section_header(line) {
            section = Some(name);
            continue;
        }

        if let Some(wanted) = &anchor.section {
            if section != Some(wanted.as_str()) {
                continue;
            }
        }

        if sets_key(line, &anchor.key) {
            if skip_empty && has_empty_value(line, &anchor.key) {
                empty.get_or_insert(index);
                continue;
            }
            return Some(Target {
                index,
                commented: false,
            });
        }

        if anchor.match_commented && commented.is_none() {
            if let Some(rest) = line.strip_prefix('#') {
                if sets_key(rest.trim_start_matches('#').trim_start(), &anchor.key) {
                    commented = Some(index);
                }
            }
        }
    }

    empty
        .map(|index| Target {
            index,
            commented: false,
        })
        .or(commented.map(|index| Target {
            index,
            commented: true,
        }))
}

fn uncomment(line: &str) -> String {
    let indent_len = line.len() - line.trim_start().len();
    let (indent, rest) = line.split_at(indent_len);
    format!("{}{}", indent, rest.trim_start_matches('#').trim_start())
}

impl PatchRule {
    /// Check that applying the rule twice cannot insert its text twice
    pub fn validate(&self) -> Result<(), String> {
        if self.marker.is_empty() {
            return Err(format!("Patch '{}': marker cannot be empty", self.name));
        }
        if self.anchor.key.trim().is_empty() {
            return Err(format!("Patch '{}': anchor key cannot be empty", self.name));
        }
        if !self.edit.inserted_text().contains(&self.marker) {
            return Err(format!(
                "Patch '{}': edit does not contain marker '{}'",
                self.name, self.marker
            ));
        }
        Ok(())
    }

    /// Apply the rule to file contents
    ///
    /// Returns the outcome and the resulting text, which is identical to the
    /// input unless the outcome is [`PatchOutcome::Applied`].
    pub fn apply_to_text(&self, text: &str) -> (PatchOutcome, String) {
        let lines: Vec<&str> = text.split_inclusive('\n').collect();

        let skip_empty = matches!(self.edit, LineEdit::Replace { .. });
        let Some(target) = find_target(&lines, &self.anchor, skip_empty) else {
            return (PatchOutcome::AnchorMissing, text.to_string());
        };

        let (current, ending) = split_ending(lines[target.index]);

        if !target.commented && current.contains(&self.marker) {
            return (PatchOutcome::AlreadyApplied, text.to_string());
        }

        let base = if target.commented {
            uncomment(current)
        } else {
            current.to_string()
        };

        let replaced = match &self.edit {
            LineEdit::Append { text } => format!("{}{}", base.trim_end(), text),
            LineEdit::Replace { from, to } => {
                if !base.contains(from.as_str()) {
                    return (PatchOutcome::NotApplicable, text.to_string());
                }
                base.replacen(from.as_str(), to, 1)
            }
            LineEdit::SetLine { line } => line.clone(),
        };

        let mut out = String::with_capacity(text.len() + replaced.len());
        for (index, line) in lines.iter().enumerate() {
            if index == target.index {
                out.push_str(&replaced);
                out.push_str(ending);
            } else {
                out.push_str(line);
            }
        }

        (PatchOutcome::Applied, out)
    }

    /// Apply the rule to its file; with `dry_run` nothing is written
    pub fn apply(&self, dry_run: bool) -> Result<PatchOutcome> {
        self.validate().map_err(|e| anyhow::anyhow!(e))?;

        if !self.file.exists() {
            log::warn!("Patch '{}': {} does not exist", self.name, self.file.display());
            return Ok(PatchOutcome::FileMissing);
        }

        let content = fs::read_to_string(&self.file)
            .with_context(|| format!("Failed to read {}", self.file.display()))?;

        let (outcome, patched) = self.apply_to_text(&content);

        match outcome {
            PatchOutcome::Applied if !dry_run => {
                write_replacing(&self.file, &patched)?;
                log::info!("Patch '{}' applied to {}", self.name, self.file.display());
            }
            PatchOutcome::Applied | PatchOutcome::AlreadyApplied => {
                log::debug!("Patch '{}': {}", self.name, outcome.as_str());
            }
            flagged => {
                log::warn!(
                    "Patch '{}' needs attention in {}: {}",
                    self.name,
                    self.file.display(),
                    flagged.as_str()
                );
            }
        }

        Ok(outcome)
    }
}

/// Replace a file's contents through a temporary sibling and a rename
fn write_replacing(path: &Path, content: &str) -> Result<()> {
    let file_name = path
        .file_name()
        .with_context(|| format!("Invalid file path {}", path.display()))?;
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

    let permissions = fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .permissions();

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .with_context(|| format!("Failed to open temporary file {}", tmp_path.display()))?;
        file.write_all(content.as_bytes())
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("Failed to sync {}", tmp_path.display()))?;
    }

    fs::set_permissions(&tmp_path, permissions)
        .with_context(|| format!("Failed to set permissions on {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;

    Ok(())
}

/// Rules shipped by default
pub fn default_rules() -> Vec<PatchRule> {
    vec![
        // Let grub-btrfsd follow Timeshift's snapshot directory
        PatchRule {
            name: "grub-btrfsd-timeshift-auto".to_string(),
            file: PathBuf::from("/usr/lib/systemd/system/grub-btrfsd.service"),
            anchor: Anchor {
                section: Some("Service".to_string()),
                key: "ExecStart".to_string(),
                match_commented: false,
            },
            marker: "--timeshift-auto".to_string(),
            edit: LineEdit::Replace {
                from: "/.snapshots".to_string(),
                to: "--timeshift-auto".to_string(),
            },
        },
        PatchRule {
            name: "grub-btrfs-submenu-name".to_string(),
            file: PathBuf::from("/etc/default/grub-btrfs/config"),
            anchor: Anchor {
                section: None,
                key: "GRUB_BTRFS_SUBMENUNAME".to_string(),
                match_commented: true,
            },
            marker: "GRUB_BTRFS_SUBMENUNAME=\"Timeshift snapshots\"".to_string(),
            edit: LineEdit::SetLine {
                line: "GRUB_BTRFS_SUBMENUNAME=\"Timeshift snapshots\"".to_string(),
            },
        },
    ]
}
