// Centralized configuration for snapshot-restore

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::patch::{self, PatchRule};

/// Default location of the system configuration file
pub const DEFAULT_CONFIG_FILE: &str = "/etc/snapshot-restore/config.toml";

/// snapshot-restore configuration, read from TOML with environment overrides
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RestoreConfig {
    /// Kernel command line to inspect (default: /proc/cmdline)
    pub cmdline_path: PathBuf,

    /// Timeshift executable
    pub timeshift_bin: String,

    /// Process name of the Timeshift GUI, killed before restoring
    pub timeshift_gui_process: String,

    /// btrfs executable, used to check the root subvolume
    pub btrfs_bin: String,

    /// grub-mkconfig executable
    pub grub_mkconfig_bin: String,

    /// Generated GRUB configuration (default: /boot/grub/grub.cfg)
    pub grub_cfg: PathBuf,

    /// Regenerate grub.cfg after a successful restore
    pub regenerate_grub: bool,

    /// systemctl executable
    pub systemctl_bin: String,

    /// Privilege elevation program used by the dispatcher
    pub pkexec_bin: String,

    /// Installed path of snapshot-restore-helper
    pub helper_path: PathBuf,

    /// Command run for the reboot action
    pub reboot_command: Vec<String>,

    /// Background service that keeps the GRUB snapshot menu current
    pub watcher_service: String,

    /// User-session unit running the boot-flag detector
    pub detect_unit: String,

    /// Address the confirmation page listens on
    pub ui_bind: String,

    /// Command used to open the confirmation page; the URL is appended
    pub browser_command: Vec<String>,

    /// Patches applied to cooperating packages' files
    #[serde(rename = "patch")]
    pub patches: Vec<PatchRule>,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            cmdline_path: PathBuf::from("/proc/cmdline"),
            timeshift_bin: "timeshift".to_string(),
            timeshift_gui_process: "timeshift-gtk".to_string(),
            btrfs_bin: "btrfs".to_string(),
            grub_mkconfig_bin: "grub-mkconfig".to_string(),
            grub_cfg: PathBuf::from("/boot/grub/grub.cfg"),
            regenerate_grub: true,
            systemctl_bin: "systemctl".to_string(),
            pkexec_bin: "pkexec".to_string(),
            helper_path: PathBuf::from("/usr/lib/snapshot-restore/snapshot-restore-helper"),
            reboot_command: vec!["systemctl".to_string(), "reboot".to_string()],
            watcher_service: "grub-btrfsd.service".to_string(),
            detect_unit: "snapshot-restore-detect.service".to_string(),
            ui_bind: "127.0.0.1:0".to_string(),
            browser_command: vec!["xdg-open".to_string()],
            patches: patch::default_rules(),
        }
    }
}

impl RestoreConfig {
    /// Load the configuration the binaries run with
    ///
    /// Reads `SNAPSHOT_RESTORE_CONFIG` (or the default file) if present and
    /// then applies environment overrides:
    /// - SNAPSHOT_RESTORE_CMDLINE: Override the kernel command line file
    /// - SNAPSHOT_RESTORE_GRUB_CFG: Override the generated grub.cfg path
    /// - SNAPSHOT_RESTORE_HELPER: Override the helper binary path
    /// - SNAPSHOT_RESTORE_UI_BIND: Override the confirmation page address
    pub fn load() -> Result<Self> {
        let path = std::env::var_os("SNAPSHOT_RESTORE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut config = Self::load_from_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from a TOML file; a missing file yields the defaults
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No configuration at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid configuration in {}: {}", path.display(), e))?;

        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("SNAPSHOT_RESTORE_CMDLINE") {
            self.cmdline_path = PathBuf::from(path);
        }

        if let Some(path) = lookup("SNAPSHOT_RESTORE_GRUB_CFG") {
            self.grub_cfg = PathBuf::from(path);
        }

        if let Some(path) = lookup("SNAPSHOT_RESTORE_HELPER") {
            self.helper_path = PathBuf::from(path);
        }

        if let Some(bind) = lookup("SNAPSHOT_RESTORE_UI_BIND") {
            self.ui_bind = bind;
        }
    }

    /// Check values that would otherwise fail much later
    pub fn validate(&self) -> Result<(), String> {
        if self.reboot_command.is_empty() {
            return Err("reboot_command cannot be empty".to_string());
        }

        if self.browser_command.is_empty() {
            return Err("browser_command cannot be empty".to_string());
        }

        for rule in &self.patches {
            rule.validate()?;
        }

        Ok(())
    }
}
