// GRUB configuration regeneration

use anyhow::{Context, Result, bail};
use snapshot_restore_common::{CommandRunner, CommandSpec, RestoreConfig};
use std::path::Path;

/// Every boot entry of a Btrfs root carries this option
const SUBVOL_ENTRY_MARKER: &str = "rootflags=subvol=";

/// Run grub-mkconfig into the configured grub.cfg
pub fn regenerate<R: CommandRunner + ?Sized>(runner: &R, config: &RestoreConfig) -> Result<()> {
    log::info!("Regenerating {}", config.grub_cfg.display());

    let output = runner
        .run(
            &CommandSpec::new(&config.grub_mkconfig_bin)
                .arg("-o")
                .arg(config.grub_cfg.to_string_lossy()),
        )
        .context("Failed to run grub-mkconfig")?;

    if !output.success() {
        bail!("grub-mkconfig failed: {}", output.failure_reason());
    }

    Ok(())
}

/// Check that the generated configuration boots from a subvolume
pub fn verify(grub_cfg: &Path) -> Result<bool> {
    let content = std::fs::read_to_string(grub_cfg)
        .with_context(|| format!("Failed to read {}", grub_cfg.display()))?;
    Ok(content.contains(SUBVOL_ENTRY_MARKER))
}

/// Regenerate and verify in one step
pub fn regenerate_and_verify<R: CommandRunner + ?Sized>(
    runner: &R,
    config: &RestoreConfig,
) -> Result<()> {
    regenerate(runner, config)?;

    if !verify(&config.grub_cfg)? {
        bail!(
            "{} has no '{}' boot entries",
            config.grub_cfg.display(),
            SUBVOL_ENTRY_MARKER
        );
    }

    Ok(())
}
