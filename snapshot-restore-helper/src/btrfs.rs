// Btrfs queries for snapshot-restore-helper

use anyhow::{Context, Result, bail};
use snapshot_restore_common::{CommandRunner, CommandSpec, RestoreConfig};

/// Name of the normal root subvolume in Timeshift's layout
pub const ROOT_SUBVOLUME: &str = "@";

/// Check a `btrfs subvolume list` listing for a subvolume path
///
/// Lines look like `ID 256 gen 1234 top level 5 path @`.
pub fn listing_has_subvolume(listing: &str, subvol: &str) -> bool {
    listing.lines().any(|line| {
        line.split_once(" path ")
            .is_some_and(|(_, path)| path.trim() == subvol)
    })
}

/// Whether the original `@` root subvolume still exists
pub fn root_subvolume_exists<R: CommandRunner + ?Sized>(
    runner: &R,
    config: &RestoreConfig,
) -> Result<bool> {
    let output = runner
        .run(&CommandSpec::new(&config.btrfs_bin).args(["subvolume", "list", "/"]))
        .context("Failed to list btrfs subvolumes")?;

    if !output.success() {
        bail!("btrfs subvolume list failed: {}", output.failure_reason());
    }

    Ok(listing_has_subvolume(&output.stdout, ROOT_SUBVOLUME))
}
