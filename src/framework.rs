//! Rebuilding `<Name>.framework` layouts in the shared-library area.
//!
//! Tracing copies framework binaries flat under their bare name. Once all
//! tracing is done, each flat copy is moved to its recorded fragment, e.g.
//! `lib/QtCore` → `lib/QtCore.framework/Versions/A/QtCore`, with the usual
//! `Versions/Current` and top-level aliases.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::copy::create_symlink_if_missing;

/// Restructure every flat framework copy. Frameworks whose top-level
/// directory already exists are left alone, so running this twice is a no-op.
///
/// Returns the number of frameworks restructured.
pub fn reconstruct_frameworks(lib_dir: &Path, frameworks: &BTreeMap<String, String>) -> Result<usize> {
    let mut rebuilt = 0;

    for (name, fragment) in frameworks {
        let flat = lib_dir.join(name);
        let Some(top) = fragment.split('/').next() else {
            continue;
        };
        let top_dir = lib_dir.join(top);

        if top_dir.exists() || !(flat.is_file() || flat.is_symlink()) {
            continue;
        }

        let target = lib_dir.join(fragment);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        if flat.is_symlink() {
            move_link_target(lib_dir, &flat, &target)?;
        } else {
            fs::rename(&flat, &target).with_context(|| {
                format!("Failed to move {} to {}", flat.display(), target.display())
            })?;
        }

        link_versions(&top_dir, fragment, name)?;
        debug!(framework = name, fragment = fragment.as_str(), "Restructured framework");
        rebuilt += 1;
    }

    if rebuilt > 0 {
        info!("Restructured {rebuilt} framework(s)");
    }
    Ok(rebuilt)
}

/// Move the file an alias points at into place, then drop the alias. A
/// target outside `lib_dir` is copied instead, since it is not ours to move.
fn move_link_target(lib_dir: &Path, flat: &Path, target: &Path) -> Result<()> {
    let real = fs::canonicalize(flat)
        .with_context(|| format!("Failed to resolve {}", flat.display()))?;
    let owned = fs::canonicalize(lib_dir).is_ok_and(|dir| real.starts_with(dir));

    if owned {
        fs::rename(&real, target).with_context(|| {
            format!("Failed to move {} to {}", real.display(), target.display())
        })?;
    } else {
        fs::copy(&real, target).with_context(|| {
            format!("Failed to copy {} to {}", real.display(), target.display())
        })?;
    }
    fs::remove_file(flat).with_context(|| format!("Failed to remove {}", flat.display()))?;
    Ok(())
}

/// `Versions/Current -> <version>` and `<Name> -> Versions/Current/<Name>`.
fn link_versions(top_dir: &Path, fragment: &str, name: &str) -> Result<()> {
    let parts: Vec<&str> = fragment.split('/').collect();
    // <Name>.framework/Versions/<version>/<Name>
    if parts.len() < 4 || parts[1] != "Versions" {
        return Ok(());
    }
    let version = parts[2];

    create_symlink_if_missing(Path::new(version), &top_dir.join("Versions/Current"))?;
    let binary_in_current = Path::new("Versions/Current").join(parts[3..].join("/"));
    create_symlink_if_missing(&binary_in_current, &top_dir.join(name))?;
    Ok(())
}
