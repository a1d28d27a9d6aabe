//! File and library copying utilities.
//!
//! Every copy follows one rule: an existing destination is never
//! overwritten, so the first writer wins.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::paths::normalize_path;

/// Add owner write permission (build stores hand out read-only files).
pub fn make_writable(path: &Path) -> Result<()> {
    let mut perms = fs::metadata(path)
        .with_context(|| format!("Failed to read metadata: {}", path.display()))?
        .permissions();
    if perms.mode() & 0o200 != 0 {
        return Ok(());
    }
    perms.set_mode(perms.mode() | 0o200);
    fs::set_permissions(path, perms)
        .with_context(|| format!("Failed to set permissions: {}", path.display()))?;
    Ok(())
}

/// Merge a directory into `dst` recursively, never overwriting existing
/// entries.
///
/// Relative symlinks that stay inside `src` are recreated as-is. A symlink
/// that is absolute or leaves `src` (build stores are full of them) is
/// replaced by a copy of what it resolves to, so the content ends up in the
/// bundle. Dangling links are skipped.
///
/// Returns `(destination, source)` for every regular file newly copied,
/// where `source` is the resolved real path.
pub fn merge_dir(src: &Path, dst: &Path) -> Result<Vec<(PathBuf, PathBuf)>> {
    let mut copied = Vec::new();
    if !src.is_dir() {
        return Ok(copied);
    }
    let anchor = fs::canonicalize(src)
        .with_context(|| format!("Failed to resolve {}", src.display()))?;
    merge_into(src, dst, &anchor, Path::new(""), LinkMode::Resolve, &mut copied)?;
    Ok(copied)
}

/// Copy a directory into `dst` recursively with every symlink recreated
/// verbatim, absolute targets included.
pub fn mirror_dir(src: &Path, dst: &Path) -> Result<()> {
    if !src.is_dir() {
        return Ok(());
    }
    merge_into(src, dst, src, Path::new(""), LinkMode::Verbatim, &mut Vec::new())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum LinkMode {
    Verbatim,
    Resolve,
}

/// `anchor` is the canonical merge root and `rel_dir` is `src` relative to it.
fn merge_into(
    src: &Path,
    dst: &Path,
    anchor: &Path,
    rel_dir: &Path,
    mode: LinkMode,
    copied: &mut Vec<(PathBuf, PathBuf)>,
) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("Failed to create {}", dst.display()))?;

    for entry in fs::read_dir(src).with_context(|| format!("Failed to read {}", src.display()))? {
        let entry = entry?;
        let path = entry.path();
        let dest_path = dst.join(entry.file_name());
        let occupied = dest_path.exists() || dest_path.is_symlink();

        if path.is_symlink() {
            let target = fs::read_link(&path)?;
            // Judged on the link text alone, so an alias of an escaping link
            // stays an alias
            let internal =
                target.is_relative() && normalize_path(&rel_dir.join(&target)).is_some();

            if mode == LinkMode::Verbatim || internal {
                if !occupied {
                    std::os::unix::fs::symlink(&target, &dest_path)?;
                }
                continue;
            }
            let Ok(resolved) = fs::canonicalize(&path) else {
                debug!(link = %path.display(), "Skipping dangling symlink");
                continue;
            };
            if resolved.is_dir() {
                // A link back to an ancestor would recurse forever
                if anchor.starts_with(&resolved) {
                    debug!(link = %path.display(), "Skipping symlink to enclosing directory");
                    continue;
                }
                merge_into(&resolved, &dest_path, &resolved, Path::new(""), mode, copied)?;
            } else if !occupied {
                copy_file(&resolved, &dest_path)?;
                copied.push((dest_path, resolved));
            }
        } else if path.is_dir() {
            merge_into(&path, &dest_path, anchor, &rel_dir.join(entry.file_name()), mode, copied)?;
        } else if !occupied {
            copy_file(&path, &dest_path)?;
            let origin = fs::canonicalize(&path).unwrap_or(path);
            copied.push((dest_path, origin));
        }
    }
    Ok(())
}

fn copy_file(src: &Path, dest: &Path) -> Result<()> {
    fs::copy(src, dest)
        .with_context(|| format!("Failed to copy {} to {}", src.display(), dest.display()))?;
    make_writable(dest)
}

/// Result of placing one library into the shared-library area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryCopy {
    /// `<lib_dir>/<bare name>`; a regular file or a symlink to the real file.
    pub dest: PathBuf,
    /// Whether anything was written.
    pub copied: bool,
}

/// Copy a library into `lib_dir` under its bare name, handling symlinks.
///
/// If the source is a symlink whose resolved file has a different name, the
/// resolved file is copied under its own name and `dest` becomes a relative
/// symlink to it.
pub fn copy_library_to(src: &Path, lib_dir: &Path) -> Result<LibraryCopy> {
    let lib_name = src
        .file_name()
        .with_context(|| format!("Library path has no file name: {}", src.display()))?;
    let dest_path = lib_dir.join(lib_name);

    if dest_path.exists() || dest_path.is_symlink() {
        return Ok(LibraryCopy {
            dest: dest_path,
            copied: false,
        });
    }

    fs::create_dir_all(lib_dir)
        .with_context(|| format!("Failed to create {}", lib_dir.display()))?;

    if src.is_symlink() {
        let actual_src = fs::canonicalize(src)
            .with_context(|| format!("Dangling library symlink: {}", src.display()))?;
        let target_name = actual_src
            .file_name()
            .with_context(|| format!("Library path has no file name: {}", actual_src.display()))?;

        if target_name != lib_name {
            // Copy the actual file first, then point the requested name at it
            let target_dest = lib_dir.join(target_name);
            if !target_dest.exists() {
                fs::copy(&actual_src, &target_dest)?;
                make_writable(&target_dest)?;
            }
            std::os::unix::fs::symlink(target_name, &dest_path)?;
            return Ok(LibraryCopy {
                dest: dest_path,
                copied: true,
            });
        }
    }

    fs::copy(src, &dest_path).with_context(|| {
        format!("Failed to copy {} to {}", src.display(), dest_path.display())
    })?;
    make_writable(&dest_path)?;

    Ok(LibraryCopy {
        dest: dest_path,
        copied: true,
    })
}

/// Create a symlink if it doesn't already exist.
///
/// Returns `Ok(true)` if the symlink was created, `Ok(false)` if it already existed.
pub fn create_symlink_if_missing(target: &Path, link: &Path) -> Result<bool> {
    if link.exists() || link.is_symlink() {
        return Ok(false);
    }
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)?;
    }
    std::os::unix::fs::symlink(target, link).with_context(|| {
        format!(
            "Failed to create symlink {} -> {}",
            link.display(),
            target.display()
        )
    })?;
    Ok(true)
}

/// Remove every empty directory below `root` (not `root` itself), deepest first.
///
/// Returns the number of directories removed.
pub fn remove_empty_dirs(root: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_dir() {
            continue;
        }
        let is_empty = fs::read_dir(entry.path())
            .map(|mut it| it.next().is_none())
            .unwrap_or(false);
        if is_empty {
            fs::remove_dir(entry.path())
                .with_context(|| format!("Failed to remove {}", entry.path().display()))?;
            removed += 1;
        }
    }
    Ok(removed)
}
