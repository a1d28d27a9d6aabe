//! Portability verification.
//!
//! The finished tree is copied to a scratch location outside the build
//! context and every binary is re-inspected there. Findings accumulate over
//! the whole tree; the verdict is only taken at the end.

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::analyze::BinaryInfo;
use crate::copy::mirror_dir;
use crate::editor::LinkEditor;
use crate::error::Violation;
use crate::paths::{is_portable, normalize_path};

/// Verifier settings.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Build-store prefix that must not survive in the bundle.
    pub store_prefix: String,
    /// Report embedded byte references as warnings instead of violations.
    pub tolerate_store_references: bool,
}

/// Outcome of verifying one tree.
#[derive(Debug, Default, Clone)]
pub struct VerificationReport {
    pub binaries_checked: usize,
    pub violations: Vec<Violation>,
    pub warnings: Vec<Violation>,
}

impl VerificationReport {
    pub fn is_success(&self) -> bool {
        self.violations.is_empty()
    }

    fn merge(mut self, other: VerificationReport) -> VerificationReport {
        self.binaries_checked += other.binaries_checked;
        self.violations.extend(other.violations);
        self.warnings.extend(other.warnings);
        self
    }
}

/// Copy `root` into a fresh scratch directory and verify the copy.
pub fn verify_tree<E: LinkEditor>(root: &Path, editor: &E, options: &VerifyOptions) -> Result<VerificationReport> {
    let scratch = TempDir::new().context("Failed to create verification scratch directory")?;
    let copy = scratch.path().join("bundle");
    mirror_dir(root, &copy)
        .with_context(|| format!("Failed to copy {} for verification", root.display()))?;

    let report = check_tree(&copy, editor, options)?;

    for warning in &report.warnings {
        warn!("{warning}");
    }
    if report.is_success() {
        info!(
            "Verified {} binaries: portable ({} warning(s))",
            report.binaries_checked,
            report.warnings.len()
        );
    } else {
        for violation in &report.violations {
            tracing::error!("{violation}");
        }
    }
    Ok(report)
}

/// Verify a tree in place. Paths in findings are relative to `root`.
pub fn check_tree<E: LinkEditor>(root: &Path, editor: &E, options: &VerifyOptions) -> Result<VerificationReport> {
    let mut files: Vec<PathBuf> = Vec::new();
    let mut total = VerificationReport::default();
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        } else if entry.file_type().is_symlink() {
            total.violations.extend(check_symlink(root, entry.path())?);
        }
    }

    let reports: Vec<Result<VerificationReport>> = files
        .par_iter()
        .map(|path| check_file(root, path, editor, options))
        .collect();

    for report in reports {
        total = total.merge(report?);
    }
    Ok(total)
}

fn check_file<E: LinkEditor>(
    root: &Path,
    path: &Path,
    editor: &E,
    options: &VerifyOptions,
) -> Result<VerificationReport> {
    let mut report = VerificationReport::default();
    let Some(info) = editor.inspect(path)? else {
        return Ok(report);
    };
    report.binaries_checked = 1;

    let rel = path.strip_prefix(root).unwrap_or(path).to_path_buf();
    report.violations.extend(check_binary(&rel, &info, &options.store_prefix));

    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let matches = scan_store_references(&bytes, &options.store_prefix);
    if !matches.is_empty() {
        let distinct: BTreeSet<String> = matches.iter().cloned().collect();
        let finding = Violation::EmbeddedStorePath {
            path: rel,
            count: matches.len(),
            matches: distinct.into_iter().collect(),
        };
        if options.tolerate_store_references {
            report.warnings.push(finding);
        } else {
            report.violations.push(finding);
        }
    }
    Ok(report)
}

/// A symlink must stay inside the tree, or point at a portable absolute
/// location (a canonical system path).
fn check_symlink(root: &Path, link: &Path) -> Result<Option<Violation>> {
    let target = fs::read_link(link)
        .with_context(|| format!("Failed to read symlink {}", link.display()))?;
    let rel = link.strip_prefix(root).unwrap_or(link).to_path_buf();

    let stays_inside = if target.is_absolute() {
        is_portable(&target.to_string_lossy())
    } else {
        // Lexically, relative to the tree root
        let base = rel.parent().unwrap_or(Path::new(""));
        normalize_path(&base.join(&target)).is_some()
    };
    if stays_inside {
        return Ok(None);
    }
    Ok(Some(Violation::Symlink {
        path: rel,
        target: target.to_string_lossy().into_owned(),
    }))
}

/// Metadata checks for one binary.
pub fn check_binary(rel: &Path, info: &BinaryInfo, store_prefix: &str) -> Vec<Violation> {
    let mut violations = Vec::new();

    for dep in info.dependencies.iter().filter(|d| !is_portable(d)) {
        violations.push(Violation::Dependency {
            path: rel.to_path_buf(),
            reference: dep.clone(),
        });
    }
    if let Some(id) = info.identity.as_ref().filter(|id| !is_portable(id)) {
        violations.push(Violation::Identity {
            path: rel.to_path_buf(),
            reference: id.clone(),
        });
    }
    for entry in info.run_paths.iter().filter(|r| !is_portable(r)) {
        violations.push(Violation::RunPath {
            path: rel.to_path_buf(),
            reference: entry.clone(),
        });
    }
    if let Some(interp) = info.interpreter.as_ref().filter(|i| i.contains(store_prefix)) {
        violations.push(Violation::Interpreter {
            path: rel.to_path_buf(),
            reference: interp.clone(),
        });
    }
    violations
}

/// Every occurrence of `prefix` in `bytes`, extended up to the next
/// terminator (NUL, whitespace, quote or non-printable byte).
pub fn scan_store_references(bytes: &[u8], prefix: &str) -> Vec<String> {
    let needle = prefix.as_bytes();
    let mut found = Vec::new();
    if needle.is_empty() || bytes.len() < needle.len() {
        return found;
    }

    let mut i = 0;
    while i + needle.len() <= bytes.len() {
        if &bytes[i..i + needle.len()] == needle {
            let end = bytes[i..]
                .iter()
                .position(|b| !b.is_ascii_graphic() || *b == b'"' || *b == b'\'')
                .map_or(bytes.len(), |p| i + p);
            found.push(String::from_utf8_lossy(&bytes[i..end]).into_owned());
            i = end.max(i + 1);
        } else {
            i += 1;
        }
    }
    found
}
