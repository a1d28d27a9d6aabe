//! Rewriting link metadata to relative, portable forms.
//!
//! Planning is pure: [`plan_rewrite`] maps one binary's metadata onto a list
//! of [`LinkEdit`]s. [`rewrite_tree`] plans and applies edits for every
//! binary in the output tree, in parallel, treating each failed edit as a
//! warning.

use anyhow::Result;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::analyze::{BinaryFormat, BinaryInfo};
use crate::editor::{LinkEdit, LinkEditor};
use crate::layout::OutputTree;
use crate::paths::{bare_name, canonical_system_path, is_portable, relative_path, token_join};
use crate::policy::{Classification, ExclusionPolicy, Platform};
use crate::registry::FrozenRegistry;

/// Read-only inputs shared by all rewrite workers.
pub struct RewriteContext<'a> {
    pub platform: Platform,
    pub tree: &'a OutputTree,
    pub policy: &'a ExclusionPolicy,
    pub registry: &'a FrozenRegistry,
}

/// Edits for one binary, plus references no rule could fix.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RewritePlan {
    pub edits: Vec<LinkEdit>,
    pub left_as_is: Vec<String>,
}

/// What the rewrite pass did.
#[derive(Debug, Default, Clone)]
pub struct RewriteReport {
    pub binaries: usize,
    pub edits_applied: usize,
    pub failures: Vec<String>,
    /// `(binary, reference)` pairs left non-portable.
    pub left_as_is: Vec<(PathBuf, String)>,
}

impl RewriteReport {
    fn merge(mut self, other: RewriteReport) -> RewriteReport {
        self.binaries += other.binaries;
        self.edits_applied += other.edits_applied;
        self.failures.extend(other.failures);
        self.left_as_is.extend(other.left_as_is);
        self
    }
}

/// Rewrite every binary in the output tree.
pub fn rewrite_tree<E: LinkEditor>(ctx: &RewriteContext<'_>, editor: &E) -> Result<RewriteReport> {
    let files: Vec<PathBuf> = WalkDir::new(ctx.tree.root())
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();

    let report = files
        .par_iter()
        .map(|path| rewrite_binary(ctx, editor, path))
        .reduce(RewriteReport::default, RewriteReport::merge);

    info!(
        "Rewrote {} binaries ({} edits, {} failures)",
        report.binaries,
        report.edits_applied,
        report.failures.len()
    );
    Ok(report)
}

fn rewrite_binary<E: LinkEditor>(ctx: &RewriteContext<'_>, editor: &E, path: &Path) -> RewriteReport {
    let mut report = RewriteReport::default();
    let info = match editor.inspect(path) {
        Ok(Some(info)) => info,
        _ => return report,
    };
    report.binaries = 1;

    let plan = plan_rewrite(ctx, path, &info);
    for reference in plan.left_as_is {
        warn!(binary = %path.display(), reference = reference.as_str(), "Leaving non-portable reference");
        report.left_as_is.push((path.to_path_buf(), reference));
    }
    for edit in &plan.edits {
        match editor.apply(path, info.format, edit) {
            Ok(()) => report.edits_applied += 1,
            Err(e) => {
                warn!(binary = %path.display(), "Rewrite failed: {e:#}");
                report.failures.push(format!("{}: {e:#}", path.display()));
            }
        }
    }
    report
}

/// Work out the edits that make one binary portable.
pub fn plan_rewrite(ctx: &RewriteContext<'_>, binary: &Path, info: &BinaryInfo) -> RewritePlan {
    let mut plan = RewritePlan::default();
    let binary_dir = binary.parent().unwrap_or(Path::new("."));
    let lib_rel = relative_path(binary_dir, ctx.tree.lib_dir());

    for reference in &info.dependencies {
        match rewrite_reference(ctx, info.format, binary_dir, &lib_rel, reference) {
            Rewrite::To(new) if new != *reference => plan.edits.push(LinkEdit::ReplaceDependency {
                old: reference.clone(),
                new,
            }),
            Rewrite::To(_) | Rewrite::Keep => {}
            Rewrite::Stuck => plan.left_as_is.push(reference.clone()),
        }
    }

    if let Some(identity) = &info.identity {
        if !is_portable(identity) {
            match rewrite_reference(ctx, info.format, binary_dir, &lib_rel, identity) {
                Rewrite::To(new) if new != *identity => plan.edits.push(LinkEdit::SetIdentity(new)),
                Rewrite::To(_) | Rewrite::Keep => {}
                Rewrite::Stuck => plan.left_as_is.push(identity.clone()),
            }
        }
    }

    plan_run_paths(info, &lib_rel, &mut plan);

    if let Some(interp) = &info.interpreter {
        if interp.starts_with('/') {
            let name = bare_name(interp);
            let new = match ctx.policy.classify(name) {
                Classification::System => Some(canonical_system_path(Platform::Linux, interp)),
                _ if ctx.tree.has_library(name) => {
                    Some(ctx.tree.lib_dir().join(name).to_string_lossy().into_owned())
                }
                _ => None,
            };
            match new {
                Some(new) if new != *interp => plan.edits.push(LinkEdit::SetInterpreter(new)),
                Some(_) => {}
                None if !is_portable(interp) => plan.left_as_is.push(interp.clone()),
                None => {}
            }
        }
    }

    plan
}

enum Rewrite {
    To(String),
    Keep,
    Stuck,
}

fn rewrite_reference(
    ctx: &RewriteContext<'_>,
    format: BinaryFormat,
    binary_dir: &Path,
    lib_rel: &Path,
    reference: &str,
) -> Rewrite {
    let name = bare_name(reference);

    if let Some(fragment) = ctx.registry.framework(name) {
        return Rewrite::To(match format {
            BinaryFormat::MachO => format!("@rpath/{fragment}"),
            BinaryFormat::Elf => token_join("$ORIGIN", lib_rel, Some(fragment)),
        });
    }

    if ctx.tree.has_library(name) {
        return match format {
            // Bare sonames resolve through the run-path
            BinaryFormat::Elf if !reference.contains('/') => Rewrite::Keep,
            BinaryFormat::Elf => Rewrite::To(token_join("$ORIGIN", lib_rel, Some(name))),
            BinaryFormat::MachO => Rewrite::To(token_join("@loader_path", lib_rel, Some(name))),
        };
    }

    match ctx.policy.classify(name) {
        Classification::System => match format {
            BinaryFormat::Elf => Rewrite::To(name.to_string()),
            BinaryFormat::MachO => Rewrite::To(canonical_system_path(ctx.platform, reference)),
        },
        Classification::Host => match format {
            BinaryFormat::Elf => Rewrite::To(name.to_string()),
            BinaryFormat::MachO => Rewrite::To(format!("@rpath/{name}")),
        },
        Classification::Bundle => {
            if is_portable(reference) {
                Rewrite::Keep
            } else if binary_dir.join(name).exists() {
                let token = match format {
                    BinaryFormat::Elf => "$ORIGIN",
                    BinaryFormat::MachO => "@loader_path",
                };
                Rewrite::To(format!("{token}/{name}"))
            } else {
                Rewrite::Stuck
            }
        }
    }
}

/// Drop absolute run-paths and add the one relative entry pointing at the
/// shared-library area.
fn plan_run_paths(info: &BinaryInfo, lib_rel: &Path, plan: &mut RewritePlan) {
    match info.format {
        BinaryFormat::Elf => {
            let wanted = token_join("$ORIGIN", lib_rel, None);
            let mut kept: Vec<String> = info
                .run_paths
                .iter()
                .filter(|r| !r.starts_with('/'))
                .cloned()
                .collect();
            if !kept.contains(&wanted) {
                kept.push(wanted);
            }
            if kept != info.run_paths {
                plan.edits.push(LinkEdit::SetRunPaths(kept));
            }
        }
        BinaryFormat::MachO => {
            let wanted = token_join("@loader_path", lib_rel, None);
            for entry in info.run_paths.iter().filter(|r| r.starts_with('/')) {
                plan.edits.push(LinkEdit::DeleteRunPath(entry.clone()));
            }
            if !info.run_paths.contains(&wanted) {
                plan.edits.push(LinkEdit::AddRunPath(wanted));
            }
        }
    }
}
