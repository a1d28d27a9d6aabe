//! The bundling pipeline.
//!
//! Phases run strictly in order, each consuming the previous one's output:
//! stage, trace, plugin discovery with retracing, framework reconstruction,
//! rewrite, verify. Only the verifier's verdict decides success.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::info;
use walkdir::WalkDir;

use crate::config::BundleConfig;
use crate::copy::merge_dir;
use crate::editor::LinkEditor;
use crate::error::BundleError;
use crate::framework::reconstruct_frameworks;
use crate::layout::OutputTree;
use crate::plugins::{discover, DiscoveryReport};
use crate::policy::ExclusionPolicy;
use crate::registry::LibraryRegistry;
use crate::rewrite::{rewrite_tree, RewriteContext, RewriteReport};
use crate::trace::{TraceItem, TraceReport, Tracer};
use crate::verify::{verify_tree, VerificationReport, VerifyOptions};

/// Everything a bundling run reports.
#[derive(Debug, Default, Clone)]
pub struct BundleReport {
    pub staged: usize,
    pub trace: TraceReport,
    pub discovery: DiscoveryReport,
    pub frameworks_rebuilt: usize,
    pub libraries_bundled: usize,
    pub rewrite: RewriteReport,
    pub verification: VerificationReport,
}

impl BundleReport {
    pub fn is_success(&self) -> bool {
        self.verification.is_success()
    }

    /// Turn a failed verdict into an error carrying the violation count.
    pub fn into_result(self) -> Result<Self, BundleError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(BundleError::VerificationFailed {
                count: self.verification.violations.len(),
            })
        }
    }
}

/// Compose a portable bundle as described by `config`.
///
/// # Errors
///
/// Returns an error for infrastructure failures (unwritable output,
/// invalid patterns). Verification failures are reported in the returned
/// [`BundleReport`], not as errors.
pub fn bundle<E: LinkEditor>(config: &BundleConfig, editor: &E) -> Result<BundleReport> {
    let policy = ExclusionPolicy::new(
        config.platform,
        &config.system_patterns,
        &config.host_patterns,
        config.use_default_patterns,
    )
    .map_err(BundleError::from)?;

    // Bundled interpreters are pinned to an absolute path, so it must be canonical
    fs::create_dir_all(&config.output_root).with_context(|| {
        format!("Failed to create output root {}", config.output_root.display())
    })?;
    let output_root = fs::canonicalize(&config.output_root).with_context(|| {
        format!("Failed to resolve output root {}", config.output_root.display())
    })?;

    let tree = OutputTree::new(&output_root, &config.layout, &config.extra_dirs);
    tree.create()?;

    let mut report = BundleReport::default();

    // The source artifact is part of the closure
    let mut roots: Vec<PathBuf> = vec![config.source_root.clone()];
    roots.extend(config.candidate_roots.iter().cloned());

    let staged = stage(config, &tree)?;
    report.staged = staged.len();
    info!("Staged {} files into {}", staged.len(), tree.root().display());

    let mut registry = LibraryRegistry::new();
    let mut tracer = Tracer::new(&roots, &tree, &policy, editor);
    tracer.trace(&mut registry, staged);
    info!(
        "Traced {} binaries, bundled {} libraries",
        tracer.report().inspected,
        tracer.report().copied.len()
    );

    loop {
        let round = discover(&config.candidate_roots, &tree, &registry)?;
        let new_files = round.new_files.clone();
        report.discovery.absorb(round);
        if new_files.is_empty() {
            break;
        }
        tracer.trace(&mut registry, new_files);
    }
    report.trace = tracer.into_report();

    report.frameworks_rebuilt = reconstruct_frameworks(tree.lib_dir(), registry.frameworks())?;

    let registry = registry.freeze();
    report.libraries_bundled = registry.copied_count();

    let ctx = RewriteContext {
        platform: config.platform,
        tree: &tree,
        policy: &policy,
        registry: &registry,
    };
    report.rewrite = rewrite_tree(&ctx, editor)?;

    let options = VerifyOptions {
        store_prefix: config.store_prefix.clone(),
        tolerate_store_references: config.tolerate_store_references,
    };
    report.verification = verify_tree(tree.root(), editor, &options)?;

    Ok(report)
}

/// Copy the source artifact's executables, libraries and extra directories
/// into the output tree. Returns the root set for tracing: every regular
/// file of the staged areas, paired with the real file it came from.
/// Symlinks into a store are copied in as files, so the origin is the
/// link's target rather than the link itself.
pub fn stage(config: &BundleConfig, tree: &OutputTree) -> Result<Vec<TraceItem>> {
    let source = &config.source_root;
    let mut areas = vec![
        (source.join("bin"), tree.bin_dir().to_path_buf()),
        (source.join("lib"), tree.lib_dir().to_path_buf()),
    ];
    for (name, dest) in config.extra_dirs.iter().zip(tree.extra_dirs()) {
        areas.push((source.join(name), dest.clone()));
    }

    let mut items = Vec::new();
    for (src, dest) in areas {
        let copied: HashMap<PathBuf, PathBuf> = merge_dir(&src, &dest)
            .with_context(|| format!("Failed to stage {}", src.display()))?
            .into_iter()
            .collect();
        // Files already present from an earlier run still count as roots
        for entry in WalkDir::new(&dest).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.into_path();
            let origin = copied
                .get(&path)
                .cloned()
                .or_else(|| {
                    let rel = path.strip_prefix(&dest).ok()?;
                    fs::canonicalize(src.join(rel)).ok()
                })
                .unwrap_or_else(|| path.clone());
            items.push(TraceItem::new(path, origin));
        }
    }
    Ok(items)
}
