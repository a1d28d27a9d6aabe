//! Dependency-closure tracing.
//!
//! Starting from a set of root binaries, every dependency edge is resolved
//! to a real path inside the candidate roots, classified, and copied into
//! the shared-library area when it has to be bundled. Copies are traced in
//! turn until the closure is exhausted.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::analyze::BinaryInfo;
use crate::copy::{copy_library_to, create_symlink_if_missing};
use crate::editor::LinkEditor;
use crate::layout::OutputTree;
use crate::paths::{
    bare_name, expand_origin, find_library, framework_fragment, is_within_roots, normalize_path,
};
use crate::policy::{Classification, ExclusionPolicy};
use crate::registry::LibraryRegistry;

/// A binary to trace: where it sits in the output tree, and where it came
/// from (anchors `$ORIGIN` / `@loader_path` run-path entries).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceItem {
    pub path: PathBuf,
    pub origin: PathBuf,
}

impl TraceItem {
    pub fn new(path: impl Into<PathBuf>, origin: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            origin: origin.into(),
        }
    }
}

/// A dependency edge that could not be resolved to a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedEdge {
    pub binary: PathBuf,
    pub reference: String,
    pub classification: Classification,
}

/// What tracing did.
#[derive(Debug, Default, Clone)]
pub struct TraceReport {
    /// Binaries whose metadata was read.
    pub inspected: usize,
    /// Files written into the shared-library area, in copy order.
    pub copied: Vec<PathBuf>,
    pub unresolved: Vec<UnresolvedEdge>,
}

/// Closure tracer over one set of candidate roots.
pub struct Tracer<'a, E: LinkEditor> {
    roots: &'a [PathBuf],
    tree: &'a OutputTree,
    policy: &'a ExclusionPolicy,
    editor: &'a E,
    processed: HashSet<PathBuf>,
    report: TraceReport,
}

impl<'a, E: LinkEditor> Tracer<'a, E> {
    pub fn new(
        roots: &'a [PathBuf],
        tree: &'a OutputTree,
        policy: &'a ExclusionPolicy,
        editor: &'a E,
    ) -> Self {
        Self {
            roots,
            tree,
            policy,
            editor,
            processed: HashSet::new(),
            report: TraceReport::default(),
        }
    }

    /// Trace the closure of `items`. Can be called again with more roots;
    /// anything already traced is skipped.
    pub fn trace(&mut self, registry: &mut LibraryRegistry, items: Vec<TraceItem>) {
        let mut to_process = items;

        while let Some(item) = to_process.pop() {
            if !self.processed.insert(item.path.clone()) {
                continue;
            }

            let info = match self.editor.inspect(&item.path) {
                Ok(Some(info)) => info,
                Ok(None) => {
                    debug!(path = %item.path.display(), "Not inspectable, skipping");
                    continue;
                }
                Err(e) => {
                    debug!(path = %item.path.display(), "Inspection failed: {e:#}");
                    continue;
                }
            };
            self.report.inspected += 1;

            let edges = info.dependencies.iter().chain(info.interpreter.iter());
            for reference in edges {
                if let Some(next) = self.follow_edge(registry, &item, &info, reference) {
                    to_process.push(next);
                }
            }
        }
    }

    pub fn report(&self) -> &TraceReport {
        &self.report
    }

    pub fn into_report(self) -> TraceReport {
        self.report
    }

    fn follow_edge(
        &mut self,
        registry: &mut LibraryRegistry,
        item: &TraceItem,
        info: &BinaryInfo,
        reference: &str,
    ) -> Option<TraceItem> {
        let name = bare_name(reference);
        let classification = self.policy.classify(name);

        let Some(source) = self.resolve(item, info, reference) else {
            if classification == Classification::Bundle {
                warn!(binary = %item.path.display(), reference, "Unresolved dependency");
            } else {
                debug!(binary = %item.path.display(), reference, ?classification, "Unresolved dependency");
            }
            self.report.unresolved.push(UnresolvedEdge {
                binary: item.path.clone(),
                reference: reference.to_string(),
                classification,
            });
            return None;
        };

        let real = match fs::canonicalize(&source) {
            Ok(real) => real,
            Err(e) => {
                debug!(source = %source.display(), "Cannot canonicalize: {e}");
                return None;
            }
        };

        if !registry.claim(&real, name, classification) {
            self.alias_existing(registry, &real, name);
            return None;
        }

        if classification == Classification::System {
            return None;
        }

        // Recorded even for host libraries
        if let Some(fragment) = framework_fragment(&real.to_string_lossy()) {
            registry.record_framework(name, fragment);
        }

        if classification == Classification::Host {
            debug!(library = name, "Host-provided, not copied");
            return None;
        }

        match copy_library_to(&source, self.tree.lib_dir()) {
            Ok(copy) => {
                registry.mark_copied(&real, &copy.dest);
                if copy.copied {
                    debug!(library = name, from = %source.display(), "Bundled");
                    self.report.copied.push(copy.dest.clone());
                }
                Some(TraceItem::new(copy.dest, real))
            }
            Err(e) => {
                warn!(library = name, "Failed to copy {}: {e:#}", source.display());
                None
            }
        }
    }

    /// A real path reached again under a different bare name gets a symlink
    /// in the shared-library area so the new name resolves too.
    fn alias_existing(&self, registry: &LibraryRegistry, real: &Path, name: &str) {
        let Some(entry) = registry.get(real) else {
            return;
        };
        let Some(copied_to) = &entry.copied_to else {
            return;
        };
        let Some(target) = copied_to.file_name() else {
            return;
        };
        if target == name {
            return;
        }
        let link = self.tree.lib_dir().join(name);
        if let Err(e) = create_symlink_if_missing(Path::new(target), &link) {
            debug!(library = name, "Cannot alias: {e:#}");
        }
    }

    /// Map a dependency reference onto a file.
    fn resolve(&self, item: &TraceItem, info: &BinaryInfo, reference: &str) -> Option<PathBuf> {
        let origin_dir = item.origin.parent().unwrap_or(Path::new("/"));

        if let Some(rest) = reference.strip_prefix("@rpath/") {
            return info
                .run_paths
                .iter()
                .filter_map(|entry| search_dir(entry, origin_dir))
                .map(|dir| dir.join(rest))
                .find(|p| p.exists());
        }

        if let Some(expanded) = expand_origin(reference, origin_dir) {
            return expanded.exists().then_some(expanded);
        }

        if reference.starts_with('/') {
            let path = normalize_path(Path::new(reference))?;
            return (is_within_roots(&path, self.roots) && path.exists()).then_some(path);
        }

        if !reference.contains('/') {
            let from_run_paths = info
                .run_paths
                .iter()
                .filter_map(|entry| search_dir(entry, origin_dir))
                .filter(|dir| is_within_roots(dir, self.roots))
                .map(|dir| dir.join(reference))
                .find(|p| p.exists());
            return from_run_paths.or_else(|| find_library(self.roots, reference));
        }

        None
    }
}

/// Directory named by one run-path entry, with `..` resolved so root checks
/// see where it really points.
fn search_dir(entry: &str, origin_dir: &Path) -> Option<PathBuf> {
    let dir = match expand_origin(entry, origin_dir) {
        Some(dir) => dir,
        None if entry.starts_with('/') => PathBuf::from(entry),
        None => return None,
    };
    normalize_path(&dir)
}
