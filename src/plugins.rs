//! Qt plugin and QML import discovery.
//!
//! When the closure contains Qt libraries, the plugin and import trees of
//! the candidate roots are merged into the bundle, stripped of build and
//! development leftovers, and every newly copied file is handed back to the
//! tracer. A `qt.conf` next to the executables points Qt at the merged trees.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::copy::{create_symlink_if_missing, merge_dir, remove_empty_dirs};
use crate::layout::OutputTree;
use crate::paths::relative_path;
use crate::policy::{Classification, PatternSet};
use crate::registry::LibraryRegistry;
use crate::trace::TraceItem;

const PLUGIN_DIRS: &[&str] = &[
    "lib/qt-6/plugins",
    "lib/qt6/plugins",
    "lib/qt-5/plugins",
    "lib/qt5/plugins",
    "lib/qt/plugins",
    "plugins",
];

const PLUGIN_MARKERS: &[&str] = &[
    "platforms",
    "imageformats",
    "iconengines",
    "styles",
    "platformthemes",
    "tls",
    "sqldrivers",
    "wayland-shell-integration",
    "xcbglintegrations",
];

const IMPORT_DIRS: &[&str] = &["lib/qt-6/qml", "lib/qt6/qml", "lib/qt-5/qml", "lib/qt5/qml", "qml"];

const IMPORT_MARKERS: &[&str] = &["QtQml", "QtQuick"];

const NON_RUNTIME_SUFFIXES: &[&str] = &[
    ".debug", ".prl", ".a", ".la", ".cmake", ".pc", ".pdb", ".qmltypes",
];

const BUILD_ARTIFACT_DIRS: &[&str] = &["CMakeFiles", ".moc", ".obj", ".rcc", "*.dSYM", "objects-*"];

const NON_RUNTIME_IMPORT_DIRS: &[&str] = &[
    "QtTest",
    "Qt/test",
    "QtQuick/Controls/designer",
    "QtQuick/Dialogs/designer",
    "QtQuick/Layouts/designer",
    "QtQuick3D/designer",
];

/// Module descriptor file of a QML module directory.
const MODULE_DESCRIPTOR: &str = "qmldir";

/// Generated Qt configuration, written into the executables area.
pub const QT_CONF: &str = "qt.conf";

/// Any Qt library pulls in plugins.
pub fn is_ui_library(name: &str) -> bool {
    name.starts_with("Qt") || name.starts_with("libQt")
}

/// Qt Quick / QML libraries additionally pull in import trees.
pub fn is_declarative_library(name: &str) -> bool {
    is_ui_library(name) && (name.contains("Qml") || name.contains("Quick"))
}

/// Outcome of one discovery round.
#[derive(Debug, Default, Clone)]
pub struct DiscoveryReport {
    pub plugin_dirs: Vec<PathBuf>,
    pub import_dirs: Vec<PathBuf>,
    /// Newly copied files, to be traced.
    pub new_files: Vec<TraceItem>,
    /// Application modules symlinked into the import tree.
    pub linked_modules: Vec<PathBuf>,
    pub config_written: bool,
}

impl DiscoveryReport {
    /// Fold a later round into this one.
    pub fn absorb(&mut self, round: DiscoveryReport) {
        for dir in round.plugin_dirs {
            if !self.plugin_dirs.contains(&dir) {
                self.plugin_dirs.push(dir);
            }
        }
        for dir in round.import_dirs {
            if !self.import_dirs.contains(&dir) {
                self.import_dirs.push(dir);
            }
        }
        self.new_files.extend(round.new_files);
        self.linked_modules.extend(round.linked_modules);
        self.config_written |= round.config_written;
    }
}

/// Run one discovery round against the libraries traced so far.
///
/// Safe to call repeatedly: merges never overwrite, so later rounds only
/// report files that are genuinely new.
pub fn discover(roots: &[PathBuf], tree: &OutputTree, registry: &LibraryRegistry) -> Result<DiscoveryReport> {
    let mut report = DiscoveryReport::default();

    let names: Vec<&str> = registry
        .libraries()
        .filter(|(_, e)| e.classification != Classification::System)
        .map(|(_, e)| e.name.as_str())
        .collect();
    let want_plugins = names.iter().any(|n| is_ui_library(n));
    let want_imports = names.iter().any(|n| is_declarative_library(n));

    if !want_plugins {
        return Ok(report);
    }

    for root in roots {
        let Some(dir) = find_marked_dir(root, PLUGIN_DIRS, PLUGIN_MARKERS) else {
            continue;
        };
        debug!(dir = %dir.display(), "Merging plugin directory");
        let copied = merge_dir(&dir, tree.plugin_dir())?;
        report.new_files.extend(copied.into_iter().map(|(dest, src)| TraceItem::new(dest, src)));
        report.plugin_dirs.push(dir);
    }
    if !report.plugin_dirs.is_empty() {
        prune_tree(tree.plugin_dir())?;
    }

    if want_imports {
        for root in roots {
            let Some(dir) = find_marked_dir(root, IMPORT_DIRS, IMPORT_MARKERS) else {
                continue;
            };
            debug!(dir = %dir.display(), "Merging import directory");
            let copied = merge_dir(&dir, tree.import_dir())?;
            report.new_files.extend(copied.into_iter().map(|(dest, src)| TraceItem::new(dest, src)));
            report.import_dirs.push(dir);
        }
        if !report.import_dirs.is_empty() {
            for sub in NON_RUNTIME_IMPORT_DIRS {
                let path = tree.import_dir().join(sub);
                if path.is_dir() {
                    fs::remove_dir_all(&path)
                        .with_context(|| format!("Failed to remove {}", path.display()))?;
                }
            }
            prune_tree(tree.import_dir())?;
        }
        report.linked_modules = link_app_modules(tree)?;
    }

    // Pruned files are not traced
    report.new_files.retain(|item| item.path.is_file());

    if !report.plugin_dirs.is_empty() {
        write_qt_conf(tree)?;
        report.config_written = true;
    }

    if !report.new_files.is_empty() {
        info!(
            "Discovered {} new plugin/import file(s) in {} plugin and {} import director(ies)",
            report.new_files.len(),
            report.plugin_dirs.len(),
            report.import_dirs.len()
        );
    }
    Ok(report)
}

/// First conventional directory under `root` holding one of the markers.
fn find_marked_dir(root: &Path, candidates: &[&str], markers: &[&str]) -> Option<PathBuf> {
    candidates
        .iter()
        .map(|rel| root.join(rel))
        .find(|dir| markers.iter().any(|m| dir.join(m).is_dir()))
}

/// Delete non-runtime files and build-artifact directories, then any
/// directories left empty. Returns the number of entries removed.
pub fn prune_tree(dir: &Path) -> Result<usize> {
    let artifact_dirs = PatternSet::new(BUILD_ARTIFACT_DIRS)?;
    let mut doomed = Vec::new();
    let mut walker = WalkDir::new(dir).min_depth(1).into_iter();

    while let Some(entry) = walker.next() {
        let Ok(entry) = entry else { continue };
        let name = entry.file_name().to_string_lossy();

        if entry.file_type().is_dir() {
            if artifact_dirs.is_match(&name) {
                doomed.push((entry.path().to_path_buf(), true));
                walker.skip_current_dir();
            }
        } else if NON_RUNTIME_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            doomed.push((entry.path().to_path_buf(), false));
        }
    }

    let mut removed = doomed.len();
    for (path, is_dir) in doomed {
        let result = if is_dir {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        result.with_context(|| format!("Failed to remove {}", path.display()))?;
    }

    removed += remove_empty_dirs(dir)?;
    Ok(removed)
}

/// Symlink application-authored QML modules already in the bundle into the
/// import tree, under the path their `qmldir` declares.
fn link_app_modules(tree: &OutputTree) -> Result<Vec<PathBuf>> {
    let mut linked = Vec::new();
    let search = std::iter::once(tree.lib_dir()).chain(tree.extra_dirs().iter().map(PathBuf::as_path));

    for base in search {
        if !base.is_dir() {
            continue;
        }
        for entry in WalkDir::new(base).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() || entry.file_name() != MODULE_DESCRIPTOR {
                continue;
            }
            let Some(module_dir) = entry.path().parent() else {
                continue;
            };
            if module_dir.starts_with(tree.import_dir()) {
                continue;
            }

            let module_path = module_import_path(entry.path())
                .or_else(|| module_dir.file_name().map(PathBuf::from));
            let Some(module_path) = module_path else {
                continue;
            };

            let link = tree.import_dir().join(&module_path);
            let Some(link_parent) = link.parent() else {
                continue;
            };
            let target = relative_path(link_parent, module_dir);
            if create_symlink_if_missing(&target, &link)? {
                debug!(module = %module_path.display(), "Linked application module");
                linked.push(link);
            }
        }
    }
    Ok(linked)
}

/// `module A.B.C` → `A/B/C`.
fn module_import_path(qmldir: &Path) -> Option<PathBuf> {
    let text = fs::read_to_string(qmldir).ok()?;
    let uri = text
        .lines()
        .find_map(|l| l.trim().strip_prefix("module "))?
        .trim();
    if uri.is_empty() {
        return None;
    }
    Some(uri.split('.').collect())
}

fn write_qt_conf(tree: &OutputTree) -> Result<()> {
    let bin = tree.bin_dir();
    let mut conf = String::from("[Paths]\n");
    conf.push_str(&format!(
        "Plugins = {}\n",
        relative_path(bin, tree.plugin_dir()).display()
    ));
    if tree.import_dir().is_dir() {
        let imports = relative_path(bin, tree.import_dir());
        conf.push_str(&format!("Qml2Imports = {}\n", imports.display()));
        conf.push_str(&format!("QmlImports = {}\n", imports.display()));
    }

    fs::create_dir_all(bin)?;
    let path = bin.join(QT_CONF);
    fs::write(&path, conf).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
