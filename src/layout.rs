//! Output tree areas.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::OutputLayout;

/// The bundle being composed: executables area, shared-library area,
/// plugin and import trees, and caller-named extra directories.
#[derive(Debug, Clone)]
pub struct OutputTree {
    root: PathBuf,
    bin: PathBuf,
    lib: PathBuf,
    plugins: PathBuf,
    imports: PathBuf,
    extra: Vec<PathBuf>,
}

impl OutputTree {
    pub fn new(root: &Path, layout: &OutputLayout, extra_dirs: &[String]) -> Self {
        Self {
            root: root.to_path_buf(),
            bin: root.join(&layout.bin_dir),
            lib: root.join(&layout.lib_dir),
            plugins: root.join(&layout.plugin_dir),
            imports: root.join(&layout.import_dir),
            extra: extra_dirs.iter().map(|d| root.join(d)).collect(),
        }
    }

    /// Create the executables and shared-library areas.
    pub fn create(&self) -> Result<()> {
        for dir in [&self.bin, &self.lib] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bin_dir(&self) -> &Path {
        &self.bin
    }

    pub fn lib_dir(&self) -> &Path {
        &self.lib
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugins
    }

    pub fn import_dir(&self) -> &Path {
        &self.imports
    }

    pub fn extra_dirs(&self) -> &[PathBuf] {
        &self.extra
    }

    /// Whether the shared-library area holds an entry of this bare name.
    pub fn has_library(&self, name: &str) -> bool {
        let path = self.lib.join(name);
        path.exists() || path.is_symlink()
    }
}
