//! Bundle configuration and list-file loading.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::BundleError;
use crate::policy::Platform;

/// Build-store prefix checked for by the verifier unless overridden.
pub const DEFAULT_STORE_PREFIX: &str = "/nix/store/";

/// Directory names of the output tree, relative to the output root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    pub bin_dir: String,
    pub lib_dir: String,
    pub plugin_dir: String,
    pub import_dir: String,
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self {
            bin_dir: "bin".into(),
            lib_dir: "lib".into(),
            plugin_dir: "plugins".into(),
            import_dir: "qml".into(),
        }
    }
}

/// Everything one bundling run needs.
#[derive(Debug, Clone)]
pub struct BundleConfig {
    /// Pre-built artifact tree (`bin/`, `lib/`, extra dirs).
    pub source_root: PathBuf,
    /// Where the bundle is composed.
    pub output_root: PathBuf,
    /// Dependency-candidate roots, searched in order.
    pub candidate_roots: Vec<PathBuf>,
    pub platform: Platform,
    pub system_patterns: Vec<String>,
    pub host_patterns: Vec<String>,
    pub use_default_patterns: bool,
    /// Directory names under the source root copied verbatim.
    pub extra_dirs: Vec<String>,
    /// Downgrade embedded build-store byte references to warnings.
    pub tolerate_store_references: bool,
    pub store_prefix: String,
    pub layout: OutputLayout,
}

impl BundleConfig {
    pub fn new(source_root: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            output_root: output_root.into(),
            candidate_roots: Vec::new(),
            platform: Platform::native(),
            system_patterns: Vec::new(),
            host_patterns: Vec::new(),
            use_default_patterns: true,
            extra_dirs: Vec::new(),
            tolerate_store_references: false,
            store_prefix: DEFAULT_STORE_PREFIX.to_string(),
            layout: OutputLayout::default(),
        }
    }

    pub fn with_candidate_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.candidate_roots = roots;
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_patterns(mut self, system: Vec<String>, host: Vec<String>) -> Self {
        self.system_patterns = system;
        self.host_patterns = host;
        self
    }

    pub fn with_default_patterns(mut self, enabled: bool) -> Self {
        self.use_default_patterns = enabled;
        self
    }

    pub fn with_extra_dirs(mut self, dirs: Vec<String>) -> Self {
        self.extra_dirs = dirs;
        self
    }

    pub fn with_tolerate_store_references(mut self, tolerate: bool) -> Self {
        self.tolerate_store_references = tolerate;
        self
    }

    pub fn with_store_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.store_prefix = prefix.into();
        self
    }

    pub fn with_layout(mut self, layout: OutputLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Read a newline-delimited list file.
    pub fn load_list(path: &Path) -> Result<Vec<String>, BundleError> {
        let text = fs::read_to_string(path).map_err(|e| BundleError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(parse_list(&text))
    }
}

/// Split newline-delimited input, trimming entries and skipping blank lines
/// and `#` comments.
pub fn parse_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}
