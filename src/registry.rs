//! Visit-once bookkeeping shared by the tracing phases.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::policy::Classification;

/// What the tracer decided about one real library path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryEntry {
    /// Bare name the library was first referenced by.
    pub name: String,
    pub classification: Classification,
    /// Location in the shared-library area, once copied.
    pub copied_to: Option<PathBuf>,
}

/// Map from canonical real path to its entry, plus the framework layout
/// fragments seen while tracing.
///
/// Each real path is claimed at most once; a claimed path is never copied or
/// traced again.
#[derive(Debug, Default)]
pub struct LibraryRegistry {
    libraries: HashMap<PathBuf, LibraryEntry>,
    frameworks: BTreeMap<String, String>,
}

impl LibraryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically check-and-mark a real path. Returns `true` on the first
    /// visit, `false` if the path was already claimed.
    pub fn claim(&mut self, real_path: &Path, name: &str, classification: Classification) -> bool {
        if self.libraries.contains_key(real_path) {
            return false;
        }
        self.libraries.insert(
            real_path.to_path_buf(),
            LibraryEntry {
                name: name.to_string(),
                classification,
                copied_to: None,
            },
        );
        true
    }

    pub fn mark_copied(&mut self, real_path: &Path, dest: &Path) {
        if let Some(entry) = self.libraries.get_mut(real_path) {
            entry.copied_to = Some(dest.to_path_buf());
        }
    }

    pub fn get(&self, real_path: &Path) -> Option<&LibraryEntry> {
        self.libraries.get(real_path)
    }

    pub fn libraries(&self) -> impl Iterator<Item = (&Path, &LibraryEntry)> {
        self.libraries.iter().map(|(p, e)| (p.as_path(), e))
    }

    pub fn len(&self) -> usize {
        self.libraries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
    }

    /// Record the `<Name>.framework/...` fragment for a bare name. The first
    /// recording wins.
    pub fn record_framework(&mut self, name: &str, fragment: String) {
        self.frameworks.entry(name.to_string()).or_insert(fragment);
    }

    pub fn framework(&self, name: &str) -> Option<&str> {
        self.frameworks.get(name).map(String::as_str)
    }

    pub fn frameworks(&self) -> &BTreeMap<String, String> {
        &self.frameworks
    }

    /// End of tracing. The frozen view is read-only and shareable across
    /// rewrite workers.
    pub fn freeze(self) -> FrozenRegistry {
        FrozenRegistry {
            libraries: self.libraries,
            frameworks: self.frameworks,
        }
    }
}

/// Read-only registry used by the rewriter.
#[derive(Debug, Default)]
pub struct FrozenRegistry {
    libraries: HashMap<PathBuf, LibraryEntry>,
    frameworks: BTreeMap<String, String>,
}

impl FrozenRegistry {
    pub fn framework(&self, name: &str) -> Option<&str> {
        self.frameworks.get(name).map(String::as_str)
    }

    pub fn frameworks(&self) -> &BTreeMap<String, String> {
        &self.frameworks
    }

    /// Number of real paths copied into the bundle.
    pub fn copied_count(&self) -> usize {
        self.libraries.values().filter(|e| e.copied_to.is_some()).count()
    }

    pub fn libraries(&self) -> impl Iterator<Item = (&Path, &LibraryEntry)> {
        self.libraries.iter().map(|(p, e)| (p.as_path(), e))
    }
}
