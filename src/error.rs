//! Error and violation types.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that end a bundling run.
#[derive(Error, Debug)]
pub enum BundleError {
    /// Verification found non-portable references.
    #[error("Bundle verification failed with {count} violation(s)")]
    VerificationFailed { count: usize },

    /// A system or host pattern could not be compiled.
    #[error("Invalid library pattern: {0}")]
    Policy(#[from] regex::Error),

    /// A configuration input could not be read.
    #[error("Failed to read configuration '{}': {reason}", .path.display())]
    Config { path: PathBuf, reason: String },
}

/// A single finding of the portability verifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    #[error("{}: non-portable dependency '{reference}'", .path.display())]
    Dependency { path: PathBuf, reference: String },

    #[error("{}: non-portable install name '{reference}'", .path.display())]
    Identity { path: PathBuf, reference: String },

    #[error("{}: non-portable run-path '{reference}'", .path.display())]
    RunPath { path: PathBuf, reference: String },

    #[error("{}: interpreter '{reference}' points into the build store", .path.display())]
    Interpreter { path: PathBuf, reference: String },

    /// A symlink leaving the tree or pointing at a non-portable location.
    #[error("{}: symlink to '{target}' does not resolve inside the bundle", .path.display())]
    Symlink { path: PathBuf, target: String },

    /// Raw bytes of the binary still mention the build store.
    #[error("{}: {count} embedded build-store reference(s): {}", .path.display(), .matches.join(", "))]
    EmbeddedStorePath {
        path: PathBuf,
        count: usize,
        matches: Vec<String>,
    },
}

impl Violation {
    /// Path of the offending binary, relative to the verified tree.
    pub fn path(&self) -> &Path {
        match self {
            Violation::Dependency { path, .. }
            | Violation::Identity { path, .. }
            | Violation::RunPath { path, .. }
            | Violation::Interpreter { path, .. }
            | Violation::Symlink { path, .. }
            | Violation::EmbeddedStorePath { path, .. } => path.as_path(),
        }
    }
}
