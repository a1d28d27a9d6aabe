//! Portable bundle composition for ELF and Mach-O trees.
//!
//! Takes a pre-built executable/library tree plus a list of dependency
//! candidate roots and produces a relocatable directory: every needed shared
//! library is traced and copied, every binary's link metadata is rewritten
//! to loader-relative references, and the result is verified from a fresh
//! copy.
//!
//! Inspection reads object headers directly with goblin, so it works for
//! binaries of any architecture. Rewriting goes through `patchelf` and
//! `install_name_tool`.

mod analyze;
mod config;
mod copy;
mod editor;
mod error;
mod framework;
mod layout;
mod paths;
mod pipeline;
mod plugins;
mod policy;
mod registry;
mod rewrite;
mod trace;
mod verify;

pub use analyze::{inspect_binary, parse_binary, sniff_format, BinaryFormat, BinaryInfo};
pub use config::{parse_list, BundleConfig, OutputLayout, DEFAULT_STORE_PREFIX};
pub use copy::{copy_library_to, create_symlink_if_missing, make_writable, merge_dir, mirror_dir, remove_empty_dirs};
pub use editor::{tool_available, LinkEdit, LinkEditor, SystemLinkEditor};
pub use error::{BundleError, Violation};
pub use framework::reconstruct_frameworks;
pub use layout::OutputTree;
pub use paths::{
    bare_name, canonical_system_path, find_library, framework_fragment, is_portable,
    normalize_path, normalize_system_name, relative_path,
};
pub use pipeline::{bundle, stage, BundleReport};
pub use plugins::{discover, is_declarative_library, is_ui_library, prune_tree, DiscoveryReport, QT_CONF};
pub use policy::{Classification, ExclusionPolicy, PatternSet, Platform};
pub use registry::{FrozenRegistry, LibraryEntry, LibraryRegistry};
pub use rewrite::{plan_rewrite, rewrite_tree, RewriteContext, RewritePlan, RewriteReport};
pub use trace::{TraceItem, TraceReport, Tracer, UnresolvedEdge};
pub use verify::{check_binary, check_tree, scan_store_references, verify_tree, VerificationReport, VerifyOptions};
