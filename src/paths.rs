//! Library searching and link-reference path vocabulary.

use std::path::{Component, Path, PathBuf};

use crate::policy::Platform;

/// Library subdirectories searched inside every candidate root.
const LIBRARY_SUBDIRS: &[&str] = &["lib", "lib64"];

/// Loader-relative tokens. A reference starting with one of these resolves
/// relative to the referencing binary at load time.
pub const RELATIVE_ROOT_TOKENS: &[&str] = &[
    "$ORIGIN",
    "${ORIGIN}",
    "@rpath",
    "@loader_path",
    "@executable_path",
];

/// Prefixes of paths every host OS of a given family provides.
pub const SYSTEM_PREFIXES: &[&str] = &[
    "/lib/",
    "/lib64/",
    "/usr/lib/",
    "/usr/lib64/",
    "/System/Library/",
];

/// Find a library by bare name in the library subdirectories of the
/// candidate roots, in root order.
///
/// Returns `None` if the library is not found in any root.
#[must_use = "found library path should be used"]
pub fn find_library(roots: &[PathBuf], lib_name: &str) -> Option<PathBuf> {
    roots
        .iter()
        .flat_map(|root| LIBRARY_SUBDIRS.iter().map(move |sub| root.join(sub).join(lib_name)))
        .find(|p| p.exists())
}

/// Whether `path` lies inside one of the candidate roots.
pub fn is_within_roots(path: &Path, roots: &[PathBuf]) -> bool {
    roots.iter().any(|root| path.starts_with(root))
}

/// Last path component of a reference (`@rpath/libfoo.dylib` → `libfoo.dylib`).
pub fn bare_name(reference: &str) -> &str {
    reference.rsplit('/').next().unwrap_or(reference)
}

/// The `<Name>.framework/...` tail of a path, if it has a bundle-style component.
pub fn framework_fragment(path: &str) -> Option<String> {
    let parts: Vec<&str> = path.split('/').collect();
    let start = parts
        .iter()
        .position(|p| p.len() > ".framework".len() && p.ends_with(".framework"))?;
    if start + 1 >= parts.len() {
        return None;
    }
    Some(parts[start..].join("/"))
}

/// Whether a reference keeps working after the tree is moved elsewhere.
///
/// Portable references are empty, bare names, loader-relative tokens, or
/// canonical system paths.
pub fn is_portable(reference: &str) -> bool {
    reference.is_empty()
        || !reference.contains('/')
        || RELATIVE_ROOT_TOKENS
            .iter()
            .any(|t| reference == *t || reference.starts_with(&format!("{t}/")))
        || SYSTEM_PREFIXES.iter().any(|p| reference.starts_with(p))
}

/// Expand a leading `$ORIGIN` / `@loader_path` / `@executable_path` against
/// the directory of the referencing binary. Returns `None` for references
/// without such a token.
pub fn expand_origin(reference: &str, origin_dir: &Path) -> Option<PathBuf> {
    for token in ["${ORIGIN}", "$ORIGIN", "@loader_path", "@executable_path"] {
        if let Some(rest) = reference.strip_prefix(token) {
            let rest = rest.trim_start_matches('/');
            return Some(if rest.is_empty() {
                origin_dir.to_path_buf()
            } else {
                origin_dir.join(rest)
            });
        }
    }
    None
}

/// Relative path from directory `from` to `to`. Both must be absolute, or
/// both relative to the same base.
pub fn relative_path(from: &Path, to: &Path) -> PathBuf {
    let from: Vec<Component> = from.components().collect();
    let to: Vec<Component> = to.components().collect();
    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..from.len() {
        rel.push("..");
    }
    for part in &to[common..] {
        rel.push(part.as_os_str());
    }
    rel
}

/// Resolve `.` and `..` components without touching the filesystem.
///
/// Returns `None` if a `..` would climb above the start of the path (or
/// above `/`).
pub fn normalize_path(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for part in path.components() {
        match part {
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                out.pop();
                depth -= 1;
            }
            Component::Normal(name) => {
                out.push(name);
                depth += 1;
            }
            Component::RootDir | Component::Prefix(_) => out.push(part.as_os_str()),
        }
    }
    Some(out)
}

/// Join a loader token with a relative path and optional file name, using
/// `/` and leaving out empty segments (`$ORIGIN` + "" + "libx.so" → `$ORIGIN/libx.so`).
pub fn token_join(token: &str, rel: &Path, name: Option<&str>) -> String {
    let mut out = token.to_string();
    for part in rel.components() {
        if let Component::CurDir = part {
            continue;
        }
        out.push('/');
        out.push_str(&part.as_os_str().to_string_lossy());
    }
    if let Some(name) = name {
        out.push('/');
        out.push_str(name);
    }
    out
}

/// Drop trailing minor/patch numbers from a versioned library name:
/// `libfoo.3.2.1.dylib` → `libfoo.3.dylib`. Non-numeric suffixes are kept
/// (`libBar.B.dylib` is unchanged).
pub fn normalize_system_name(name: &str) -> String {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() < 4 {
        return name.to_string();
    }
    let middle = &parts[1..parts.len() - 1];
    let numeric_tail = middle
        .iter()
        .rev()
        .take_while(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
        .count();
    if numeric_tail < 2 {
        return name.to_string();
    }

    let keep = middle.len() - numeric_tail + 1;
    let mut out: Vec<&str> = Vec::with_capacity(keep + 2);
    out.push(parts[0]);
    out.extend_from_slice(&middle[..keep]);
    out.push(parts[parts.len() - 1]);
    out.join(".")
}

/// Canonical location of a system library on the target platform.
pub fn canonical_system_path(platform: Platform, reference: &str) -> String {
    let name = bare_name(reference);
    match platform {
        Platform::Darwin => match framework_fragment(reference) {
            Some(fragment) => format!("/System/Library/Frameworks/{fragment}"),
            None => format!("/usr/lib/{}", normalize_system_name(name)),
        },
        Platform::Linux => {
            if name.starts_with("ld-linux-x86-64") {
                format!("/lib64/{name}")
            } else {
                format!("/lib/{name}")
            }
        }
    }
}
