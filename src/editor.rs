//! Reading and mutating link metadata.
//!
//! The pipeline only talks to binaries through [`LinkEditor`]. The system
//! implementation inspects in-process with goblin and edits through
//! `patchelf` / `install_name_tool`, which must be on `PATH`.

use anyhow::{bail, Context, Result};
use std::ffi::OsStr;
use std::path::Path;
use std::process::Command;

use crate::analyze::{inspect_binary, BinaryFormat, BinaryInfo};

/// One metadata mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEdit {
    /// Swap one dependency reference for another.
    ReplaceDependency { old: String, new: String },
    /// Set the Mach-O install name.
    SetIdentity(String),
    /// Drop one Mach-O `LC_RPATH`.
    DeleteRunPath(String),
    /// Append one Mach-O `LC_RPATH`.
    AddRunPath(String),
    /// Replace the whole ELF run-path list.
    SetRunPaths(Vec<String>),
    /// Set the ELF program interpreter.
    SetInterpreter(String),
}

/// Access to binary link metadata.
pub trait LinkEditor: Sync {
    /// Read link metadata; `Ok(None)` means the file is not inspectable.
    fn inspect(&self, path: &Path) -> Result<Option<BinaryInfo>>;

    /// Apply a single edit in place.
    fn apply(&self, path: &Path, format: BinaryFormat, edit: &LinkEdit) -> Result<()>;
}

/// goblin for reading, `patchelf` / `install_name_tool` for writing.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLinkEditor;

impl LinkEditor for SystemLinkEditor {
    fn inspect(&self, path: &Path) -> Result<Option<BinaryInfo>> {
        inspect_binary(path)
    }

    fn apply(&self, path: &Path, format: BinaryFormat, edit: &LinkEdit) -> Result<()> {
        match (format, edit) {
            (BinaryFormat::Elf, LinkEdit::ReplaceDependency { old, new }) => {
                run_tool("patchelf", ["--replace-needed", old.as_str(), new.as_str()], path)
            }
            (BinaryFormat::Elf, LinkEdit::SetRunPaths(entries)) => {
                let joined = entries.join(":");
                run_tool("patchelf", ["--set-rpath", joined.as_str()], path)
            }
            (BinaryFormat::Elf, LinkEdit::SetInterpreter(interp)) => {
                run_tool("patchelf", ["--set-interpreter", interp.as_str()], path)
            }
            (BinaryFormat::MachO, LinkEdit::ReplaceDependency { old, new }) => {
                run_tool("install_name_tool", ["-change", old.as_str(), new.as_str()], path)
            }
            (BinaryFormat::MachO, LinkEdit::SetIdentity(id)) => {
                run_tool("install_name_tool", ["-id", id.as_str()], path)
            }
            (BinaryFormat::MachO, LinkEdit::DeleteRunPath(entry)) => {
                run_tool("install_name_tool", ["-delete_rpath", entry.as_str()], path)
            }
            (BinaryFormat::MachO, LinkEdit::AddRunPath(entry)) => {
                run_tool("install_name_tool", ["-add_rpath", entry.as_str()], path)
            }
            (format, edit) => bail!(
                "{:?} edit not supported for {:?} binary {}",
                edit,
                format,
                path.display()
            ),
        }
    }
}

/// Run an editing tool with `args` followed by the binary path.
fn run_tool<'a>(program: &str, args: impl IntoIterator<Item = &'a str>, path: &Path) -> Result<()> {
    let output = Command::new(program)
        .args(args)
        .arg(path.as_os_str())
        .output()
        .with_context(|| format!("{program} command not found"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "{} failed on {}: {}",
            program,
            path.display(),
            stderr.trim()
        );
    }
    Ok(())
}

/// Whether an edit tool exists on `PATH`.
pub fn tool_available(program: impl AsRef<OsStr>) -> bool {
    Command::new(program)
        .arg("--version")
        .output()
        .is_ok()
}
