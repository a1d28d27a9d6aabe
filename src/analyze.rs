//! Binary format inspection using goblin.
//!
//! Files are sniffed by content, never by extension. Anything that is not an
//! ELF or Mach-O object is reported as not inspectable (`Ok(None)`), which
//! callers treat as "skip this file".

use anyhow::{bail, Context, Result};
use goblin::mach::{Mach, MachO, SingleArch};
use goblin::Object;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

/// Object format of an inspectable binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryFormat {
    Elf,
    MachO,
}

/// Link metadata of one binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryInfo {
    pub format: BinaryFormat,
    /// Declared dependencies in load order (`NEEDED` / `LC_LOAD_DYLIB`).
    pub dependencies: Vec<String>,
    /// Mach-O install name (`LC_ID_DYLIB`). Always `None` for ELF.
    pub identity: Option<String>,
    /// Embedded search paths (`RPATH` + `RUNPATH` / `LC_RPATH`).
    pub run_paths: Vec<String>,
    /// ELF program interpreter.
    pub interpreter: Option<String>,
}

impl BinaryInfo {
    pub fn new(format: BinaryFormat) -> Self {
        Self {
            format,
            dependencies: Vec::new(),
            identity: None,
            run_paths: Vec::new(),
            interpreter: None,
        }
    }

    pub fn push_dependency(&mut self, dep: &str) {
        if !self.dependencies.iter().any(|d| d == dep) {
            self.dependencies.push(dep.to_string());
        }
    }

    pub fn push_run_path(&mut self, entry: &str) {
        if !entry.is_empty() && !self.run_paths.iter().any(|r| r == entry) {
            self.run_paths.push(entry.to_string());
        }
    }
}

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const MACHO_MAGICS: [[u8; 4]; 6] = [
    [0xfe, 0xed, 0xfa, 0xce],
    [0xce, 0xfa, 0xed, 0xfe],
    [0xfe, 0xed, 0xfa, 0xcf],
    [0xcf, 0xfa, 0xed, 0xfe],
    // Fat headers (also used by Java class files, goblin disambiguates)
    [0xca, 0xfe, 0xba, 0xbe],
    [0xbe, 0xba, 0xfe, 0xca],
];

/// Identify the object format from the leading bytes of a file.
pub fn sniff_format(magic: &[u8]) -> Option<BinaryFormat> {
    if magic.len() < 4 {
        return None;
    }
    let head = [magic[0], magic[1], magic[2], magic[3]];
    if head == ELF_MAGIC {
        Some(BinaryFormat::Elf)
    } else if MACHO_MAGICS.contains(&head) {
        Some(BinaryFormat::MachO)
    } else {
        None
    }
}

/// Read the link metadata of a binary.
///
/// # Errors
///
/// Returns an error only if the file does not exist. Unreadable or
/// unrecognized files produce `Ok(None)`.
pub fn inspect_binary(path: &Path) -> Result<Option<BinaryInfo>> {
    if !path.exists() {
        bail!("File does not exist: {}", path.display());
    }
    if !path.is_file() {
        return Ok(None);
    }

    let mut magic = [0u8; 4];
    let sniffed = File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .ok()
        .and_then(|_| sniff_format(&magic));
    if sniffed.is_none() {
        return Ok(None);
    }

    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(parse_binary(&bytes))
}

/// Parse link metadata out of an in-memory object file.
pub fn parse_binary(bytes: &[u8]) -> Option<BinaryInfo> {
    match Object::parse(bytes) {
        Ok(Object::Elf(elf)) => {
            let mut info = BinaryInfo::new(BinaryFormat::Elf);
            for lib in &elf.libraries {
                info.push_dependency(lib);
            }
            // DT_RPATH and DT_RUNPATH are colon-separated lists
            for entry in elf.rpaths.iter().chain(elf.runpaths.iter()) {
                for part in entry.split(':') {
                    info.push_run_path(part);
                }
            }
            info.interpreter = elf.interpreter.map(str::to_string);
            Some(info)
        }
        Ok(Object::Mach(Mach::Binary(macho))) => {
            let mut info = BinaryInfo::new(BinaryFormat::MachO);
            merge_macho(&mut info, &macho);
            Some(info)
        }
        Ok(Object::Mach(Mach::Fat(multi))) => {
            let mut info = BinaryInfo::new(BinaryFormat::MachO);
            // One set of load commands per architecture slice
            for index in 0..multi.narches {
                match multi.get(index) {
                    Ok(SingleArch::MachO(macho)) => merge_macho(&mut info, &macho),
                    Ok(SingleArch::Archive(_)) => {}
                    Err(e) => tracing::debug!("Skipping unreadable fat slice {index}: {e}"),
                }
            }
            Some(info)
        }
        Ok(_) => None,
        Err(e) => {
            tracing::debug!("Not an inspectable object: {e}");
            None
        }
    }
}

fn merge_macho(info: &mut BinaryInfo, macho: &MachO) {
    // goblin lists the binary itself as "self" at index 0
    for lib in macho.libs.iter().filter(|l| *l != &"self") {
        info.push_dependency(lib);
    }
    for rpath in &macho.rpaths {
        info.push_run_path(rpath);
    }
    if info.identity.is_none() {
        info.identity = macho.name.map(str::to_string);
    }
    // An install name is not a dependency of its own binary
    if let Some(id) = &info.identity {
        info.dependencies.retain(|d| d != id);
    }
}
