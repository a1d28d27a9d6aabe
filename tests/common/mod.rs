//! Scripted link editor for pipeline tests.
//!
//! A "binary" is a text file starting with `FAKEBIN <elf|macho>` followed by
//! one `key value` line per metadata item (`id`, `interp`, `needed`, `rpath`)
//! and free-form `data` lines standing in for raw section bytes. Copies carry
//! their metadata along, so the whole pipeline runs without real toolchains.

#![allow(dead_code)]

use anyhow::{bail, Context, Result};
use leviso_bundle::{BinaryFormat, BinaryInfo, LinkEdit, LinkEditor};
use std::fs;
use std::path::Path;

const MAGIC: &str = "FAKEBIN";

#[derive(Debug, Clone)]
pub struct FakeBinary {
    pub info: BinaryInfo,
    pub data: Vec<String>,
}

impl FakeBinary {
    pub fn elf() -> Self {
        Self {
            info: BinaryInfo::new(BinaryFormat::Elf),
            data: Vec::new(),
        }
    }

    pub fn macho() -> Self {
        Self {
            info: BinaryInfo::new(BinaryFormat::MachO),
            data: Vec::new(),
        }
    }

    pub fn needs(mut self, dep: impl Into<String>) -> Self {
        self.info.dependencies.push(dep.into());
        self
    }

    pub fn rpath(mut self, entry: impl Into<String>) -> Self {
        self.info.run_paths.push(entry.into());
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.info.identity = Some(id.into());
        self
    }

    pub fn interp(mut self, interp: impl Into<String>) -> Self {
        self.info.interpreter = Some(interp.into());
        self
    }

    pub fn data(mut self, line: impl Into<String>) -> Self {
        self.data.push(line.into());
        self
    }

    pub fn write(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, self.render()).unwrap();
    }

    pub fn render(&self) -> String {
        let format = match self.info.format {
            BinaryFormat::Elf => "elf",
            BinaryFormat::MachO => "macho",
        };
        let mut out = format!("{MAGIC} {format}\n");
        if let Some(id) = &self.info.identity {
            out.push_str(&format!("id {id}\n"));
        }
        if let Some(interp) = &self.info.interpreter {
            out.push_str(&format!("interp {interp}\n"));
        }
        for dep in &self.info.dependencies {
            out.push_str(&format!("needed {dep}\n"));
        }
        for entry in &self.info.run_paths {
            out.push_str(&format!("rpath {entry}\n"));
        }
        for line in &self.data {
            out.push_str(&format!("data {line}\n"));
        }
        out
    }

    pub fn parse(text: &str) -> Option<Self> {
        let mut lines = text.lines();
        let header = lines.next()?;
        let format = match header.strip_prefix(MAGIC)?.trim() {
            "elf" => BinaryFormat::Elf,
            "macho" => BinaryFormat::MachO,
            _ => return None,
        };
        let mut fake = Self {
            info: BinaryInfo::new(format),
            data: Vec::new(),
        };
        for line in lines {
            let (key, value) = line.split_once(' ').unwrap_or((line, ""));
            match key {
                "id" => fake.info.identity = Some(value.to_string()),
                "interp" => fake.info.interpreter = Some(value.to_string()),
                "needed" => fake.info.dependencies.push(value.to_string()),
                "rpath" => fake.info.run_paths.push(value.to_string()),
                "data" => fake.data.push(value.to_string()),
                _ => {}
            }
        }
        Some(fake)
    }

    pub fn read(path: &Path) -> Self {
        Self::parse(&fs::read_to_string(path).unwrap()).unwrap()
    }
}

/// [`LinkEditor`] over `FAKEBIN` files.
#[derive(Debug, Default)]
pub struct FakeLinkEditor {
    /// Make every install-name edit fail.
    pub fail_identity_edits: bool,
}

impl LinkEditor for FakeLinkEditor {
    fn inspect(&self, path: &Path) -> Result<Option<BinaryInfo>> {
        if !path.exists() {
            bail!("File does not exist: {}", path.display());
        }
        if !path.is_file() {
            return Ok(None);
        }
        let Ok(text) = fs::read_to_string(path) else {
            return Ok(None);
        };
        Ok(FakeBinary::parse(&text).map(|f| f.info))
    }

    fn apply(&self, path: &Path, format: BinaryFormat, edit: &LinkEdit) -> Result<()> {
        let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let mut fake = FakeBinary::parse(&text).context("not a fake binary")?;
        if fake.info.format != format {
            bail!("format mismatch for {}", path.display());
        }
        let info = &mut fake.info;

        match edit {
            LinkEdit::ReplaceDependency { old, new } => {
                let Some(slot) = info.dependencies.iter_mut().find(|d| d.as_str() == old.as_str()) else {
                    bail!("{} has no dependency {old}", path.display());
                };
                *slot = new.clone();
            }
            LinkEdit::SetIdentity(id) => {
                if self.fail_identity_edits {
                    bail!("simulated install_name_tool failure");
                }
                if format != BinaryFormat::MachO {
                    bail!("ELF has no install name");
                }
                info.identity = Some(id.clone());
            }
            LinkEdit::DeleteRunPath(entry) => {
                let before = info.run_paths.len();
                info.run_paths.retain(|r| r != entry);
                if info.run_paths.len() == before {
                    bail!("no LC_RPATH {entry}");
                }
            }
            LinkEdit::AddRunPath(entry) => {
                if info.run_paths.contains(entry) {
                    bail!("duplicate LC_RPATH {entry}");
                }
                info.run_paths.push(entry.clone());
            }
            LinkEdit::SetRunPaths(entries) => info.run_paths = entries.clone(),
            LinkEdit::SetInterpreter(interp) => info.interpreter = Some(interp.clone()),
        }

        // Rewritten strings replace the old ones in the "string table"
        fs::write(path, fake.render()).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}
