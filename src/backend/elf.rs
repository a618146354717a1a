// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Reads linkage metadata out of ELF shared objects. Uses the `goblin` crate for parsing.

use goblin::elf::Elf as GoblinElf;
use std::fs;
use std::io;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use thiserror::Error;

type Result<T> = std::result::Result<T, ElfError>;

/// Errors that can occur when parsing ELF files.
#[derive(Debug, Error)]
pub enum ElfError {
    #[error("File is too small to be an ELF file: {path:?}")]
    FileTooSmall { path: PathBuf },
    #[error("File is not an ELF file: {path:?}")]
    NotElfFile { path: PathBuf },
    #[error("Failed to open file: {path:?}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to read file: {path:?}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse ELF file: {path:?}")]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: goblin::error::Error,
    },
}

/// Linkage metadata of one ELF shared object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfInfo {
    soname: Option<String>,
    dependencies: Vec<String>,
    rpath: Vec<String>,
    runpath: Vec<String>,
}

impl ElfInfo {
    /// Parse the dynamic section of the file at `path`.
    ///
    /// # Errors
    /// Returns an error if the file is not an ELF file or cannot be read.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = Self::read(path)?;
        let elf = GoblinElf::parse(&bytes).map_err(|e| ElfError::ParseFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut soname = None;
        let mut dependencies = Vec::new();
        let mut rpath = Vec::new();
        let mut runpath = Vec::new();

        if let Some(dynamic) = &elf.dynamic {
            for dyn_entry in &dynamic.dyns {
                let Ok(strtab_idx) = usize::try_from(dyn_entry.d_val) else {
                    continue;
                };
                match dyn_entry.d_tag {
                    goblin::elf::dynamic::DT_SONAME => {
                        if let Some(name) = elf.dynstrtab.get_at(strtab_idx) {
                            if !name.is_empty() {
                                soname = Some(name.to_string());
                            }
                        }
                    }
                    goblin::elf::dynamic::DT_NEEDED => {
                        if let Some(dep_name) = elf.dynstrtab.get_at(strtab_idx) {
                            dependencies.push(dep_name.to_string());
                        }
                    }
                    goblin::elf::dynamic::DT_RPATH => {
                        if let Some(rpath_str) = elf.dynstrtab.get_at(strtab_idx) {
                            rpath.extend(split_path_list(rpath_str));
                        }
                    }
                    goblin::elf::dynamic::DT_RUNPATH => {
                        if let Some(runpath_str) = elf.dynstrtab.get_at(strtab_idx) {
                            runpath.extend(split_path_list(runpath_str));
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(Self {
            soname,
            dependencies,
            rpath,
            runpath,
        })
    }

    /// The `DT_SONAME` entry, if present and non-empty.
    #[must_use]
    pub fn soname(&self) -> Option<&str> {
        self.soname.as_deref()
    }

    /// The `DT_NEEDED` entries, in declaration order.
    #[must_use]
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// The embedded runtime search paths.
    ///
    /// If both `DT_RPATH` and `DT_RUNPATH` are present, `RUNPATH` takes
    /// precedence and `RPATH` is ignored, matching the dynamic linker.
    #[must_use]
    pub fn search_paths(&self) -> &[String] {
        if self.runpath.is_empty() {
            &self.rpath
        } else {
            &self.runpath
        }
    }

    /// Reads the entire file at path into bytes if the file is an ELF file.
    fn read(path: &Path) -> Result<Vec<u8>> {
        // ELF magic bytes: 0x7f followed by ASCII "ELF"
        // Defined in the ELF specification: e_ident[EI_MAG0..EI_MAG3]
        const ELF_MAGIC: [u8; 4] = [0x7f, 0x45, 0x4c, 0x46];

        let metadata = fs::metadata(path).map_err(|e| ElfError::OpenFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        // Must be at least the ELF header size
        if metadata.len() < 64 {
            return Err(ElfError::FileTooSmall {
                path: path.to_path_buf(),
            });
        }

        // Open file once and check magic bytes before handing the whole file to goblin
        let mut file = fs::File::open(path).map_err(|e| ElfError::OpenFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut magic = [0u8; 4];
        match file.read_exact(&mut magic) {
            Ok(()) => {
                if magic != ELF_MAGIC {
                    return Err(ElfError::NotElfFile {
                        path: path.to_path_buf(),
                    });
                }
            }
            Err(e) => {
                return Err(ElfError::ReadFailed {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        }

        file.seek(std::io::SeekFrom::Start(0))
            .map_err(|e| ElfError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| ElfError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(bytes)
    }
}

fn split_path_list(list: &str) -> impl Iterator<Item = String> + '_ {
    list.split(':')
        .filter(|s| !s.is_empty())
        .map(std::string::ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_file_too_small() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"not an elf").unwrap();
        file.flush().unwrap();

        let result = ElfInfo::from_path(file.path());
        assert!(matches!(result, Err(ElfError::FileTooSmall { .. })));
    }

    #[test]
    fn test_not_elf_file() {
        let mut file = NamedTempFile::new().unwrap();
        let content = "This is not an ELF file. It's just a text file for testing. \
                       Adding more content to ensure it's longer than 64 bytes which is \
                       the minimum size for a valid ELF file header.";
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();

        let result = ElfInfo::from_path(file.path());
        assert!(matches!(result, Err(ElfError::NotElfFile { .. })));
    }

    #[test]
    fn test_open_failed_for_missing_file() {
        let result = ElfInfo::from_path(Path::new("/nonexistent/libmissing.so"));
        assert!(matches!(result, Err(ElfError::OpenFailed { .. })));
    }

    #[test]
    fn test_runpath_shadows_rpath() {
        let info = ElfInfo {
            soname: None,
            dependencies: Vec::new(),
            rpath: vec!["/usr/lib".to_string()],
            runpath: vec!["$ORIGIN".to_string()],
        };
        assert_eq!(info.search_paths(), ["$ORIGIN"]);

        let rpath_only = ElfInfo {
            soname: None,
            dependencies: Vec::new(),
            rpath: vec!["/usr/lib".to_string()],
            runpath: Vec::new(),
        };
        assert_eq!(rpath_only.search_paths(), ["/usr/lib"]);
    }

    #[test]
    fn test_split_path_list_drops_empty_entries() {
        let parts: Vec<String> = split_path_list("$ORIGIN::$ORIGIN/../lib:").collect();
        assert_eq!(parts, vec!["$ORIGIN", "$ORIGIN/../lib"]);
    }
}
