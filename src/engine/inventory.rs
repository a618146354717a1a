// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Scans the scratch tree into a name-keyed inventory of shared libraries and
//! computes each library's eventual install path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use crate::backend::{BackendError, MetadataBackend};
use crate::config::{PlatformConfig, COMPONENT_EXTENSION, COMPONENT_INSTALL_PREFIX, CONTENTS_SUFFIX};
use crate::engine::names;

pub type InventoryResult<T> = std::result::Result<T, InventoryError>;

/// Errors that can occur while building the inventory.
#[derive(Debug, Error)]
pub enum InventoryError {
    // Resolution is name-keyed, so two libraries sharing a file name is an
    // unresolvable ambiguity.
    #[error("Duplicate library name {name}: {first:?} and {second:?}")]
    DuplicateLibraryName {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("Failed to walk bundle tree: {path:?}")]
    WalkFailed {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("Backend error for {path:?}: {source}")]
    ReadMetadataFailed {
        path: PathBuf,
        #[source]
        source: BackendError,
    },
}

/// One shared library file inside the bundle.
#[derive(Debug, Clone)]
pub struct LibraryRecord {
    /// Base name, the unique inventory key.
    pub file_name: String,
    /// Current absolute location inside the scratch tree.
    pub path: PathBuf,
    /// Bundle-relative path this library will occupy once installed.
    pub eventual_path: PathBuf,
    /// The name the library advertises as its own canonical reference.
    pub self_identifier: Option<String>,
    /// Embedded runtime search paths, as read at scan time.
    pub search_paths: Vec<String>,
    /// Declared raw dependency references, in order.
    pub dependencies: Vec<String>,
}

/// Snapshot of every non-symlink shared library under the scratch root,
/// keyed by file name. Rebuilt from scratch whenever a pass has mutated
/// files on disk; no cross-pass state is trusted.
#[derive(Debug)]
pub struct Inventory {
    libs: BTreeMap<String, LibraryRecord>,
}

impl Inventory {
    /// Scan the scratch tree and read each library's metadata through the
    /// backend.
    ///
    /// # Errors
    /// Fails if two non-symlink libraries share a file name, if the tree
    /// cannot be walked, or if metadata cannot be read.
    pub fn scan(
        scratch_root: &Path,
        config: &PlatformConfig,
        backend: &dyn MetadataBackend,
    ) -> InventoryResult<Self> {
        let mut libs: BTreeMap<String, LibraryRecord> = BTreeMap::new();
        for entry in WalkDir::new(scratch_root).sort_by_file_name() {
            let entry = entry.map_err(|e| InventoryError::WalkFailed {
                path: scratch_root.to_path_buf(),
                source: e,
            })?;
            // Symlinked entries are excluded from the inventory; resolution
            // follows them on disk instead.
            if !entry.file_type().is_file() || entry.path_is_symlink() {
                continue;
            }
            let Some(file_name) = entry.file_name().to_str() else {
                continue;
            };
            if !names::is_library_name(file_name, config) {
                continue;
            }
            let record = read_record(entry.path(), scratch_root, backend)?;
            if let Some(existing) = libs.get(&record.file_name) {
                return Err(InventoryError::DuplicateLibraryName {
                    name: record.file_name.clone(),
                    first: existing.path.clone(),
                    second: record.path,
                });
            }
            libs.insert(record.file_name.clone(), record);
        }
        Ok(Self { libs })
    }

    #[must_use]
    pub fn get(&self, file_name: &str) -> Option<&LibraryRecord> {
        self.libs.get(file_name)
    }

    /// All records, in lexicographic file-name order.
    pub fn libraries(&self) -> impl Iterator<Item = &LibraryRecord> {
        self.libs.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.libs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.libs.is_empty()
    }
}

/// Read one library's metadata into a record.
pub(crate) fn read_record(
    path: &Path,
    scratch_root: &Path,
    backend: &dyn MetadataBackend,
) -> InventoryResult<LibraryRecord> {
    let read = |e: BackendError| InventoryError::ReadMetadataFailed {
        path: path.to_path_buf(),
        source: e,
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(LibraryRecord {
        file_name,
        path: path.to_path_buf(),
        eventual_path: eventual_install_path(path, scratch_root),
        self_identifier: backend.self_identifier(path).map_err(read)?,
        search_paths: backend.search_paths(path).map_err(read)?,
        dependencies: backend.dependencies(path).map_err(read)?,
    })
}

/// The bundle-relative path a file will occupy once the bundle is installed.
///
/// Files inside an unpacked component package (a `<name>.zip-contents`
/// directory in the scratch root) move under the component install prefix;
/// everything else keeps its bundle-relative location.
fn eventual_install_path(path: &Path, scratch_root: &Path) -> PathBuf {
    let relative = path.strip_prefix(scratch_root).unwrap_or(path);
    let mut components = relative.components();
    let Some(top) = components.next() else {
        return relative.to_path_buf();
    };
    let top_name = top.as_os_str().to_string_lossy();
    let Some(container) = top_name.strip_suffix(CONTENTS_SUFFIX) else {
        return relative.to_path_buf();
    };
    let rest: PathBuf = components.collect();
    if container.ends_with(&format!(".{COMPONENT_EXTENSION}")) {
        Path::new(COMPONENT_INSTALL_PREFIX).join(rest)
    } else {
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendResult;
    use std::fs;
    use tempfile::TempDir;

    /// Backend that reports no metadata at all; scan shape tests only need
    /// the file system side.
    struct EmptyBackend;

    impl MetadataBackend for EmptyBackend {
        fn self_identifier(&self, _path: &Path) -> BackendResult<Option<String>> {
            Ok(None)
        }
        fn set_self_identifier(&self, _path: &Path, _name: &str) -> BackendResult<()> {
            Ok(())
        }
        fn search_paths(&self, _path: &Path) -> BackendResult<Vec<String>> {
            Ok(Vec::new())
        }
        fn set_search_paths(&self, _path: &Path, _paths: &[String]) -> BackendResult<()> {
            Ok(())
        }
        fn dependencies(&self, _path: &Path) -> BackendResult<Vec<String>> {
            Ok(Vec::new())
        }
        fn rewrite_dependency(&self, _path: &Path, _old: &str, _new: &str) -> BackendResult<()> {
            Ok(())
        }
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"stub").unwrap();
    }

    #[test]
    fn test_scan_collects_libraries_and_skips_other_files() {
        let scratch = TempDir::new().unwrap();
        let contents = scratch.path().join("vendor-Linux.tar.gz-contents");
        touch(&contents.join("env/lib/liba.so"));
        touch(&contents.join("env/lib/libb.so.1.2"));
        touch(&contents.join("env/share/readme.txt"));

        let inventory = Inventory::scan(
            scratch.path(),
            &PlatformConfig::linux(),
            &EmptyBackend,
        )
        .unwrap();
        assert_eq!(inventory.len(), 2);
        assert!(inventory.get("liba.so").is_some());
        assert!(inventory.get("libb.so.1.2").is_some());
        assert!(inventory.get("readme.txt").is_none());
    }

    #[test]
    fn test_duplicate_library_name_is_fatal() {
        let scratch = TempDir::new().unwrap();
        let contents = scratch.path().join("vendor-Linux.tar.gz-contents");
        touch(&contents.join("env/lib/libfoo.so"));
        touch(&contents.join("env/lib/plugins/libfoo.so"));

        let result = Inventory::scan(
            scratch.path(),
            &PlatformConfig::linux(),
            &EmptyBackend,
        );
        match result {
            Err(InventoryError::DuplicateLibraryName { name, .. }) => {
                assert_eq!(name, "libfoo.so");
            }
            other => panic!("Expected DuplicateLibraryName, got {other:?}"),
        }
    }

    #[test]
    fn test_symlinks_are_excluded() {
        let scratch = TempDir::new().unwrap();
        let contents = scratch.path().join("vendor-Linux.tar.gz-contents");
        touch(&contents.join("env/lib/libreal.so.1"));
        std::os::unix::fs::symlink("libreal.so.1", contents.join("env/lib/libreal.so"))
            .unwrap();

        let inventory = Inventory::scan(
            scratch.path(),
            &PlatformConfig::linux(),
            &EmptyBackend,
        )
        .unwrap();
        assert_eq!(inventory.len(), 1);
        assert!(inventory.get("libreal.so.1").is_some());
        assert!(inventory.get("libreal.so").is_none());
    }

    #[test]
    fn test_eventual_path_for_bundle_library() {
        let scratch = Path::new("/scratch");
        let path = scratch.join("vendor-Linux.tar.gz-contents/env/lib/liba.so");
        assert_eq!(
            eventual_install_path(&path, scratch),
            PathBuf::from("env/lib/liba.so")
        );
    }

    #[test]
    fn test_eventual_path_for_component_library() {
        let scratch = Path::new("/scratch");
        let path = scratch.join("widgets.zip-contents/plugin/libw.so");
        assert_eq!(
            eventual_install_path(&path, scratch),
            PathBuf::from("env/lib/modules/plugin/libw.so")
        );
    }
}
