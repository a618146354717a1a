// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Manages the bundle lifecycle: scratch directory, archive extraction,
//! nested component packages, and re-packing.

mod archive;
mod component;

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::{PlatformConfig, CONTENTS_SUFFIX, TOP_LEVEL_DIRS};
use crate::process::ProcessError;
use component::Component;

pub type BundleResult<T> = std::result::Result<T, BundleError>;

/// Errors that can occur while unpacking or re-packing the bundle.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("Input path does not exist: {path:?}")]
    InputMissing { path: PathBuf },
    #[error("Bundle is missing the top-level directory {dir:?}")]
    MissingTopLevelDir { dir: &'static str },
    #[error("Failed to set up scratch directory")]
    ScratchFailed {
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to copy {path:?} into the scratch directory")]
    CopyFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read directory {path:?}")]
    ReadDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to walk {path:?}")]
    WalkFailed {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("Failed to re-pack component archive {path:?}")]
    RepackFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),
}

/// The extracted bundle, alive for as long as its scratch directory.
///
/// The scratch root holds the unpacked archive under
/// `<archive-name>-contents` plus one `<name>-contents` directory per
/// nested component package.
pub struct Bundle {
    scratch: TempDir,
    contents_root: PathBuf,
    components: Vec<Component>,
}

impl Bundle {
    /// Unpack `input` (an archive, or a directory already holding extracted
    /// contents) into a fresh scratch directory, then unpack every nested
    /// component package.
    ///
    /// # Errors
    /// Fails if the input is missing, the bundle layout contract is
    /// violated, or extraction fails.
    pub fn open(input: &Path, config: &PlatformConfig) -> BundleResult<Self> {
        if !input.exists() {
            return Err(BundleError::InputMissing {
                path: input.to_path_buf(),
            });
        }

        let scratch = TempDir::new().map_err(|e| BundleError::ScratchFailed { source: e })?;
        let contents_root = scratch
            .path()
            .join(format!("{}{}", config.archive_name, CONTENTS_SUFFIX));
        fs::create_dir(&contents_root).map_err(|e| BundleError::ScratchFailed { source: e })?;

        if input.is_file() {
            eprintln!("Extracting {} ...", input.display());
            archive::extract(input, &contents_root)?;
        } else {
            eprintln!("Copying from {} ...", input.display());
            for &dir in TOP_LEVEL_DIRS {
                if !input.join(dir).is_dir() {
                    return Err(BundleError::MissingTopLevelDir { dir });
                }
                copy_tree(&input.join(dir), &contents_root.join(dir))?;
            }
        }

        for &dir in TOP_LEVEL_DIRS {
            if !contents_root.join(dir).is_dir() {
                return Err(BundleError::MissingTopLevelDir { dir });
            }
        }

        let components = component::unpack_all(&contents_root, scratch.path())?;
        Ok(Self {
            scratch,
            contents_root,
            components,
        })
    }

    /// The scratch directory holding the unpacked bundle and components.
    #[must_use]
    pub fn scratch_root(&self) -> &Path {
        self.scratch.path()
    }

    /// The root of the extracted bundle contents.
    #[must_use]
    pub fn contents_root(&self) -> &Path {
        &self.contents_root
    }

    /// Re-pack every component package, then write the fixed archive.
    ///
    /// # Errors
    /// Fails if a component cannot be re-packed or the archive cannot be
    /// written.
    pub fn pack(&self, output: &Path) -> BundleResult<()> {
        for component in &self.components {
            component::pack(component)?;
        }
        eprintln!("Writing {} ...", output.display());
        archive::create(output, &self.contents_root)
    }
}

/// Copy a directory tree, preserving symlinks as symlinks.
fn copy_tree(from: &Path, to: &Path) -> BundleResult<()> {
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(|e| BundleError::WalkFailed {
            path: from.to_path_buf(),
            source: e,
        })?;
        let relative = entry.path().strip_prefix(from).unwrap_or(entry.path());
        let dest = to.join(relative);
        let copy_err = |e: std::io::Error| BundleError::CopyFailed {
            path: entry.path().to_path_buf(),
            source: e,
        };
        if entry.path_is_symlink() {
            let target = fs::read_link(entry.path()).map_err(copy_err)?;
            std::os::unix::fs::symlink(target, &dest).map_err(copy_err)?;
        } else if entry.file_type().is_dir() {
            fs::create_dir_all(&dest).map_err(copy_err)?;
        } else {
            fs::copy(entry.path(), &dest).map_err(copy_err)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_rejects_missing_input() {
        let config = PlatformConfig::linux();
        let result = Bundle::open(Path::new("/nonexistent/vendor-Linux.tar.gz"), &config);
        assert!(matches!(result, Err(BundleError::InputMissing { .. })));
    }

    #[test]
    fn test_open_rejects_incomplete_layout() {
        let config = PlatformConfig::linux();
        let input = TempDir::new().unwrap();
        // Only one of the two required top-level directories.
        fs::create_dir_all(input.path().join("env/lib")).unwrap();

        let result = Bundle::open(input.path(), &config);
        assert!(matches!(
            result,
            Err(BundleError::MissingTopLevelDir { dir: "packages" })
        ));
    }

    #[test]
    fn test_open_copies_directory_input() {
        let config = PlatformConfig::linux();
        let input = TempDir::new().unwrap();
        fs::create_dir_all(input.path().join("env/lib")).unwrap();
        fs::create_dir_all(input.path().join("packages")).unwrap();
        fs::write(input.path().join("env/lib/liba.so"), b"stub").unwrap();
        std::os::unix::fs::symlink("liba.so", input.path().join("env/lib/liba.so.1")).unwrap();

        let bundle = Bundle::open(input.path(), &config).unwrap();
        let lib = bundle.contents_root().join("env/lib/liba.so");
        let link = bundle.contents_root().join("env/lib/liba.so.1");
        assert!(lib.is_file());
        assert!(link.symlink_metadata().unwrap().file_type().is_symlink());
    }
}
