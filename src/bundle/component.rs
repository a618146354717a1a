// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Unpacks and re-packs nested component packages (zip archives inside the
//! bundle) so the libraries inside them can be fixed in place.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{BundleError, BundleResult};
use crate::config::{COMPONENT_EXTENSION, CONTENTS_SUFFIX};
use crate::process::run_checked;

/// One nested component package: the archive inside the contents tree and
/// the scratch directory its contents were unpacked into.
pub(crate) struct Component {
    pub(crate) archive_path: PathBuf,
    pub(crate) contents_dir: PathBuf,
}

/// Unpack every component archive found under `contents_root` into the
/// scratch root, each into its own `<name>-contents` directory.
pub(crate) fn unpack_all(
    contents_root: &Path,
    scratch_root: &Path,
) -> BundleResult<Vec<Component>> {
    let mut archives = Vec::new();
    for entry in WalkDir::new(contents_root).sort_by_file_name() {
        let entry = entry.map_err(|e| BundleError::WalkFailed {
            path: contents_root.to_path_buf(),
            source: e,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_component = entry
            .path()
            .extension()
            .and_then(OsStr::to_str)
            .is_some_and(|ext| ext == COMPONENT_EXTENSION);
        if is_component {
            archives.push(entry.path().to_path_buf());
        }
    }

    let mut components = Vec::new();
    for archive_path in archives {
        let name = archive_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        eprintln!("Unpacking {name} ...");
        let contents_dir = scratch_root.join(format!("{name}{CONTENTS_SUFFIX}"));
        fs::create_dir(&contents_dir).map_err(|e| BundleError::ScratchFailed { source: e })?;
        run_checked(
            "unzip",
            &[
                OsStr::new("-q"),
                archive_path.as_os_str(),
                OsStr::new("-d"),
                contents_dir.as_os_str(),
            ],
            None,
        )?;
        components.push(Component {
            archive_path,
            contents_dir,
        });
    }
    Ok(components)
}

/// Re-pack one component from its scratch directory, replacing the archive
/// inside the contents tree.
pub(crate) fn pack(component: &Component) -> BundleResult<()> {
    let name = component
        .archive_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    eprintln!("Re-packing {name} ...");
    fs::remove_file(&component.archive_path).map_err(|e| BundleError::RepackFailed {
        path: component.archive_path.clone(),
        source: e,
    })?;
    // zip resolves a relative archive path against its working directory.
    run_checked(
        "zip",
        &[
            OsStr::new("-qr"),
            component.archive_path.as_os_str(),
            OsStr::new("."),
        ],
        Some(&component.contents_dir),
    )?;
    Ok(())
}
