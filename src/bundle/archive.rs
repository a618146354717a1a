// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Extracts and creates the compressed vendor archive using `tar`.

use std::ffi::{OsStr, OsString};
use std::path::Path;

use super::{BundleError, BundleResult};
use crate::process::run_checked;

/// Extract a gzipped tar archive into `dest`.
pub(crate) fn extract(archive: &Path, dest: &Path) -> BundleResult<()> {
    run_checked(
        "tar",
        &[
            OsStr::new("-xzf"),
            archive.as_os_str(),
            OsStr::new("--directory"),
            dest.as_os_str(),
        ],
        None,
    )?;
    Ok(())
}

/// Pack the top-level entries of `contents_root` into a gzipped tar archive.
pub(crate) fn create(archive: &Path, contents_root: &Path) -> BundleResult<()> {
    let mut entries: Vec<OsString> = std::fs::read_dir(contents_root)
        .map_err(|e| BundleError::ReadDirFailed {
            path: contents_root.to_path_buf(),
            source: e,
        })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name())
        .collect();
    entries.sort();

    let mut args: Vec<&OsStr> = vec![
        OsStr::new("-czf"),
        archive.as_os_str(),
        OsStr::new("--directory"),
        contents_root.as_os_str(),
    ];
    args.extend(entries.iter().map(OsString::as_os_str));
    run_checked("tar", &args, None)?;
    Ok(())
}
