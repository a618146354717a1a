// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Linux backend: reads metadata with `goblin`, writes it with `patchelf`.

use std::ffi::OsStr;
use std::path::Path;

use super::elf::ElfInfo;
use super::{BackendResult, MetadataBackend};
use crate::process::run_checked;

pub struct LinuxBackend;

impl MetadataBackend for LinuxBackend {
    fn self_identifier(&self, path: &Path) -> BackendResult<Option<String>> {
        Ok(ElfInfo::from_path(path)?.soname().map(str::to_string))
    }

    fn set_self_identifier(&self, path: &Path, name: &str) -> BackendResult<()> {
        run_checked(
            "patchelf",
            &[OsStr::new("--set-soname"), OsStr::new(name), path.as_os_str()],
            None,
        )?;
        Ok(())
    }

    fn search_paths(&self, path: &Path) -> BackendResult<Vec<String>> {
        Ok(ElfInfo::from_path(path)?.search_paths().to_vec())
    }

    fn set_search_paths(&self, path: &Path, paths: &[String]) -> BackendResult<()> {
        if paths.is_empty() {
            run_checked(
                "patchelf",
                &[OsStr::new("--remove-rpath"), path.as_os_str()],
                None,
            )?;
        } else {
            let joined = paths.join(":");
            run_checked(
                "patchelf",
                &[
                    OsStr::new("--set-rpath"),
                    OsStr::new(&joined),
                    path.as_os_str(),
                ],
                None,
            )?;
        }
        Ok(())
    }

    fn dependencies(&self, path: &Path) -> BackendResult<Vec<String>> {
        Ok(ElfInfo::from_path(path)?.dependencies().to_vec())
    }

    fn rewrite_dependency(&self, path: &Path, old: &str, new: &str) -> BackendResult<()> {
        run_checked(
            "patchelf",
            &[
                OsStr::new("--replace-needed"),
                OsStr::new(old),
                OsStr::new(new),
                path.as_os_str(),
            ],
            None,
        )?;
        Ok(())
    }
}
