// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! The binary metadata backend: per-platform access to a shared library's
//! self-identifier, declared dependencies, and runtime search paths.

mod darwin;
mod elf;
mod linux;

pub use darwin::DarwinBackend;
pub use elf::{ElfError, ElfInfo};
pub use linux::LinuxBackend;

use std::path::Path;
use thiserror::Error;

use crate::process::ProcessError;

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Errors that can occur while reading or writing library metadata.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Elf error: {0}")]
    Elf(#[from] ElfError),
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),
    #[error("Unexpected output from {command} for {path:?}: {detail}")]
    MalformedOutput {
        command: String,
        path: std::path::PathBuf,
        detail: String,
    },
    #[error("Unsupported platform: {os}")]
    UnsupportedPlatform { os: String },
}

/// Per-file, synchronous access to the linkage records of one shared library.
///
/// One implementation exists per platform; the engine never parses the
/// binary container format itself.
pub trait MetadataBackend {
    /// The name the library advertises as its own canonical reference.
    fn self_identifier(&self, path: &Path) -> BackendResult<Option<String>>;

    fn set_self_identifier(&self, path: &Path, name: &str) -> BackendResult<()>;

    /// The embedded runtime search paths, in declaration order.
    fn search_paths(&self, path: &Path) -> BackendResult<Vec<String>>;

    /// Replace the embedded search-path list wholesale.
    fn set_search_paths(&self, path: &Path, paths: &[String]) -> BackendResult<()>;

    /// The declared dependency references, in declaration order.
    fn dependencies(&self, path: &Path) -> BackendResult<Vec<String>>;

    /// Rewrite one declared dependency reference in place.
    fn rewrite_dependency(&self, path: &Path, old: &str, new: &str) -> BackendResult<()>;
}

/// Select the backend for the platform this process runs on.
///
/// # Errors
/// Returns an error when running on a platform without a backend.
pub fn select_backend() -> BackendResult<Box<dyn MetadataBackend>> {
    match std::env::consts::OS {
        "linux" => Ok(Box::new(LinuxBackend)),
        "macos" => Ok(Box::new(DarwinBackend::new())),
        os => Err(BackendError::UnsupportedPlatform { os: os.to_string() }),
    }
}
