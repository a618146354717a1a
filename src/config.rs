// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Platform constants and the system-dependency allow-list, built once at startup.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Directory inside the bundle where shared libraries are installed.
pub const ENV_LIB_DIR: &str = "env/lib";

/// Install prefix for files that currently live inside a component package.
pub const COMPONENT_INSTALL_PREFIX: &str = "env/lib/modules";

/// The sole directories allowed at the top level of a vendor bundle.
pub const TOP_LEVEL_DIRS: &[&str] = &["env", "packages"];

/// Suffix appended to the scratch directory an archive is unpacked into.
pub const CONTENTS_SUFFIX: &str = "-contents";

/// File extension of nested component packages.
pub const COMPONENT_EXTENSION: &str = "zip";

const LINUX_ALLOWED_SYSTEM_DEPS: &[&str] = &[
    "ld-linux-x86-64.so.2",
    "libc.so.6",
    "libcrypto.so.10",
    "libdl.so.2",
    "libexpat.so.1",
    "libgcc_s.so.1",
    "libm.so.6",
    "libodbc.so.2",
    "libpcre.so.1",
    "libpcreposix.so.0",
    "libpthread.so.0",
    "libresolv.so.2",
    "librt.so.1",
    "libssl.so.10",
    "libstdc++.so.6",
    "libz.so.1",
];

const DARWIN_ALLOWED_SYSTEM_DEPS: &[&str] = &[
    "/usr/lib/libSystem.B.dylib",
    "/usr/lib/libc++.1.dylib",
    "/usr/lib/libcharset.1.dylib",
    "/usr/lib/libiconv.2.dylib",
    "/usr/lib/libncurses.5.4.dylib",
    "/usr/lib/libpanel.5.4.dylib",
    "/usr/lib/libresolv.9.dylib",
    "/usr/lib/libsasl2.2.dylib",
    "/usr/lib/libz.1.dylib",
];

/// Immutable platform-specific settings, constructed once at process start
/// and passed explicitly to everything that needs them.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Loader-relative marker that expands to the directory of the loading
    /// library (`$ORIGIN` on Linux, `@loader_path` on Darwin).
    pub loader_marker: &'static str,
    /// Alternative spellings of the loader marker accepted on read.
    pub loader_marker_aliases: &'static [&'static str],
    /// Prefix a canonical in-bundle dependency reference carries.
    pub reference_prefix: &'static str,
    /// Shared-library file extensions.
    pub lib_extensions: &'static [&'static str],
    /// Path prefixes that identify a dependency as a system library.
    pub system_prefixes: &'static [&'static str],
    /// Canonical name of the vendor archive on this platform.
    pub archive_name: &'static str,
    /// System dependencies allowed to stay unresolved.
    pub builtin_allowed_deps: &'static [&'static str],
}

impl PlatformConfig {
    #[must_use]
    pub fn linux() -> Self {
        Self {
            loader_marker: "$ORIGIN",
            loader_marker_aliases: &["$ORIGIN", "${ORIGIN}"],
            reference_prefix: "",
            lib_extensions: &[".so"],
            system_prefixes: &[],
            archive_name: "vendor-Linux.tar.gz",
            builtin_allowed_deps: LINUX_ALLOWED_SYSTEM_DEPS,
        }
    }

    #[must_use]
    pub fn darwin() -> Self {
        Self {
            loader_marker: "@loader_path",
            loader_marker_aliases: &["@loader_path"],
            reference_prefix: "@rpath/",
            lib_extensions: &[".dylib", ".so"],
            system_prefixes: &["/usr/lib/"],
            archive_name: "vendor-Darwin.tar.gz",
            builtin_allowed_deps: DARWIN_ALLOWED_SYSTEM_DEPS,
        }
    }

    /// Config for the platform this process runs on, `None` if unsupported.
    #[must_use]
    pub fn host() -> Option<Self> {
        match std::env::consts::OS {
            "linux" => Some(Self::linux()),
            "macos" => Some(Self::darwin()),
            _ => None,
        }
    }
}

/// Set of dependency identifiers expected to exist on the target system.
pub struct AllowList {
    names: HashSet<String>,
}

impl AllowList {
    /// Build the allow-list from the platform's built-in table.
    #[must_use]
    pub fn new(config: &PlatformConfig) -> Self {
        Self {
            names: config
                .builtin_allowed_deps
                .iter()
                .map(std::string::ToString::to_string)
                .collect(),
        }
    }

    /// Extend the allow-list from a file of exact dependency names.
    ///
    /// Each line is one name. Empty lines and lines starting with `#` are
    /// ignored.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read.
    pub fn extend_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let content = fs::read_to_string(path.as_ref()).with_context(|| {
            format!(
                "Failed to read allow-list file: {}",
                path.as_ref().display()
            )
        })?;
        self.names.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(std::string::ToString::to_string),
        );
        Ok(())
    }

    /// Check whether a dependency string exactly matches an allowed name.
    #[must_use]
    pub fn contains(&self, dependency: &str) -> bool {
        self.names.contains(dependency)
    }
}
