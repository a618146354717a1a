// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Darwin backend: reads metadata by parsing `otool` output, writes it with
//! `install_name_tool`.

use std::ffi::OsStr;
use std::path::Path;

use super::{BackendError, BackendResult, MetadataBackend};
use crate::config::PlatformConfig;
use crate::process::run_capture_lines;

pub struct DarwinBackend {
    config: PlatformConfig,
}

impl DarwinBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: PlatformConfig::darwin(),
        }
    }

    fn run_install_name_tool(&self, args: &[&OsStr]) -> BackendResult<()> {
        // install_name_tool prints nothing interesting on success.
        crate::process::run_checked("install_name_tool", args, None)?;
        Ok(())
    }
}

impl Default for DarwinBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataBackend for DarwinBackend {
    fn self_identifier(&self, path: &Path) -> BackendResult<Option<String>> {
        let lines = run_capture_lines("otool", &[OsStr::new("-D"), path.as_os_str()])?;
        Ok(parse_install_name(&lines))
    }

    fn set_self_identifier(&self, path: &Path, name: &str) -> BackendResult<()> {
        self.run_install_name_tool(&[OsStr::new("-id"), OsStr::new(name), path.as_os_str()])
    }

    fn search_paths(&self, path: &Path) -> BackendResult<Vec<String>> {
        let lines = run_capture_lines("otool", &[OsStr::new("-l"), path.as_os_str()])?;
        parse_rpaths(&lines).map_err(|detail| BackendError::MalformedOutput {
            command: "otool -l".to_string(),
            path: path.to_path_buf(),
            detail,
        })
    }

    fn set_search_paths(&self, path: &Path, paths: &[String]) -> BackendResult<()> {
        // There is no wholesale replace; delete every current entry, then add.
        for rpath in self.search_paths(path)? {
            self.run_install_name_tool(&[
                OsStr::new("-delete_rpath"),
                OsStr::new(&rpath),
                path.as_os_str(),
            ])?;
        }
        for rpath in paths {
            self.run_install_name_tool(&[
                OsStr::new("-add_rpath"),
                OsStr::new(rpath),
                path.as_os_str(),
            ])?;
        }
        Ok(())
    }

    fn dependencies(&self, path: &Path) -> BackendResult<Vec<String>> {
        let lines = run_capture_lines("otool", &[OsStr::new("-L"), path.as_os_str()])?;
        Ok(parse_dependencies(&lines, &self.config))
    }

    fn rewrite_dependency(&self, path: &Path, old: &str, new: &str) -> BackendResult<()> {
        self.run_install_name_tool(&[
            OsStr::new("-change"),
            OsStr::new(old),
            OsStr::new(new),
            path.as_os_str(),
        ])
    }
}

/// `otool -D` prints the file name on the first line and, when the library
/// carries an install name, that name on the second.
fn parse_install_name(lines: &[String]) -> Option<String> {
    if lines.len() != 2 {
        return None;
    }
    let name = lines[1].trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Each `LC_RPATH` load command in `otool -l` output is followed two lines
/// later by `path <entry> (offset N)`.
fn parse_rpaths(lines: &[String]) -> std::result::Result<Vec<String>, String> {
    let mut rpaths = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if !line.contains("RPATH") {
            continue;
        }
        let path_line = lines
            .get(i + 2)
            .ok_or_else(|| format!("LC_RPATH at line {i} has no path line"))?;
        let entry = path_line
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| format!("malformed LC_RPATH path line: {path_line}"))?;
        rpaths.push(entry.to_string());
    }
    Ok(rpaths)
}

/// `otool -L` prints the file name on the first line, then one indented line
/// per load command; the reference is the first token.
fn parse_dependencies(lines: &[String], config: &PlatformConfig) -> Vec<String> {
    lines
        .iter()
        .skip(1)
        .filter_map(|line| line.trim().split_whitespace().next())
        .filter(|dep| config.lib_extensions.iter().any(|ext| dep.ends_with(ext)))
        .map(std::string::ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &[&str]) -> Vec<String> {
        text.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_parse_install_name() {
        let output = lines(&["/tmp/libfoo.dylib:", "@rpath/libfoo.dylib"]);
        assert_eq!(
            parse_install_name(&output),
            Some("@rpath/libfoo.dylib".to_string())
        );

        // No install name at all: otool prints only the file name.
        let output = lines(&["/tmp/libbare.dylib:"]);
        assert_eq!(parse_install_name(&output), None);
    }

    #[test]
    fn test_parse_rpaths() {
        let output = lines(&[
            "Load command 12",
            "          cmd LC_RPATH",
            "      cmdsize 32",
            "         path @loader_path (offset 12)",
            "Load command 13",
            "          cmd LC_RPATH",
            "      cmdsize 40",
            "         path @loader_path/../../ (offset 12)",
        ]);
        assert_eq!(
            parse_rpaths(&output).unwrap(),
            vec!["@loader_path", "@loader_path/../../"]
        );
    }

    #[test]
    fn test_parse_rpaths_truncated_output() {
        let output = lines(&["          cmd LC_RPATH", "      cmdsize 32"]);
        assert!(parse_rpaths(&output).is_err());
    }

    #[test]
    fn test_parse_dependencies() {
        let config = PlatformConfig::darwin();
        let output = lines(&[
            "/tmp/libfoo.dylib:",
            "\t@rpath/libfoo.dylib (compatibility version 1.0.0, current version 1.0.0)",
            "\t/usr/lib/libz.1.dylib (compatibility version 1.0.0, current version 1.2.11)",
            "\t/usr/lib/libSystem.B.dylib (compatibility version 1.0.0, current version 1281.0.0)",
        ]);
        assert_eq!(
            parse_dependencies(&output, &config),
            vec![
                "@rpath/libfoo.dylib",
                "/usr/lib/libz.1.dylib",
                "/usr/lib/libSystem.B.dylib"
            ]
        );
    }
}
