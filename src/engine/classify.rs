// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Classifies one declared dependency reference into an actionable category
//! and, when resolvable, its concrete on-disk target.

use path_clean::PathClean;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{AllowList, PlatformConfig};
use crate::engine::inventory::LibraryRecord;
use crate::engine::names;

/// Symlink chains longer than this are treated as unresolvable.
const MAX_SYMLINK_DEPTH: u8 = 32;

/// The resolved category of one raw dependency string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// On the system allow-list; expected to exist on the target system.
    AllowedSystem,
    /// Matches a system path prefix but is not allow-listed. Never
    /// auto-fixed; extending the allow-list is a human decision.
    UnexpectedSystem,
    /// Resolvable to a concrete library file on disk.
    VendorFound(PathBuf),
    /// No candidate found on any search path.
    VendorNotFound,
}

/// Everything `classify` needs to know about the declaring library and its
/// surroundings.
pub struct ClassifyContext<'a> {
    pub config: &'a PlatformConfig,
    pub allow: &'a AllowList,
    /// Root of the extracted bundle contents.
    pub contents_root: &'a Path,
    /// Absolute path of the environment library directory.
    pub env_lib_dir: &'a Path,
    /// The library declaring the dependency.
    pub lib: &'a LibraryRecord,
}

impl ClassifyContext<'_> {
    /// The ordered search locations for this library's dependencies: the
    /// environment library directory, the library's own directory, then its
    /// embedded search-path entries. Loader-relative entries are resolved
    /// against the library's eventual directory and mapped back into the
    /// contents tree; relative entries without a loader marker depend on the
    /// process working directory and are skipped.
    #[must_use]
    pub fn search_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.env_lib_dir.to_path_buf()];
        if let Some(parent) = self.lib.path.parent() {
            dirs.push(parent.to_path_buf());
        }
        let eventual_dir = self
            .lib
            .eventual_path
            .parent()
            .unwrap_or_else(|| Path::new(""));
        for entry in &self.lib.search_paths {
            if let Some(rest) = strip_loader_marker(entry, self.config) {
                let within_bundle = eventual_dir.join(rest.trim_start_matches('/')).clean();
                dirs.push(self.contents_root.join(within_bundle));
            } else if Path::new(entry).is_absolute() {
                dirs.push(PathBuf::from(entry).clean());
            }
        }
        dirs
    }
}

fn strip_loader_marker<'a>(entry: &'a str, config: &PlatformConfig) -> Option<&'a str> {
    for marker in config.loader_marker_aliases {
        if let Some(rest) = entry.strip_prefix(marker) {
            if rest.is_empty() || rest.starts_with('/') {
                return Some(rest);
            }
        }
    }
    None
}

/// Classify one raw dependency string. Ordered rules, first match wins:
/// allow-list, system path prefix, existing absolute path, then the bounded
/// name-variant search over the context's search locations.
#[must_use]
pub fn classify(dep: &str, ctx: &ClassifyContext<'_>) -> Classification {
    if ctx.allow.contains(dep) {
        return Classification::AllowedSystem;
    }

    if ctx
        .config
        .system_prefixes
        .iter()
        .any(|prefix| dep.starts_with(prefix))
    {
        return Classification::UnexpectedSystem;
    }

    let dep_path = Path::new(dep);
    if dep_path.is_absolute() {
        if let Ok(real) = dep_path.canonicalize() {
            if real.is_file() {
                return Classification::VendorFound(real);
            }
        }
    }

    let base_name = dep_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if base_name.is_empty() {
        return Classification::VendorNotFound;
    }

    let search_dirs = ctx.search_dirs();
    for variant in names::name_variants(&base_name, ctx.config) {
        // Exact spelling first.
        for dir in &search_dirs {
            if let Some(found) = resolve_in_dir(dir, &variant, MAX_SYMLINK_DEPTH) {
                if found != ctx.lib.path {
                    return Classification::VendorFound(found);
                }
            }
        }

        // Version suffixes are a common source of exact-name mismatch; accept
        // any file sharing the stripped base plus a numeric version suffix.
        let parts = names::decompose(&variant, ctx.config);
        if parts.ext.is_empty() {
            continue;
        }
        for dir in &search_dirs {
            let found = resolve_in_dir(dir, &parts.stripped(), MAX_SYMLINK_DEPTH)
                .or_else(|| resolve_family_in_dir(dir, &parts, ctx.config, &ctx.lib.path));
            if let Some(found) = found {
                if found != ctx.lib.path {
                    return Classification::VendorFound(found);
                }
            }
        }
    }

    Classification::VendorNotFound
}

/// Resolve `name` inside `dir`, following symlink chains by the target's
/// file name within the same directory, the way a flat library directory is
/// laid out.
fn resolve_in_dir(dir: &Path, name: &str, depth: u8) -> Option<PathBuf> {
    let file_name = Path::new(name).file_name()?;
    let candidate = dir.join(file_name);
    let metadata = fs::symlink_metadata(&candidate).ok()?;
    if metadata.file_type().is_symlink() {
        if depth == 0 {
            return None;
        }
        let target = fs::read_link(&candidate).ok()?;
        let target_name = target.file_name()?.to_string_lossy().to_string();
        return resolve_in_dir(dir, &target_name, depth - 1);
    }
    metadata.is_file().then(|| candidate.clean())
}

/// First directory entry, in lexicographic order, that shares the stem and
/// extension of `parts` and resolves to a regular file.
fn resolve_family_in_dir(
    dir: &Path,
    parts: &names::NameParts,
    config: &PlatformConfig,
    exclude: &Path,
) -> Option<PathBuf> {
    let mut entries: Vec<String> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect();
    entries.sort();
    entries
        .iter()
        .filter(|candidate| names::decompose(candidate, config).same_family(parts))
        .find_map(|candidate| {
            resolve_in_dir(dir, candidate, MAX_SYMLINK_DEPTH).filter(|found| found != exclude)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn record(path: PathBuf, eventual: &str) -> LibraryRecord {
        LibraryRecord {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            path,
            eventual_path: PathBuf::from(eventual),
            self_identifier: None,
            search_paths: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    struct Fixture {
        _scratch: TempDir,
        contents_root: PathBuf,
        env_lib: PathBuf,
        config: PlatformConfig,
        allow: AllowList,
    }

    impl Fixture {
        fn new() -> Self {
            let scratch = TempDir::new().unwrap();
            let contents_root = scratch.path().join("vendor-Linux.tar.gz-contents");
            let env_lib = contents_root.join("env/lib");
            fs::create_dir_all(&env_lib).unwrap();
            let config = PlatformConfig::linux();
            let allow = AllowList::new(&config);
            Self {
                _scratch: scratch,
                contents_root,
                env_lib,
                config,
                allow,
            }
        }

        fn ctx<'a>(&'a self, lib: &'a LibraryRecord) -> ClassifyContext<'a> {
            ClassifyContext {
                config: &self.config,
                allow: &self.allow,
                contents_root: &self.contents_root,
                env_lib_dir: &self.env_lib,
                lib,
            }
        }

        fn add_lib(&self, relative: &str) -> PathBuf {
            let path = self.contents_root.join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, b"stub").unwrap();
            path
        }
    }

    #[test]
    fn test_allow_listed_dependency() {
        let fixture = Fixture::new();
        let lib = record(fixture.add_lib("env/lib/liba.so"), "env/lib/liba.so");
        assert_eq!(
            classify("libssl.so.10", &fixture.ctx(&lib)),
            Classification::AllowedSystem
        );
    }

    #[test]
    fn test_unexpected_system_dependency() {
        let scratch = TempDir::new().unwrap();
        let contents_root = scratch.path().join("vendor-Darwin.tar.gz-contents");
        let env_lib = contents_root.join("env/lib");
        fs::create_dir_all(&env_lib).unwrap();
        let config = PlatformConfig::darwin();
        let allow = AllowList::new(&config);
        let lib_path = env_lib.join("liba.dylib");
        fs::write(&lib_path, b"stub").unwrap();
        let lib = record(lib_path, "env/lib/liba.dylib");
        let ctx = ClassifyContext {
            config: &config,
            allow: &allow,
            contents_root: &contents_root,
            env_lib_dir: &env_lib,
            lib: &lib,
        };
        assert_eq!(
            classify("/usr/lib/libodd.3.dylib", &ctx),
            Classification::UnexpectedSystem
        );
        // Allow-listed entries win over the prefix check.
        assert_eq!(
            classify("/usr/lib/libz.1.dylib", &ctx),
            Classification::AllowedSystem
        );
    }

    #[test]
    fn test_exact_match_in_env_lib() {
        let fixture = Fixture::new();
        let target = fixture.add_lib("env/lib/libdep.so");
        let lib = record(fixture.add_lib("env/lib/liba.so"), "env/lib/liba.so");
        assert_eq!(
            classify("libdep.so", &fixture.ctx(&lib)),
            Classification::VendorFound(target)
        );
    }

    #[test]
    fn test_match_in_own_directory() {
        let fixture = Fixture::new();
        let target = fixture.add_lib("env/plugins/libnear.so");
        let lib = record(
            fixture.add_lib("env/plugins/liba.so"),
            "env/plugins/liba.so",
        );
        assert_eq!(
            classify("libnear.so", &fixture.ctx(&lib)),
            Classification::VendorFound(target)
        );
    }

    #[test]
    fn test_absolute_existing_path() {
        let fixture = Fixture::new();
        let outside = TempDir::new().unwrap();
        let target = outside.path().join("libout.so");
        fs::write(&target, b"stub").unwrap();
        let lib = record(fixture.add_lib("env/lib/liba.so"), "env/lib/liba.so");
        let classification = classify(&target.to_string_lossy(), &fixture.ctx(&lib));
        match classification {
            Classification::VendorFound(found) => {
                assert_eq!(found.file_name().unwrap(), "libout.so");
            }
            other => panic!("Expected VendorFound, got {other:?}"),
        }
    }

    #[test]
    fn test_debug_variant_match() {
        let fixture = Fixture::new();
        let target = fixture.add_lib("env/lib/libfood.so");
        let lib = record(fixture.add_lib("env/lib/liba.so"), "env/lib/liba.so");
        assert_eq!(
            classify("libfoo.so", &fixture.ctx(&lib)),
            Classification::VendorFound(target)
        );
    }

    #[test]
    fn test_version_suffix_stripped_match() {
        let fixture = Fixture::new();
        let target = fixture.add_lib("env/lib/libfoo.so");
        let lib = record(fixture.add_lib("env/lib/liba.so"), "env/lib/liba.so");
        assert_eq!(
            classify("libfoo.so.3", &fixture.ctx(&lib)),
            Classification::VendorFound(target)
        );
    }

    #[test]
    fn test_version_family_match() {
        let fixture = Fixture::new();
        let target = fixture.add_lib("env/lib/libbar.so.2.4");
        let lib = record(fixture.add_lib("env/lib/liba.so"), "env/lib/liba.so");
        assert_eq!(
            classify("libbar.so.2", &fixture.ctx(&lib)),
            Classification::VendorFound(target)
        );
    }

    #[test]
    fn test_symlink_followed_to_real_target() {
        let fixture = Fixture::new();
        let target = fixture.add_lib("env/lib/libreal.so.1.0");
        std::os::unix::fs::symlink(
            "libreal.so.1.0",
            fixture.env_lib.join("libreal.so"),
        )
        .unwrap();
        let lib = record(fixture.add_lib("env/lib/liba.so"), "env/lib/liba.so");
        assert_eq!(
            classify("libreal.so", &fixture.ctx(&lib)),
            Classification::VendorFound(target)
        );
    }

    #[test]
    fn test_not_found() {
        let fixture = Fixture::new();
        let lib = record(fixture.add_lib("env/lib/liba.so"), "env/lib/liba.so");
        assert_eq!(
            classify("libghost.so", &fixture.ctx(&lib)),
            Classification::VendorNotFound
        );
    }

    #[test]
    fn test_library_never_resolves_to_itself() {
        let fixture = Fixture::new();
        let lib = record(fixture.add_lib("env/lib/libself.so"), "env/lib/libself.so");
        assert_eq!(
            classify("libself.so", &fixture.ctx(&lib)),
            Classification::VendorNotFound
        );
    }

    #[test]
    fn test_loader_relative_search_path_entry() {
        let fixture = Fixture::new();
        let target = fixture.add_lib("env/lib/extras/libdeep.so");
        let mut lib = record(fixture.add_lib("env/bin/liba.so"), "env/bin/liba.so");
        lib.search_paths = vec!["$ORIGIN/../lib/extras".to_string()];
        assert_eq!(
            classify("libdeep.so", &fixture.ctx(&lib)),
            Classification::VendorFound(target)
        );
    }

    #[test]
    fn test_relative_search_path_without_marker_is_skipped() {
        let fixture = Fixture::new();
        fixture.add_lib("env/lib/extras/libdeep.so");
        let mut lib = record(fixture.add_lib("env/bin/liba.so"), "env/bin/liba.so");
        lib.search_paths = vec!["../lib/extras".to_string()];
        assert_eq!(
            classify("libdeep.so", &fixture.ctx(&lib)),
            Classification::VendorNotFound
        );
    }
}
