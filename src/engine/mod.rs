// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! The convergence engine: four ordered check-then-fix passes over the
//! library inventory, followed by one strict re-verification.

pub mod classify;
pub mod inventory;
pub(crate) mod names;
pub mod search_paths;

pub use classify::{classify, Classification, ClassifyContext};
pub use inventory::{Inventory, InventoryError, LibraryRecord};
pub use search_paths::canonical_search_paths;

use comfy_table::{Cell, Table};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::backend::{BackendError, MetadataBackend};
use crate::config::{AllowList, PlatformConfig, ENV_LIB_DIR};

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while running the fix passes.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(
        "Found {unexpected} unexpected system dependencies and {missing} vendor dependencies \
         with no candidate on any search path"
    )]
    UnsatisfiedDependencies { unexpected: usize, missing: usize },
    #[error("Pass {pass} still found {problems} problems after the fix cycle; engine defect")]
    Unconverged { pass: &'static str, problems: usize },
    #[error(transparent)]
    Inventory(#[from] InventoryError),
    #[error("Backend error for {path:?}")]
    Backend {
        path: PathBuf,
        #[source]
        source: BackendError,
    },
    #[error("Failed to copy {from:?} to {to:?}")]
    CopyFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to rename {from:?} to {to:?}")]
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Whether a pass applied any correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixStatus {
    Unmodified,
    Modified,
}

impl std::ops::BitOrAssign for FixStatus {
    fn bitor_assign(&mut self, rhs: Self) {
        if rhs == FixStatus::Modified {
            *self = FixStatus::Modified;
        }
    }
}

/// Fix applies corrections; Strict treats any remaining problem as fatal.
#[derive(Debug, Clone, Copy)]
enum Mode {
    Fix,
    Strict,
}

#[derive(Serialize)]
struct DependencyRewrite {
    from: String,
    to: String,
}

#[derive(Serialize)]
struct LinkageProblem {
    library: String,
    rewrites: Vec<DependencyRewrite>,
    #[serde(skip)]
    path: PathBuf,
}

#[derive(Serialize)]
struct NameProblem {
    library: String,
    self_identifier: String,
    proposed_name: String,
    #[serde(skip)]
    path: PathBuf,
    #[serde(skip)]
    file_name: String,
}

#[derive(Serialize)]
struct SearchPathProblem {
    library: String,
    eventual_path: String,
    actual: Vec<String>,
    proposed: Vec<String>,
    #[serde(skip)]
    path: PathBuf,
}

/// Runs the ordered fix passes over one bundle and enforces the single-pass
/// convergence invariant.
pub struct Engine<'a> {
    scratch_root: &'a Path,
    contents_root: &'a Path,
    config: &'a PlatformConfig,
    allow: &'a AllowList,
    backend: &'a dyn MetadataBackend,
    verbose: bool,
}

impl<'a> Engine<'a> {
    #[must_use]
    pub fn new(
        scratch_root: &'a Path,
        contents_root: &'a Path,
        config: &'a PlatformConfig,
        allow: &'a AllowList,
        backend: &'a dyn MetadataBackend,
        verbose: bool,
    ) -> Self {
        Self {
            scratch_root,
            contents_root,
            config,
            allow,
            backend,
            verbose,
        }
    }

    /// Run all four passes in fix mode and, if anything was corrected,
    /// re-run them in strict mode. A problem surviving the fix cycle is an
    /// engine defect, reported fatally; the engine never attempts a second
    /// fix cycle.
    ///
    /// # Errors
    /// Returns an error on any fatal classification problem, on a backend or
    /// file-system failure, or when the strict re-check finds a remaining
    /// problem.
    pub fn run(&self) -> EngineResult<FixStatus> {
        let mut status = FixStatus::Unmodified;
        status |= self.resolve_unsatisfied(Mode::Fix)?;
        status |= self.rewrite_linkage(Mode::Fix)?;
        status |= self.normalize_names(Mode::Fix)?;
        status |= self.normalize_search_paths(Mode::Fix)?;

        if status == FixStatus::Modified {
            eprintln!("Finished fixing; checking that everything converged ...");
            self.resolve_unsatisfied(Mode::Strict)?;
            self.rewrite_linkage(Mode::Strict)?;
            self.normalize_names(Mode::Strict)?;
            self.normalize_search_paths(Mode::Strict)?;
        } else {
            eprintln!("Nothing to change.");
        }
        Ok(status)
    }

    /// Fresh inventory snapshot; every pass starts from current on-disk
    /// state, never from what a previous pass cached.
    fn scan(&self) -> EngineResult<Inventory> {
        Ok(Inventory::scan(self.scratch_root, self.config, self.backend)?)
    }

    fn env_lib_dir(&self) -> PathBuf {
        self.contents_root.join(ENV_LIB_DIR)
    }

    fn classify_ctx<'b>(
        &'b self,
        lib: &'b LibraryRecord,
        env_lib_dir: &'b Path,
    ) -> ClassifyContext<'b> {
        ClassifyContext {
            config: self.config,
            allow: self.allow,
            contents_root: self.contents_root,
            env_lib_dir,
            lib,
        }
    }

    fn display_path(&self, path: &Path) -> String {
        path.strip_prefix(self.scratch_root)
            .unwrap_or(path)
            .display()
            .to_string()
    }

    /// Classify every dependency of every library. Unexpected system
    /// dependencies and unresolvable vendor dependencies are collected
    /// across the whole inventory, reported together, and are fatal. Vendor
    /// dependencies satisfied by a library outside the inventory are copied
    /// into the environment library directory, and the copy is classified
    /// in turn.
    fn resolve_unsatisfied(&self, mode: Mode) -> EngineResult<FixStatus> {
        let inventory = self.scan()?;
        let env_lib_dir = self.env_lib_dir();

        let mut queue: Vec<LibraryRecord> = inventory.libraries().cloned().collect();
        let mut known_paths: HashSet<PathBuf> = HashSet::new();
        for lib in &queue {
            known_paths.insert(lib.path.clone());
            if let Ok(real) = lib.path.canonicalize() {
                known_paths.insert(real);
            }
        }

        let mut satisfied = BTreeSet::new();
        let mut unexpected = BTreeSet::new();
        let mut missing = BTreeSet::new();
        let mut imported: Vec<PathBuf> = Vec::new();

        let mut index = 0;
        while index < queue.len() {
            let lib = queue[index].clone();
            index += 1;
            let ctx = self.classify_ctx(&lib, &env_lib_dir);
            for dep in &lib.dependencies {
                if lib.self_identifier.as_deref() == Some(dep.as_str()) {
                    continue;
                }
                match classify(dep, &ctx) {
                    Classification::AllowedSystem => {
                        satisfied.insert(dep.clone());
                    }
                    Classification::UnexpectedSystem => {
                        unexpected.insert(dep.clone());
                    }
                    Classification::VendorNotFound => {
                        missing.insert(dep.clone());
                    }
                    Classification::VendorFound(target) => {
                        satisfied.insert(dep.clone());
                        let real = target.canonicalize().unwrap_or_else(|_| target.clone());
                        if known_paths.contains(&target) || known_paths.contains(&real) {
                            continue;
                        }
                        known_paths.insert(target.clone());
                        known_paths.insert(real);
                        // Classify the stray library's own dependencies too,
                        // so one pass reaches the whole closure.
                        queue.push(inventory::read_record(
                            &target,
                            self.scratch_root,
                            self.backend,
                        )?);
                        imported.push(target);
                    }
                }
            }
        }

        if !unexpected.is_empty() || !missing.is_empty() {
            eprintln!(
                "Checking dependencies: found {} that cannot be satisfied.",
                unexpected.len() + missing.len()
            );
            println!("{}", dependency_table(&satisfied, &unexpected, &missing));
            return Err(EngineError::UnsatisfiedDependencies {
                unexpected: unexpected.len(),
                missing: missing.len(),
            });
        }

        if imported.is_empty() {
            eprintln!(
                "Checking dependencies: all vendor dependencies are satisfied inside the bundle."
            );
            return Ok(FixStatus::Unmodified);
        }

        let detail: Vec<String> = imported.iter().map(|p| self.display_path(p)).collect();
        self.flag_problems(
            "resolve-unsatisfied",
            format!(
                "Checking dependencies: found {} satisfied by a library outside the bundle.",
                imported.len()
            ),
            &detail,
            mode,
        )?;

        for source in &imported {
            let Some(name) = source.file_name() else {
                continue;
            };
            let dest = env_lib_dir.join(name);
            if !dest.exists() {
                fs::copy(source, &dest).map_err(|e| EngineError::CopyFailed {
                    from: source.clone(),
                    to: dest.clone(),
                    source: e,
                })?;
            }
        }
        Ok(FixStatus::Modified)
    }

    /// Rewrite every resolvable vendor dependency to the canonical
    /// reference form: the platform reference prefix plus the target's bare
    /// file name.
    fn rewrite_linkage(&self, mode: Mode) -> EngineResult<FixStatus> {
        let inventory = self.scan()?;
        let env_lib_dir = self.env_lib_dir();

        let mut problems = Vec::new();
        for lib in inventory.libraries() {
            let ctx = self.classify_ctx(lib, &env_lib_dir);
            let mut rewrites = Vec::new();
            for dep in &lib.dependencies {
                if lib.self_identifier.as_deref() == Some(dep.as_str()) {
                    continue;
                }
                let Classification::VendorFound(target) = classify(dep, &ctx) else {
                    continue;
                };
                let Some(name) = target.file_name() else {
                    continue;
                };
                let canonical =
                    format!("{}{}", self.config.reference_prefix, name.to_string_lossy());
                if *dep != canonical {
                    rewrites.push(DependencyRewrite {
                        from: dep.clone(),
                        to: canonical,
                    });
                }
            }
            if !rewrites.is_empty() {
                problems.push(LinkageProblem {
                    library: self.display_path(&lib.path),
                    rewrites,
                    path: lib.path.clone(),
                });
            }
        }

        if problems.is_empty() {
            eprintln!("Checking linkage: all vendor dependencies are referenced canonically.");
            return Ok(FixStatus::Unmodified);
        }

        self.flag_problems(
            "rewrite-linkage",
            format!(
                "Checking linkage: found {} libraries with non-canonical references.",
                problems.len()
            ),
            &problems,
            mode,
        )?;

        for problem in &problems {
            for rewrite in &problem.rewrites {
                self.backend
                    .rewrite_dependency(&problem.path, &rewrite.from, &rewrite.to)
                    .map_err(|e| backend_err(&problem.path, e))?;
            }
        }
        Ok(FixStatus::Modified)
    }

    /// Make every library's self-identifier its own bare file name. A bare
    /// identifier wins over the current file name: the file is renamed to
    /// it, and every dependent reference follows in the same pass.
    fn normalize_names(&self, mode: Mode) -> EngineResult<FixStatus> {
        let inventory = self.scan()?;

        let mut problems = Vec::new();
        for lib in inventory.libraries() {
            let Some(identifier) = lib.self_identifier.as_deref() else {
                continue;
            };
            if identifier == lib.file_name {
                continue;
            }
            let proposed = if names::is_bare_library_name(identifier, self.config) {
                identifier.to_string()
            } else {
                lib.file_name.clone()
            };
            problems.push(NameProblem {
                library: self.display_path(&lib.path),
                self_identifier: identifier.to_string(),
                proposed_name: proposed,
                path: lib.path.clone(),
                file_name: lib.file_name.clone(),
            });
        }

        if problems.is_empty() {
            eprintln!("Checking names: every self-identifier matches its file name.");
            return Ok(FixStatus::Unmodified);
        }

        self.flag_problems(
            "normalize-names",
            format!(
                "Checking names: found {} libraries with mismatched identifiers.",
                problems.len()
            ),
            &problems,
            mode,
        )?;

        let mut renamed: HashMap<PathBuf, PathBuf> = HashMap::new();
        for problem in &problems {
            let mut path = problem.path.clone();
            let mut final_name = problem.file_name.clone();
            if problem.proposed_name != problem.file_name {
                let dest = path
                    .parent()
                    .unwrap_or_else(|| Path::new(""))
                    .join(&problem.proposed_name);
                // A taken name stays as it is; the identifier is corrected below.
                if !dest.exists() {
                    fs::rename(&path, &dest).map_err(|e| EngineError::RenameFailed {
                        from: path.clone(),
                        to: dest.clone(),
                        source: e,
                    })?;
                    self.repoint_dependents(
                        &inventory,
                        &renamed,
                        &problem.path,
                        &problem.file_name,
                        &problem.proposed_name,
                    )?;
                    renamed.insert(path.clone(), dest.clone());
                    path = dest;
                    final_name = problem.proposed_name.clone();
                }
            }
            self.backend
                .set_self_identifier(&path, &final_name)
                .map_err(|e| backend_err(&path, e))?;
        }
        Ok(FixStatus::Modified)
    }

    /// A rename changes how dependents must reference the file; rewriting
    /// them here keeps the single fix cycle convergent.
    fn repoint_dependents(
        &self,
        inventory: &Inventory,
        renamed: &HashMap<PathBuf, PathBuf>,
        renamed_lib: &Path,
        old_name: &str,
        new_name: &str,
    ) -> EngineResult<()> {
        let canonical = format!("{}{}", self.config.reference_prefix, new_name);
        for other in inventory.libraries() {
            if other.path == renamed_lib {
                continue;
            }
            let current = renamed
                .get(&other.path)
                .cloned()
                .unwrap_or_else(|| other.path.clone());
            for dep in &other.dependencies {
                if *dep == canonical {
                    continue;
                }
                let dep_name = Path::new(dep).file_name().map(|n| n.to_string_lossy());
                if dep_name.as_deref() == Some(old_name) {
                    self.backend
                        .rewrite_dependency(&current, dep, &canonical)
                        .map_err(|e| backend_err(&current, e))?;
                }
            }
        }
        Ok(())
    }

    /// Replace every search-path list that differs, as an unordered set,
    /// from the canonical set computed from the eventual install path.
    fn normalize_search_paths(&self, mode: Mode) -> EngineResult<FixStatus> {
        let inventory = self.scan()?;

        let mut problems = Vec::new();
        for lib in inventory.libraries() {
            let proposed = canonical_search_paths(&lib.eventual_path, self.config);
            let actual_set: HashSet<&str> = lib.search_paths.iter().map(String::as_str).collect();
            let proposed_set: HashSet<&str> = proposed.iter().map(String::as_str).collect();
            if actual_set != proposed_set {
                problems.push(SearchPathProblem {
                    library: self.display_path(&lib.path),
                    eventual_path: lib.eventual_path.display().to_string(),
                    actual: lib.search_paths.clone(),
                    proposed,
                    path: lib.path.clone(),
                });
            }
        }

        if problems.is_empty() {
            eprintln!("Checking search paths: every library has the canonical set.");
            return Ok(FixStatus::Unmodified);
        }

        self.flag_problems(
            "normalize-search-paths",
            format!(
                "Checking search paths: found {} libraries with a non-canonical set.",
                problems.len()
            ),
            &problems,
            mode,
        )?;

        for problem in &problems {
            self.backend
                .set_search_paths(&problem.path, &problem.proposed)
                .map_err(|e| backend_err(&problem.path, e))?;
        }
        Ok(FixStatus::Modified)
    }

    /// Report a pass's problem set. In strict mode the problems are fatal:
    /// they survived the one fix cycle the design allows.
    fn flag_problems<T: Serialize>(
        &self,
        pass: &'static str,
        summary: String,
        problems: &[T],
        mode: Mode,
    ) -> EngineResult<()> {
        eprintln!("{summary}");
        if self.verbose || matches!(mode, Mode::Strict) {
            if let Ok(detail) = serde_json::to_string_pretty(problems) {
                eprintln!("{detail}");
            }
        }
        match mode {
            Mode::Fix => Ok(()),
            Mode::Strict => Err(EngineError::Unconverged {
                pass,
                problems: problems.len(),
            }),
        }
    }
}

fn backend_err(path: &Path, source: BackendError) -> EngineError {
    EngineError::Backend {
        path: path.to_path_buf(),
        source,
    }
}

/// Table of every classified dependency, so a human can extend the
/// allow-list or supply the missing file without re-running.
fn dependency_table(
    satisfied: &BTreeSet<String>,
    unexpected: &BTreeSet<String>,
    missing: &BTreeSet<String>,
) -> Table {
    let mut rows: BTreeMap<&str, &str> = BTreeMap::new();
    for dep in satisfied {
        rows.insert(dep.as_str(), "satisfied");
    }
    for dep in unexpected {
        rows.insert(dep.as_str(), "unexpected system dependency");
    }
    for dep in missing {
        rows.insert(dep.as_str(), "not found");
    }

    let mut table = Table::new();
    table
        .load_preset(comfy_table::presets::UTF8_FULL_CONDENSED)
        .apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS)
        .set_content_arrangement(comfy_table::ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Dependency").add_attribute(comfy_table::Attribute::Bold),
            Cell::new("Status").add_attribute(comfy_table::Attribute::Bold),
        ]);
    for (dep, status) in rows {
        table.add_row(vec![Cell::new(dep), Cell::new(status)]);
    }
    table
}
