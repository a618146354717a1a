// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.
mod args;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};

use args::Args;
use vendor_relink::{select_backend, AllowList, Bundle, Engine, FixStatus, PlatformConfig};

fn main() -> Result<()> {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(error) => {
            // All usage problems share one exit code with the fatal ones.
            let _ = error.print();
            std::process::exit(1);
        }
    };

    let config = PlatformConfig::host()
        .ok_or_else(|| anyhow!("Unsupported platform: {}", std::env::consts::OS))?;
    let allow = create_allow_list(&config, args.allow_list.as_deref())?;
    let backend = select_backend().context("Failed to select a metadata backend")?;

    let output = resolve_output_path(args.output, &config)?;
    if output.is_none() {
        eprintln!("(Running in dry-run mode since no OUTPUT_PATH was supplied.)");
    }

    let bundle = Bundle::open(&args.input, &config)
        .with_context(|| format!("Failed to unpack bundle: {}", args.input.display()))?;

    let engine = Engine::new(
        bundle.scratch_root(),
        bundle.contents_root(),
        &config,
        &allow,
        backend.as_ref(),
        args.verbose,
    );
    let status = engine.run()?;

    if let Some(output) = output {
        bundle
            .pack(&output)
            .with_context(|| format!("Failed to write fixed archive: {}", output.display()))?;
        eprintln!("Wrote fixed archive to {}", output.display());
    } else if status == FixStatus::Modified {
        eprintln!("Bundle was fixed, but nothing was written due to dry-run mode.");
        std::process::exit(1);
    }
    Ok(())
}

fn create_allow_list(config: &PlatformConfig, extra: Option<&Path>) -> Result<AllowList> {
    let mut allow = AllowList::new(config);
    if let Some(path) = extra {
        allow
            .extend_from_file(path)
            .with_context(|| "Failed to read additional allow-list")?;
    }
    Ok(allow)
}

/// Resolve where the fixed archive goes: a directory gets the canonical
/// archive name appended, an existing file is refused, `None` means dry run.
fn resolve_output_path(output: Option<PathBuf>, config: &PlatformConfig) -> Result<Option<PathBuf>> {
    let Some(mut output) = output else {
        return Ok(None);
    };
    if output.is_dir() {
        output = output.join(config.archive_name);
    }
    if output.exists() {
        bail!(
            "Cannot write vendor archive to {} - already exists",
            output.display()
        );
    }
    Ok(Some(output))
}
