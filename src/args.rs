// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vendor_relink")]
#[command(version)]
#[command(
    about = "Fixes linkage metadata of bundled shared libraries so the bundle stays relocatable"
)]
pub(crate) struct Args {
    /// Path to a vendor archive (eg vendor-Linux.tar.gz), or to a directory
    /// holding the uncompressed contents of a vendor archive.
    pub input: PathBuf,

    /// Where to write the fixed archive. A directory gets the canonical
    /// archive name appended. If not supplied, the bundle is fixed in a
    /// scratch directory but nothing is written (dry-run mode).
    pub output: Option<PathBuf>,

    #[arg(
        long,
        long_help = "Path to a text file of additional allowed system dependencies.\n\
                Each line contains an exact dependency name.\n\
                Empty lines and lines starting with # are ignored."
    )]
    pub allow_list: Option<PathBuf>,

    /// Print per-problem JSON detail while checking.
    #[arg(long)]
    pub verbose: bool,
}
