// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Renders the current memory-accounting snapshot as JSON or Graphviz DOT.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use soul_mem::MemoryRegistry;
use soul_mem::profiler::MemoryVisualizer;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    /// JSON document: `{ totalBytes, allocationCount, tags: [..] }`
    Json,
    /// Graphviz digraph with one `total` node and one leaf per tag
    Dot,
}

#[derive(Debug, Parser)]
#[command(about = "Visualize the current memory-accounting snapshot")]
struct Args {
    /// Output format.
    #[arg(long, value_enum, default_value = "json")]
    format: Format,

    /// Write to this file instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let stats = MemoryRegistry::current().snapshot();

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("unable to open output file: {}", path.display()))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(io::stdout().lock()),
    };

    match args.format {
        Format::Json => MemoryVisualizer::write_json(&stats, &mut out),
        Format::Dot => MemoryVisualizer::write_graphviz(&stats, &mut out),
    }
    .context("memory visualization failed")?;
    out.flush().context("flushing output failed")?;

    Ok(())
}
