// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Renderers for [`MemoryStatistics`] snapshots plus small measuring
//! helpers, shared by the `memory-visualizer` tool.

use crate::registry::MemoryRegistry;
use crate::stats::MemoryStatistics;
use std::io::{self, Write};

/// Renders memory statistics as JSON or a Graphviz digraph.
pub struct MemoryVisualizer;

impl MemoryVisualizer {
    /// Writes `{ "totalBytes", "allocationCount", "tags": [..] }`.
    ///
    /// # Errors
    ///
    /// Forwards write failures from `out`.
    pub fn write_json(stats: &MemoryStatistics, out: &mut impl Write) -> io::Result<()> {
        serde_json::to_writer_pretty(&mut *out, stats).map_err(io::Error::from)?;
        writeln!(out)
    }

    /// Writes a DOT digraph with one `total` node and one leaf per tag.
    ///
    /// # Errors
    ///
    /// Forwards write failures from `out`.
    pub fn write_graphviz(stats: &MemoryStatistics, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "digraph MemoryTags {{")?;
        writeln!(out, "  graph [rankdir=LR];")?;
        writeln!(out, "  node [shape=box];")?;
        writeln!(
            out,
            "  total [shape=oval,label=\"Total\\nbytes: {}\\nallocations: {}\"];",
            stats.total_bytes, stats.allocation_count
        )?;

        for (index, tag_stats) in stats.tags.iter().enumerate() {
            write!(
                out,
                "  tag{index} [label=\"hash: {}\\nbytes: {}\\nallocations: {}",
                tag_stats.tag.hash_value(),
                tag_stats.bytes,
                tag_stats.allocations
            )?;
            if let Some(label) = tag_stats.tag.label() {
                write!(out, "\\nlabel: {}", escape_label(label))?;
            }
            writeln!(out, "\"];")?;
            writeln!(out, "  total -> tag{index};")?;
        }

        writeln!(out, "}}")
    }
}

/// Recorded size of a tracked pointer, per the registry's current
/// accountant. 0 when the pointer is unknown.
#[must_use]
pub fn measure_raw(ptr: usize) -> usize {
    MemoryRegistry::current().allocation_size(ptr)
}

fn escape_label(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' | '"' => {
                escaped.push('\\');
                escaped.push(ch);
            }
            '\n' | '\r' => escaped.push_str("\\n"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
