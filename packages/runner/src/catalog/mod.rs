// packages/runner/src/catalog/mod.rs
//! Experiment catalog
//!
//! The catalog is written once by the setup phase and read by index. It is a
//! sequence of six-line blocks:
//!
//! ```text
//! #1#
//! <generator command>
//! <controller command>
//! <stack> <dest mode> <update rate> <packet len> <zipf> <ports> <trial>
//! <experiment name>
//! <log directory>
//! ```
//!
//! Sequence numbers are contiguous starting at 1.

pub mod descriptor;

pub use descriptor::{DestMode, ExperimentDescriptor, Parameters, StackKind};

use crate::utils::errors::{Result, RunnerError};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const BLOCK_LINES: usize = 6;

/// Lines following the `#N#` marker, in order
const BLOCK_FIELDS: [&str; BLOCK_LINES - 1] = [
    "generator command",
    "controller command",
    "parameters",
    "experiment name",
    "log directory",
];

/// Parsed experiment catalog
#[derive(Debug, Clone)]
pub struct Catalog {
    path: PathBuf,
    entries: Vec<ExperimentDescriptor>,
}

impl Catalog {
    /// Load and validate the catalog at `path`
    pub async fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .map_err(|e| RunnerError::io(path, e))?;
        let entries = parse(&text, &path.display().to_string())?;
        debug!("Loaded {} catalog entries from {:?}", entries.len(), path);
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Descriptor with sequence number `seq` (1-based)
    pub fn entry(&self, seq: u64) -> Result<&ExperimentDescriptor> {
        seq.checked_sub(1)
            .and_then(|i| self.entries.get(i as usize))
            .ok_or_else(|| {
                RunnerError::parse(
                    self.path.display().to_string(),
                    format!("no entry #{} (catalog has {})", seq, self.entries.len()),
                )
            })
    }
}

/// Parse catalog text. Blank lines between blocks are ignored; inside a
/// block every line must be present.
pub fn parse(text: &str, source_name: &str) -> Result<Vec<ExperimentDescriptor>> {
    let mut lines = text.lines().map(str::trim);
    let mut entries = Vec::new();

    while let Some(marker) = lines.find(|l| !l.is_empty()) {
        let expected = entries.len() as u64 + 1;
        let seq = parse_marker(marker).ok_or_else(|| {
            RunnerError::parse(source_name, format!("bad block marker '{}'", marker))
        })?;
        if seq != expected {
            return Err(RunnerError::parse(
                source_name,
                format!("expected block #{}#, found #{}#", expected, seq),
            ));
        }

        let mut block = [""; BLOCK_LINES - 1];
        for (slot, what) in block.iter_mut().zip(BLOCK_FIELDS) {
            *slot = match lines.next() {
                Some(line) if !line.is_empty() => line,
                Some(_) => {
                    return Err(RunnerError::parse(
                        source_name,
                        format!("block #{}#: empty {} line", seq, what),
                    ))
                }
                None => {
                    return Err(RunnerError::parse(
                        source_name,
                        format!("block #{}#: missing {} line", seq, what),
                    ))
                }
            };
        }

        let params = Parameters::parse_line(block[2])
            .map_err(|reason| RunnerError::parse(source_name, format!("block #{}#: {}", seq, reason)))?;

        entries.push(ExperimentDescriptor {
            seq,
            generator_cmd: block[0].to_string(),
            controller_cmd: block[1].to_string(),
            params,
            name: block[3].to_string(),
            log_dir: PathBuf::from(block[4]),
        });
    }

    Ok(entries)
}

/// Render descriptors back into catalog text
pub fn format(entries: &[ExperimentDescriptor]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&format!("#{}#\n", entry.seq));
        out.push_str(&entry.generator_cmd);
        out.push('\n');
        out.push_str(&entry.controller_cmd);
        out.push('\n');
        out.push_str(&entry.params.to_line());
        out.push('\n');
        out.push_str(&entry.name);
        out.push('\n');
        out.push_str(&entry.log_dir.display().to_string());
        out.push('\n');
    }
    out
}

fn parse_marker(line: &str) -> Option<u64> {
    line.trim()
        .strip_prefix('#')?
        .strip_suffix('#')?
        .parse()
        .ok()
}
