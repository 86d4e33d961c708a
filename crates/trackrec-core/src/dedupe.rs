use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Append-only set of external URLs that were durably captured.  One URL per
/// line; stored in the output directory so it travels with the recordings.
///
/// The in-memory set is authoritative for the process lifetime: a failed
/// append is logged and swallowed, accepting that a crash before the next
/// successful write could let a duplicate slip through on restart.
pub struct DedupeIndex {
    path: PathBuf,
    seen: HashSet<String>,
}

/// Index filename inside the output directory.
pub const INDEX_FILE_NAME: &str = ".trackrec_index";

impl DedupeIndex {
    /// Load persisted URLs.  A missing backing file is an empty index, not
    /// an error.
    pub fn load(output_dir: &Path) -> Self {
        let path = output_dir.join(INDEX_FILE_NAME);
        let mut seen = HashSet::new();
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                for line in content.lines() {
                    let url = line.trim();
                    if !url.is_empty() {
                        seen.insert(url.to_string());
                    }
                }
                debug!("Dedupe index loaded: {} URLs from {:?}", seen.len(), path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No dedupe index at {:?}, starting empty", path);
            }
            Err(e) => {
                warn!("Could not read dedupe index {:?}: {}", path, e);
            }
        }
        Self { path, seen }
    }

    pub fn contains(&self, url: &str) -> bool {
        self.seen.contains(url)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Mark a URL as durably captured.  Only call this for recordings that
    /// passed the minimum-duration policy.
    pub fn record(&mut self, url: &str) {
        if url.is_empty() {
            return;
        }
        if !self.seen.insert(url.to_string()) {
            return;
        }
        if let Err(e) = self.append_line(url) {
            warn!("Could not write dedupe index {:?}: {}", self.path, e);
        }
    }

    fn append_line(&self, url: &str) -> std::io::Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", url)
    }
}
