use std::path::{Path, PathBuf};

use tracing::warn;

/// What the recorder is doing right now, or what it last did.  Rendered as
/// `KEY=value` lines for external tooling (SSH-friendly); last write wins.
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderStatus {
    Idle,
    Recording {
        artist: String,
        title: String,
        file: PathBuf,
        started_at: i64,
        track_url: String,
    },
    Skipped {
        artist: String,
        title: String,
        track_url: String,
    },
    Finished {
        kept: bool,
        duration_secs: f64,
        file: PathBuf,
        track_url: String,
    },
}

impl RecorderStatus {
    fn render(&self) -> String {
        let mut out = String::new();
        let mut push = |k: &str, v: &str| {
            out.push_str(k);
            out.push('=');
            out.push_str(v);
            out.push('\n');
        };
        match self {
            RecorderStatus::Idle => push("STATE", "idle"),
            RecorderStatus::Recording {
                artist,
                title,
                file,
                started_at,
                track_url,
            } => {
                push("STATE", "recording");
                push("ARTIST", artist);
                push("TITLE", title);
                push("FILE", &file.display().to_string());
                push("STARTED_AT", &started_at.to_string());
                push("TRACK_URL", track_url);
            }
            RecorderStatus::Skipped {
                artist,
                title,
                track_url,
            } => {
                push("STATE", "skipped");
                push("ARTIST", artist);
                push("TITLE", title);
                push("TRACK_URL", track_url);
            }
            RecorderStatus::Finished {
                kept,
                duration_secs,
                file,
                track_url,
            } => {
                push("STATE", "idle");
                push("LAST_RESULT", if *kept { "KEEP" } else { "DROP" });
                push("LAST_DURATION", &format!("{:.1}", duration_secs));
                push("LAST_FILE", &file.display().to_string());
                push("LAST_TRACK_URL", track_url);
            }
        }
        out
    }
}

/// Writes the recorder's status to a well-known side-channel file.  Purely
/// observational: failures are logged and ignored, this path must never
/// block or fail recording.
pub struct StatusPublisher {
    path: PathBuf,
}

impl StatusPublisher {
    pub fn new(path: PathBuf) -> Self {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("Could not create status dir {:?}: {}", parent, e);
            }
        }
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the status file with the given record.
    pub fn publish(&self, status: &RecorderStatus) {
        if let Err(e) = std::fs::write(&self.path, status.render()) {
            warn!("Could not write status file {:?}: {}", self.path, e);
        }
    }
}
