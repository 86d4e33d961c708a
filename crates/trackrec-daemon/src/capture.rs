//! ffmpeg capture supervision: at most one child process at a time,
//! graceful-then-forced termination, minimum-duration policy.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use trackrec_core::config::CaptureConfig;
use trackrec_core::metadata::{sanitize, TrackMetadata};
use trackrec_core::platform;

/// How long the child gets to exit after SIGINT before it is killed.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// The single active recording.  Exists iff a child encoding process is
/// supervised; owned by the state machine, not the supervisor.
#[derive(Debug)]
pub struct RecordingContext {
    pub output_path: PathBuf,
    /// Monotonic spawn time, used for the duration policy.
    pub started_at: Instant,
    /// Wall-clock spawn time for the status side-channel.
    pub started_unix: i64,
    pub track_id: String,
    pub external_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopOutcome {
    pub kept: bool,
    pub duration_secs: f64,
}

/// Seam between the state machine and the encoding process, so tests can
/// substitute a fake launcher.
#[async_trait]
pub trait CaptureBackend: Send {
    /// Spawn a capture for the given track.  Returns immediately; the child
    /// runs asynchronously.
    async fn start(&mut self, md: &TrackMetadata) -> Result<RecordingContext>;

    /// Terminate the child (if any) and evaluate the minimum-duration
    /// policy for the given context.
    async fn stop(&mut self, ctx: &RecordingContext) -> StopOutcome;

    fn is_recording(&self) -> bool;
}

pub struct FfmpegCapture {
    ffmpeg_bin: PathBuf,
    output_dir: PathBuf,
    source: String,
    compression_level: u8,
    min_duration: Duration,
    child: Option<Child>,
}

impl FfmpegCapture {
    pub fn new(cfg: &CaptureConfig, output_dir: PathBuf) -> Result<Self> {
        let ffmpeg_bin = platform::find_ffmpeg_binary()
            .ok_or_else(|| anyhow::anyhow!("ffmpeg binary not found"))?;
        Ok(Self {
            ffmpeg_bin,
            output_dir,
            source: cfg.source.clone(),
            compression_level: cfg.compression_level.min(8),
            min_duration: Duration::from_secs(cfg.min_seconds),
            child: None,
        })
    }
}

#[async_trait]
impl CaptureBackend for FfmpegCapture {
    async fn start(&mut self, md: &TrackMetadata) -> Result<RecordingContext> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("creating output dir {:?}", self.output_dir))?;

        let output_path = unique_path(&self.output_dir, &md.display_name());

        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-f")
            .arg("pulse")
            .arg("-i")
            .arg(&self.source)
            .arg("-acodec")
            .arg("flac")
            .arg("-compression_level")
            .arg(self.compression_level.to_string());
        for (key, value) in tag_pairs(md) {
            cmd.arg("-metadata").arg(format!("{}={}", key, value));
        }
        cmd.arg(&output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let child = cmd.spawn().context("Failed to spawn ffmpeg")?;

        info!("REC -> {}", output_path.display());
        self.child = Some(child);

        Ok(RecordingContext {
            output_path,
            started_at: Instant::now(),
            started_unix: chrono::Utc::now().timestamp(),
            track_id: md.track_id.clone(),
            external_url: md.external_url.clone(),
        })
    }

    async fn stop(&mut self, ctx: &RecordingContext) -> StopOutcome {
        if let Some(mut child) = self.child.take() {
            terminate(&mut child).await;
        }
        evaluate_policy(ctx, self.min_duration)
    }

    fn is_recording(&self) -> bool {
        self.child.is_some()
    }
}

/// SIGINT lets ffmpeg flush and finalize the FLAC stream; escalate to kill
/// after the bounded grace period so the child is never left running.
async fn terminate(child: &mut Child) {
    let Some(pid) = child.id() else {
        // Already exited; reap it.
        let _ = child.wait().await;
        return;
    };

    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
    if rc != 0 {
        warn!(
            "Could not signal ffmpeg (pid {}): {}",
            pid,
            std::io::Error::last_os_error()
        );
    }

    match tokio::time::timeout(STOP_GRACE, child.wait()).await {
        Ok(Ok(status)) => debug!("ffmpeg exited: {}", status),
        Ok(Err(e)) => warn!("Could not wait for ffmpeg: {}", e),
        Err(_) => {
            warn!("ffmpeg did not exit within {:?}, killing", STOP_GRACE);
            let _ = child.kill().await;
        }
    }
}

/// Keep or drop a finished capture.  Duration is measured spawn-to-stop on
/// the wall clock; encoder startup latency is counted in, a known
/// approximation.
fn evaluate_policy(ctx: &RecordingContext, min_duration: Duration) -> StopOutcome {
    let elapsed = ctx.started_at.elapsed();
    let duration_secs = elapsed.as_secs_f64();

    if elapsed < min_duration {
        match std::fs::remove_file(&ctx.output_path) {
            Ok(()) => info!("DROP ({:.1}s) -> {}", duration_secs, ctx.output_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {}", ctx.output_path.display(), e),
        }
        StopOutcome {
            kept: false,
            duration_secs,
        }
    } else {
        info!("KEEP ({:.1}s) -> {}", duration_secs, ctx.output_path.display());
        StopOutcome {
            kept: true,
            duration_secs,
        }
    }
}

/// Output path guaranteed unique within the directory: collisions get an
/// incrementing ` (n)` suffix, never overwriting an existing file.
fn unique_path(dir: &Path, base: &str) -> PathBuf {
    let base = sanitize(base);
    let path = dir.join(format!("{}.flac", base));
    if !path.exists() {
        return path;
    }
    let mut i = 2;
    loop {
        let candidate = dir.join(format!("{} ({}).flac", base, i));
        if !candidate.exists() {
            return candidate;
        }
        i += 1;
    }
}

/// Tag key/value pairs for the encoder; only non-empty fields are attached.
fn tag_pairs(md: &TrackMetadata) -> Vec<(&'static str, String)> {
    let mut tags = Vec::new();
    if !md.artist.is_empty() {
        tags.push(("ARTIST", md.artist.clone()));
    }
    if !md.title.is_empty() {
        tags.push(("TITLE", md.title.clone()));
    }
    if !md.album.is_empty() {
        tags.push(("ALBUM", md.album.clone()));
    }
    if !md.external_url.is_empty() {
        tags.push(("TRACK_URL", md.external_url.clone()));
    }
    if let Some(n) = md.track_number {
        tags.push(("TRACKNUMBER", n.to_string()));
    }
    if let Some(n) = md.disc_number {
        tags.push(("DISCNUMBER", n.to_string()));
    }
    tags
}
