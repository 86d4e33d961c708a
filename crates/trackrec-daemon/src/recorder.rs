//! The recording state machine.  Consumes playback-status and
//! metadata-change notifications and turns them into capture starts,
//! finalizations, dedupe lookups, and status publishes.
//!
//! All mutable state lives here and is touched from a single consumer task;
//! the notification pump only feeds the channel.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use trackrec_core::dedupe::DedupeIndex;
use trackrec_core::metadata::{PlaybackStatus, TrackMetadata};
use trackrec_core::status::{RecorderStatus, StatusPublisher};

use crate::capture::{CaptureBackend, RecordingContext};

/// One notification from the player.  Either half may be present alone, or
/// both when the bus coalesces a status and metadata change into a single
/// PropertiesChanged signal.  Status is applied before metadata.
#[derive(Debug, Clone, Default)]
pub struct PlayerEvent {
    pub status: Option<PlaybackStatus>,
    pub metadata: Option<TrackMetadata>,
}

/// On-demand reads from the player, used for priming and for fetching
/// metadata when a Playing edge arrives before any metadata notification.
#[async_trait]
pub trait PlayerProbe: Send {
    async fn playback_status(&self) -> Result<PlaybackStatus>;
    async fn metadata(&self) -> Result<TrackMetadata>;
}

pub struct RecorderCore<C, P> {
    capture: C,
    probe: P,
    index: DedupeIndex,
    publisher: StatusPublisher,
    dedupe: bool,

    status: PlaybackStatus,
    pending: TrackMetadata,
    current: Option<RecordingContext>,
    /// Track id of the last started or skipped track.  A skip advances it
    /// too, so the same unchanged track is not retried on metadata churn.
    last_track_id: Option<String>,
}

impl<C: CaptureBackend, P: PlayerProbe> RecorderCore<C, P> {
    pub fn new(
        capture: C,
        probe: P,
        index: DedupeIndex,
        publisher: StatusPublisher,
        dedupe: bool,
    ) -> Self {
        publisher.publish(&RecorderStatus::Idle);
        Self {
            capture,
            probe,
            index,
            publisher,
            dedupe,
            status: PlaybackStatus::Unknown,
            pending: TrackMetadata::default(),
            current: None,
            last_track_id: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.current.is_some()
    }

    /// Fetch current status and metadata once at startup, so a mid-track
    /// launch still captures the remainder.
    pub async fn prime(&mut self) {
        match self.probe.playback_status().await {
            Ok(status) => self.status = status,
            Err(e) => warn!("Could not read playback status: {}", e),
        }
        match self.probe.metadata().await {
            Ok(md) => self.pending = md,
            Err(e) => warn!("Could not read metadata: {}", e),
        }
        if self.status == PlaybackStatus::Playing {
            self.ensure_started().await;
        }
    }

    pub async fn handle(&mut self, event: PlayerEvent) {
        if let Some(status) = event.status {
            self.status = status;
            match status {
                PlaybackStatus::Playing => self.ensure_started().await,
                // Unknown finalizes too: Playing is a prerequisite for an
                // active recording.
                PlaybackStatus::Paused
                | PlaybackStatus::Stopped
                | PlaybackStatus::Unknown => self.finalize().await,
            }
        }

        if let Some(md) = event.metadata {
            self.on_metadata(md).await;
        }
    }

    /// Finalize any active recording before exit.
    pub async fn shutdown(&mut self) {
        self.finalize().await;
    }

    async fn on_metadata(&mut self, md: TrackMetadata) {
        self.pending = md.clone();

        if self.status != PlaybackStatus::Playing {
            return;
        }

        match &self.current {
            None => {
                // A previously skipped track stays suppressed until the id
                // changes.
                if !md.track_id.is_empty()
                    && self.last_track_id.as_deref() == Some(md.track_id.as_str())
                {
                    return;
                }
                self.ensure_started().await;
            }
            Some(ctx) => {
                if !md.track_id.is_empty() && md.track_id != ctx.track_id {
                    // Track advanced: most players signal the next track via
                    // a metadata event, not a stop/play pair.
                    self.finalize().await;
                    self.try_start(md).await;
                } else {
                    debug!("Metadata churn on current track, ignoring");
                }
            }
        }
    }

    async fn ensure_started(&mut self) {
        if self.status != PlaybackStatus::Playing || self.current.is_some() {
            return;
        }

        if !self.pending.has_title() {
            match self.probe.metadata().await {
                Ok(md) => self.pending = md,
                Err(e) => {
                    warn!("Could not fetch metadata: {}", e);
                    return;
                }
            }
        }
        if !self.pending.has_title() {
            debug!("No title yet, not starting");
            return;
        }

        let md = self.pending.clone();
        self.try_start(md).await;
    }

    async fn try_start(&mut self, md: TrackMetadata) {
        if self.dedupe && !md.external_url.is_empty() && self.index.contains(&md.external_url) {
            info!("SKIP duplicate (URL already kept): {}", md.display_name());
            self.publisher.publish(&RecorderStatus::Skipped {
                artist: md.artist.clone(),
                title: md.title.clone(),
                track_url: md.external_url.clone(),
            });
            self.last_track_id = Some(md.track_id);
            return;
        }

        match self.capture.start(&md).await {
            Ok(ctx) => {
                self.publisher.publish(&RecorderStatus::Recording {
                    artist: md.artist.clone(),
                    title: md.title.clone(),
                    file: ctx.output_path.clone(),
                    started_at: ctx.started_unix,
                    track_url: ctx.external_url.clone(),
                });
                self.last_track_id = Some(md.track_id);
                self.current = Some(ctx);
            }
            Err(e) => warn!("Could not start capture for {}: {}", md.display_name(), e),
        }
    }

    async fn finalize(&mut self) {
        let Some(ctx) = self.current.take() else {
            return;
        };

        let outcome = self.capture.stop(&ctx).await;

        // A dropped file never enters the index: an entry means "durably
        // captured", not "attempted".
        if outcome.kept && self.dedupe {
            self.index.record(&ctx.external_url);
        }

        self.publisher.publish(&RecorderStatus::Finished {
            kept: outcome.kept,
            duration_secs: outcome.duration_secs,
            file: ctx.output_path,
            track_url: ctx.external_url,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::StopOutcome;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;
    use trackrec_core::dedupe::INDEX_FILE_NAME;

    #[derive(Default)]
    struct CaptureLog {
        started: Vec<TrackMetadata>,
        stops: usize,
        recording: bool,
    }

    struct FakeCapture {
        log: Arc<Mutex<CaptureLog>>,
        outcome: Arc<Mutex<StopOutcome>>,
    }

    #[async_trait]
    impl CaptureBackend for FakeCapture {
        async fn start(&mut self, md: &TrackMetadata) -> Result<RecordingContext> {
            let mut log = self.log.lock().expect("capture log");
            log.started.push(md.clone());
            log.recording = true;
            Ok(RecordingContext {
                output_path: PathBuf::from(format!("/fake/{}.flac", md.title)),
                started_at: Instant::now(),
                started_unix: 0,
                track_id: md.track_id.clone(),
                external_url: md.external_url.clone(),
            })
        }

        async fn stop(&mut self, _ctx: &RecordingContext) -> StopOutcome {
            let mut log = self.log.lock().expect("capture log");
            log.stops += 1;
            log.recording = false;
            *self.outcome.lock().expect("outcome")
        }

        fn is_recording(&self) -> bool {
            self.log.lock().expect("capture log").recording
        }
    }

    struct FakeProbe {
        status: PlaybackStatus,
        metadata: TrackMetadata,
        fetches: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl PlayerProbe for FakeProbe {
        async fn playback_status(&self) -> Result<PlaybackStatus> {
            Ok(self.status)
        }

        async fn metadata(&self) -> Result<TrackMetadata> {
            *self.fetches.lock().expect("fetch count") += 1;
            Ok(self.metadata.clone())
        }
    }

    struct Harness {
        core: RecorderCore<FakeCapture, FakeProbe>,
        log: Arc<Mutex<CaptureLog>>,
        outcome: Arc<Mutex<StopOutcome>>,
        fetches: Arc<Mutex<usize>>,
        dir: tempfile::TempDir,
    }

    impl Harness {
        fn new(dedupe: bool) -> Self {
            Self::with_probe(dedupe, PlaybackStatus::Unknown, TrackMetadata::default())
        }

        fn with_probe(dedupe: bool, status: PlaybackStatus, metadata: TrackMetadata) -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let log = Arc::new(Mutex::new(CaptureLog::default()));
            let outcome = Arc::new(Mutex::new(StopOutcome {
                kept: true,
                duration_secs: 180.0,
            }));
            let fetches = Arc::new(Mutex::new(0));

            let capture = FakeCapture {
                log: log.clone(),
                outcome: outcome.clone(),
            };
            let probe = FakeProbe {
                status,
                metadata,
                fetches: fetches.clone(),
            };
            let index = DedupeIndex::load(dir.path());
            let publisher = StatusPublisher::new(dir.path().join("recorder.status"));

            let core = RecorderCore::new(capture, probe, index, publisher, dedupe);
            Self {
                core,
                log,
                outcome,
                fetches,
                dir,
            }
        }

        fn seed_index(dir: &tempfile::TempDir, urls: &[&str]) {
            let lines: String = urls.iter().map(|u| format!("{}\n", u)).collect();
            std::fs::write(dir.path().join(INDEX_FILE_NAME), lines).expect("seed index");
        }

        fn started(&self) -> Vec<TrackMetadata> {
            self.log.lock().expect("capture log").started.clone()
        }

        fn stops(&self) -> usize {
            self.log.lock().expect("capture log").stops
        }

        fn capture_recording(&self) -> bool {
            self.log.lock().expect("capture log").recording
        }

        fn index_file(&self) -> String {
            std::fs::read_to_string(self.dir.path().join(INDEX_FILE_NAME)).unwrap_or_default()
        }

        fn status_file(&self) -> String {
            std::fs::read_to_string(self.dir.path().join("recorder.status")).unwrap_or_default()
        }

        fn clear_status_file(&self) {
            std::fs::write(self.dir.path().join("recorder.status"), "").expect("clear status");
        }
    }

    fn md(id: &str, title: &str, url: &str) -> TrackMetadata {
        TrackMetadata {
            track_id: id.to_string(),
            artist: "Artist".to_string(),
            title: title.to_string(),
            album: "Album".to_string(),
            external_url: url.to_string(),
            track_number: Some(1),
            disc_number: None,
        }
    }

    fn status_event(status: PlaybackStatus) -> PlayerEvent {
        PlayerEvent {
            status: Some(status),
            metadata: None,
        }
    }

    fn metadata_event(md: TrackMetadata) -> PlayerEvent {
        PlayerEvent {
            status: None,
            metadata: Some(md),
        }
    }

    #[tokio::test]
    async fn context_exists_iff_capture_is_recording() {
        let mut h = Harness::new(false);

        let events = vec![
            metadata_event(md("/t/1", "One", "u1")),
            status_event(PlaybackStatus::Playing),
            metadata_event(md("/t/2", "Two", "u2")),
            status_event(PlaybackStatus::Paused),
            status_event(PlaybackStatus::Stopped),
            status_event(PlaybackStatus::Playing),
        ];
        for event in events {
            h.core.handle(event).await;
            assert_eq!(h.core.is_recording(), h.capture_recording());
        }
    }

    #[tokio::test]
    async fn empty_title_never_spawns() {
        let mut h = Harness::new(false);

        h.core
            .handle(metadata_event(md("/t/1", "", "u1")))
            .await;
        h.core.handle(status_event(PlaybackStatus::Playing)).await;

        assert!(h.started().is_empty());
        assert!(!h.core.is_recording());
        // The probe was consulted for fresher metadata, which had no title
        // either.
        assert!(*h.fetches.lock().expect("fetch count") > 0);
    }

    #[tokio::test]
    async fn metadata_while_stopped_is_cached_then_used_on_play() {
        let mut h = Harness::new(false);

        h.core.handle(status_event(PlaybackStatus::Stopped)).await;
        h.core
            .handle(metadata_event(md("/t/1", "One", "u1")))
            .await;
        assert!(h.started().is_empty());

        h.core.handle(status_event(PlaybackStatus::Playing)).await;
        assert_eq!(h.started().len(), 1);
        assert_eq!(h.started()[0].title, "One");
        // Pending metadata had a title, no fresh fetch needed.
        assert_eq!(*h.fetches.lock().expect("fetch count"), 0);
    }

    #[tokio::test]
    async fn coalesced_status_and_metadata_starts_once() {
        let mut h = Harness::new(false);

        h.core
            .handle(PlayerEvent {
                status: Some(PlaybackStatus::Playing),
                metadata: Some(md("/t/1", "One", "u1")),
            })
            .await;

        // The Playing half has no usable metadata yet (fresh fetch returns
        // no title); the metadata half then starts the capture.
        assert_eq!(h.started().len(), 1);
        assert!(h.core.is_recording());
    }

    #[tokio::test]
    async fn kept_recording_lands_in_index() {
        let mut h = Harness::new(true);

        h.core
            .handle(metadata_event(md("/t/1", "One", "u1")))
            .await;
        h.core.handle(status_event(PlaybackStatus::Playing)).await;
        h.core.handle(status_event(PlaybackStatus::Paused)).await;

        assert_eq!(h.stops(), 1);
        assert_eq!(h.index_file(), "u1\n");
        assert!(h.status_file().contains("LAST_RESULT=KEEP"));
    }

    #[tokio::test]
    async fn dropped_recording_is_not_indexed() {
        let mut h = Harness::new(true);
        *h.outcome.lock().expect("outcome") = StopOutcome {
            kept: false,
            duration_secs: 3.0,
        };

        h.core
            .handle(metadata_event(md("/t/1", "One", "u1")))
            .await;
        h.core.handle(status_event(PlaybackStatus::Playing)).await;
        h.core.handle(status_event(PlaybackStatus::Stopped)).await;

        assert_eq!(h.index_file(), "");
        assert!(h.status_file().contains("LAST_RESULT=DROP"));
    }

    #[tokio::test]
    async fn duplicate_url_is_skipped_without_touching_index() {
        let mut h = Harness::new(true);
        Harness::seed_index(&h.dir, &["u1"]);
        h.core.index = DedupeIndex::load(h.dir.path());

        h.core
            .handle(metadata_event(md("/t/1", "One", "u1")))
            .await;
        h.core.handle(status_event(PlaybackStatus::Playing)).await;

        assert!(h.started().is_empty());
        assert!(!h.core.is_recording());
        assert!(h.status_file().contains("STATE=skipped"));
        assert_eq!(h.index_file(), "u1\n");
    }

    #[tokio::test]
    async fn skip_is_suppressed_until_track_id_changes() {
        let mut h = Harness::new(true);
        Harness::seed_index(&h.dir, &["u1"]);
        h.core.index = DedupeIndex::load(h.dir.path());

        h.core
            .handle(metadata_event(md("/t/1", "One", "u1")))
            .await;
        h.core.handle(status_event(PlaybackStatus::Playing)).await;
        assert!(h.status_file().contains("STATE=skipped"));

        // Same id again: no re-attempt, no publish.
        h.clear_status_file();
        h.core
            .handle(metadata_event(md("/t/1", "One", "u1")))
            .await;
        assert_eq!(h.status_file(), "");
        assert!(h.started().is_empty());

        // A different track starts normally.
        h.core
            .handle(metadata_event(md("/t/2", "Two", "u2")))
            .await;
        assert_eq!(h.started().len(), 1);
        assert_eq!(h.started()[0].title, "Two");
    }

    #[tokio::test]
    async fn double_finalize_is_idempotent() {
        let mut h = Harness::new(true);

        h.core
            .handle(metadata_event(md("/t/1", "One", "u1")))
            .await;
        h.core.handle(status_event(PlaybackStatus::Playing)).await;
        h.core.handle(status_event(PlaybackStatus::Paused)).await;
        h.core.handle(status_event(PlaybackStatus::Stopped)).await;

        assert_eq!(h.stops(), 1);
        assert_eq!(h.index_file(), "u1\n");
    }

    #[tokio::test]
    async fn track_advance_finalizes_then_restarts() {
        let mut h = Harness::new(true);

        h.core
            .handle(metadata_event(md("/t/1", "One", "u1")))
            .await;
        h.core.handle(status_event(PlaybackStatus::Playing)).await;
        assert!(h.core.is_recording());

        h.core
            .handle(metadata_event(md("/t/2", "Two", "u2")))
            .await;

        assert_eq!(h.stops(), 1);
        let started = h.started();
        assert_eq!(started.len(), 2);
        assert_eq!(started[1].title, "Two");
        assert!(h.core.is_recording());
        assert_eq!(h.index_file(), "u1\n");
        assert!(h.status_file().contains("STATE=recording"));
    }

    #[tokio::test]
    async fn metadata_churn_on_same_track_is_ignored() {
        let mut h = Harness::new(false);

        h.core
            .handle(metadata_event(md("/t/1", "One", "u1")))
            .await;
        h.core.handle(status_event(PlaybackStatus::Playing)).await;

        h.core
            .handle(metadata_event(md("/t/1", "One", "u1")))
            .await;
        // Absent track id is treated as churn too.
        h.core.handle(metadata_event(md("", "One", "u1"))).await;

        assert_eq!(h.started().len(), 1);
        assert_eq!(h.stops(), 0);
    }

    #[tokio::test]
    async fn unknown_status_finalizes_active_recording() {
        let mut h = Harness::new(false);

        h.core
            .handle(metadata_event(md("/t/1", "One", "u1")))
            .await;
        h.core.handle(status_event(PlaybackStatus::Playing)).await;
        h.core.handle(status_event(PlaybackStatus::Unknown)).await;

        assert_eq!(h.stops(), 1);
        assert!(!h.core.is_recording());
    }

    #[tokio::test]
    async fn prime_starts_mid_track() {
        let mut h = Harness::with_probe(
            false,
            PlaybackStatus::Playing,
            md("/t/1", "One", "u1"),
        );

        h.core.prime().await;

        assert_eq!(h.started().len(), 1);
        assert!(h.core.is_recording());
    }

    #[tokio::test]
    async fn prime_does_not_start_when_paused() {
        let mut h = Harness::with_probe(
            false,
            PlaybackStatus::Paused,
            md("/t/1", "One", "u1"),
        );

        h.core.prime().await;

        assert!(h.started().is_empty());
    }

    #[tokio::test]
    async fn shutdown_finalizes_and_flushes_index() {
        let mut h = Harness::new(true);

        h.core
            .handle(metadata_event(md("/t/1", "One", "u1")))
            .await;
        h.core.handle(status_event(PlaybackStatus::Playing)).await;

        h.core.shutdown().await;

        assert_eq!(h.stops(), 1);
        assert!(!h.core.is_recording());
        assert_eq!(h.index_file(), "u1\n");

        // Second shutdown is a no-op.
        h.core.shutdown().await;
        assert_eq!(h.stops(), 1);
    }
}
