//! Recording manager implementation
//!
//! Owns the set of active recordings and the files behind them. Live session
//! operations go through the active map; file operations work purely on the
//! recordings directory by filename.

use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::fs::OpenOptions;
use tokio::io::BufWriter;
use tokio::sync::{watch, RwLock};

use crate::error::{Error, Result};
use crate::relay::Subscription;

use super::config::RecordingConfig;
use super::session::{
    FileStats, RecordingOptions, RecordingSession, RecordingState, RecordingStatus,
    RecordingSummary, StopReason,
};
use super::writer::{run_writer, ActiveMap, ActiveRecording};

/// Manager for concurrent recordings
///
/// Cheap to clone; clones share the same active set.
#[derive(Clone)]
pub struct RecordingManager {
    active: Arc<RwLock<ActiveMap>>,
    /// Ids whose file is being created, not yet in `active`
    starting: Arc<Mutex<HashSet<String>>>,
    config: Arc<RecordingConfig>,
}

/// Claim on a recording id while its file is set up
struct Reservation {
    starting: Arc<Mutex<HashSet<String>>>,
    recording_id: String,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.starting.lock().remove(&self.recording_id);
    }
}

impl RecordingManager {
    pub fn new(config: RecordingConfig) -> Self {
        Self {
            active: Arc::new(RwLock::new(HashMap::new())),
            starting: Arc::new(Mutex::new(HashSet::new())),
            config: Arc::new(config),
        }
    }

    /// Get the recording configuration
    pub fn config(&self) -> &RecordingConfig {
        &self.config
    }

    /// Start recording `source` into the configured recordings directory
    ///
    /// Returns the filename of the new recording.
    pub async fn start(
        &self,
        recording_id: &str,
        source: Subscription,
        options: &RecordingOptions,
    ) -> Result<String> {
        let dir = self.config.recordings_dir.clone();
        self.start_in(recording_id, source, &dir, options).await
    }

    /// Start recording `source` into `destination_dir`
    ///
    /// Fails with [`Error::RecordingAlreadyActive`] if `recording_id` is
    /// active (the running recording is left untouched), and with
    /// [`Error::StorageUnavailable`] if the file cannot be created.
    pub async fn start_in(
        &self,
        recording_id: &str,
        source: Subscription,
        destination_dir: &Path,
        options: &RecordingOptions,
    ) -> Result<String> {
        let recording = self
            .launch(recording_id, source, destination_dir, options)
            .await?;
        Ok(recording.session.filename.clone())
    }

    /// Like [`start`](Self::start), returning a handle on the new recording
    ///
    /// The handle observes the recording even if it stops before the caller
    /// gets to look at it.
    pub async fn start_tracked(
        &self,
        recording_id: &str,
        source: Subscription,
        options: &RecordingOptions,
    ) -> Result<RecordingHandle> {
        let dir = self.config.recordings_dir.clone();
        let recording = self.launch(recording_id, source, &dir, options).await?;
        Ok(RecordingHandle { recording })
    }

    async fn launch(
        &self,
        recording_id: &str,
        source: Subscription,
        destination_dir: &Path,
        options: &RecordingOptions,
    ) -> Result<Arc<ActiveRecording>> {
        // Held until the recording is in the active map
        let _reservation = self.reserve(recording_id).await?;

        tokio::fs::create_dir_all(destination_dir)
            .await
            .map_err(|e| {
                Error::StorageUnavailable(format!("{}: {}", destination_dir.display(), e))
            })?;

        let started_at = Utc::now();
        let extension = source
            .info()
            .file_extension()
            .unwrap_or(self.config.default_extension.as_str());
        let filename = format!(
            "{}_{}.{}",
            sanitize(recording_id),
            started_at.timestamp_millis(),
            extension
        );
        let file_path = destination_dir.join(&filename);

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&file_path)
            .await
            .map_err(|e| Error::StorageUnavailable(format!("{}: {}", file_path.display(), e)))?;

        let recording = Arc::new(ActiveRecording::new(RecordingSession {
            recording_id: recording_id.to_string(),
            source_key: source.key().clone(),
            filename: filename.clone(),
            file_path,
            started_at,
            max_duration_seconds: options.max_duration_seconds,
            started: Instant::now(),
        }));

        tracing::info!(
            recording_id = recording_id,
            stream = %source.key(),
            filename = %filename,
            max_duration_secs = ?options.max_duration_seconds,
            "Recording started"
        );

        let writer = BufWriter::with_capacity(self.config.write_buffer_size, file);
        self.active
            .write()
            .await
            .insert(recording_id.to_string(), Arc::clone(&recording));

        tokio::spawn(run_writer(
            Arc::clone(&recording),
            source,
            writer,
            Arc::clone(&self.active),
        ));

        if let Some(max) = options.max_duration_seconds {
            recording.arm_timer(Duration::from_secs(max));
        }

        Ok(recording)
    }

    async fn reserve(&self, recording_id: &str) -> Result<Reservation> {
        if !self.starting.lock().insert(recording_id.to_string()) {
            return Err(Error::RecordingAlreadyActive(recording_id.to_string()));
        }
        let reservation = Reservation {
            starting: Arc::clone(&self.starting),
            recording_id: recording_id.to_string(),
        };

        if self.active.read().await.contains_key(recording_id) {
            return Err(Error::RecordingAlreadyActive(recording_id.to_string()));
        }
        Ok(reservation)
    }

    /// Stop a recording, flushing and closing its file
    ///
    /// Returns the final summary, or `None` for unknown or already stopped ids.
    pub async fn stop(&self, recording_id: &str) -> Option<RecordingSummary> {
        let recording = self.active.read().await.get(recording_id).cloned()?;

        recording.request_stop(StopReason::Requested);
        recording.finished().await
    }

    /// Stop every active recording
    pub async fn stop_all(&self) -> Vec<RecordingSummary> {
        let recordings: Vec<Arc<ActiveRecording>> =
            self.active.read().await.values().cloned().collect();

        for recording in &recordings {
            recording.request_stop(StopReason::Requested);
        }

        let mut summaries = Vec::with_capacity(recordings.len());
        for recording in recordings {
            if let Some(summary) = recording.finished().await {
                summaries.push(summary);
            }
        }
        summaries
    }

    /// Elapsed whole seconds of an active recording, 0 otherwise
    pub async fn duration(&self, recording_id: &str) -> u64 {
        self.active
            .read()
            .await
            .get(recording_id)
            .map(|r| r.session.elapsed_secs())
            .unwrap_or(0)
    }

    pub async fn is_active(&self, recording_id: &str) -> bool {
        self.active.read().await.contains_key(recording_id)
    }

    /// Snapshot of active recording ids, oldest first
    pub async fn list_active(&self) -> Vec<String> {
        self.snapshot()
            .await
            .into_iter()
            .map(|r| r.session.recording_id.clone())
            .collect()
    }

    /// Snapshot of active recordings with their durations
    pub async fn status(&self) -> Vec<RecordingStatus> {
        self.snapshot()
            .await
            .into_iter()
            .map(|r| RecordingStatus {
                recording_id: r.session.recording_id.clone(),
                duration: r.session.elapsed_secs(),
                is_active: true,
            })
            .collect()
    }

    /// Session description of an active recording
    pub async fn session(&self, recording_id: &str) -> Option<RecordingSession> {
        self.active
            .read()
            .await
            .get(recording_id)
            .map(|r| r.session.clone())
    }

    /// Bytes written so far by an active recording
    pub async fn bytes_written(&self, recording_id: &str) -> Option<u64> {
        self.active
            .read()
            .await
            .get(recording_id)
            .map(|r| r.bytes_written())
    }

    /// Watch the state of an active recording
    pub async fn watch(&self, recording_id: &str) -> Option<watch::Receiver<RecordingState>> {
        self.active
            .read()
            .await
            .get(recording_id)
            .map(|r| r.watch())
    }

    /// Handle on an active recording that stays valid after it stops
    pub async fn handle(&self, recording_id: &str) -> Option<RecordingHandle> {
        self.active
            .read()
            .await
            .get(recording_id)
            .cloned()
            .map(|recording| RecordingHandle { recording })
    }

    /// Read a recording file
    pub async fn read_file(&self, filename: &str) -> Result<Bytes> {
        let path = self.resolve(filename)?;
        tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| file_error(filename, e))
    }

    /// Open a recording file for streaming, with its current size
    pub async fn open_file(&self, filename: &str) -> Result<(tokio::fs::File, u64)> {
        let path = self.resolve(filename)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| file_error(filename, e))?;
        let meta = file.metadata().await.map_err(|e| file_error(filename, e))?;

        if !meta.is_file() {
            return Err(Error::FileNotFound(filename.to_string()));
        }
        Ok((file, meta.len()))
    }

    /// Delete a recording file
    ///
    /// Files still being written are refused with
    /// [`Error::RecordingInProgress`].
    pub async fn delete_file(&self, filename: &str) -> Result<()> {
        let path = self.resolve(filename)?;

        let in_progress = self
            .active
            .read()
            .await
            .values()
            .any(|r| r.session.file_path == path);
        if in_progress {
            return Err(Error::RecordingInProgress(filename.to_string()));
        }

        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| file_error(filename, e))?;

        tracing::info!(filename = filename, "Recording file deleted");
        Ok(())
    }

    /// Size and modification time of a recording file
    pub async fn file_stats(&self, filename: &str) -> Result<FileStats> {
        let path = self.resolve(filename)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| file_error(filename, e))?;

        if !meta.is_file() {
            return Err(Error::FileNotFound(filename.to_string()));
        }

        Ok(FileStats {
            filename: filename.to_string(),
            size: meta.len(),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    async fn snapshot(&self) -> Vec<Arc<ActiveRecording>> {
        let mut recordings: Vec<_> = self.active.read().await.values().cloned().collect();
        recordings.sort_by(|a, b| {
            a.session
                .started
                .cmp(&b.session.started)
                .then_with(|| a.session.recording_id.cmp(&b.session.recording_id))
        });
        recordings
    }

    /// Map a bare filename into the recordings directory
    fn resolve(&self, filename: &str) -> Result<PathBuf> {
        let mut components = Path::new(filename).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if !filename.starts_with('.') => {
                Ok(self.config.recordings_dir.join(name))
            }
            _ => Err(Error::InvalidFilename(filename.to_string())),
        }
    }
}

/// Observer of one recording, obtained from [`RecordingManager::handle`]
#[derive(Clone)]
pub struct RecordingHandle {
    recording: Arc<ActiveRecording>,
}

impl RecordingHandle {
    pub fn session(&self) -> &RecordingSession {
        &self.recording.session
    }

    /// Elapsed whole seconds, still counting until the writer finalizes
    pub fn elapsed_secs(&self) -> u64 {
        self.recording.session.elapsed_secs()
    }

    pub fn state(&self) -> RecordingState {
        let state = *self.recording.watch().borrow();
        state
    }

    /// Wait for the recording to stop and return its summary
    ///
    /// Cancel safe; resolves immediately once the recording has stopped.
    pub async fn finished(&self) -> Option<RecordingSummary> {
        self.recording.finished().await
    }
}

fn file_error(filename: &str, e: std::io::Error) -> Error {
    if e.kind() == ErrorKind::NotFound {
        Error::FileNotFound(filename.to_string())
    } else {
        Error::Io(e)
    }
}

/// Replace anything but alphanumerics, `_` and `-` for use in a filename
fn sanitize(id: &str) -> String {
    let safe: String = id
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if safe.is_empty() {
        "recording".to_string()
    } else {
        safe
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::relay::upstream::mock::MockUpstream;
    use crate::relay::{RelayConfig, RelayManager, SessionKey};

    struct Fixture {
        relay: RelayManager,
        recordings: RecordingManager,
        upstream: Arc<MockUpstream>,
        dir: TempDir,
    }

    fn fixture(upstream: MockUpstream) -> Fixture {
        let dir = TempDir::new().unwrap();
        let upstream = Arc::new(upstream);
        Fixture {
            relay: RelayManager::with_upstream(RelayConfig::default(), upstream.clone()),
            recordings: RecordingManager::new(RecordingConfig::with_dir(dir.path())),
            upstream,
            dir,
        }
    }

    async fn attach(f: &Fixture, id: &str, url: &str) -> Subscription {
        f.relay.attach(&SessionKey::recording(id), url).await.unwrap()
    }

    #[tokio::test]
    async fn test_file_is_verbatim_copy() {
        let upstream = MockUpstream::new();
        let feed = upstream.channel("http://s1");
        let f = fixture(upstream);

        let source = attach(&f, "r1", "http://s1").await;
        let filename = f
            .recordings
            .start("r1", source, &RecordingOptions::default())
            .await
            .unwrap();
        assert!(filename.starts_with("r1_"));
        assert!(filename.ends_with(".mp3"));

        let mut expected = Vec::new();
        for i in 0..200u32 {
            let chunk: Vec<u8> = (0..37).map(|j| ((i * 37 + j) % 251) as u8).collect();
            expected.extend_from_slice(&chunk);
            feed.send(Bytes::from(chunk)).unwrap();
        }

        // Wait until the writer has consumed everything
        while f.recordings.bytes_written("r1").await != Some(expected.len() as u64) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let summary = f.recordings.stop("r1").await.unwrap();
        assert_eq!(summary.reason, StopReason::Requested);
        assert_eq!(summary.bytes_written, expected.len() as u64);

        let written = f.recordings.read_file(&filename).await.unwrap();
        assert_eq!(written.as_ref(), expected.as_slice());
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let f = fixture(
            MockUpstream::new()
                .endless("http://s1", &[])
                .endless("http://s2", &[]),
        );

        let first = attach(&f, "r1", "http://s1").await;
        let filename = f
            .recordings
            .start("r1", first, &RecordingOptions::default())
            .await
            .unwrap();

        let second = f
            .relay
            .attach(&SessionKey::new("other"), "http://s2")
            .await
            .unwrap();
        let result = f
            .recordings
            .start("r1", second, &RecordingOptions::default())
            .await;

        assert!(matches!(result, Err(Error::RecordingAlreadyActive(id)) if id == "r1"));
        assert!(f.recordings.is_active("r1").await);
        assert_eq!(
            f.recordings.session("r1").await.unwrap().filename,
            filename
        );
    }

    #[tokio::test]
    async fn test_concurrent_starts_claim_id_once() {
        let f = fixture(
            MockUpstream::new()
                .endless("http://s1", &[])
                .endless("http://s2", &[]),
        );
        let first = attach(&f, "r1", "http://s1").await;
        let second = f
            .relay
            .attach(&SessionKey::new("other"), "http://s2")
            .await
            .unwrap();

        let options = RecordingOptions::default();
        let (a, b) = tokio::join!(
            f.recordings.start("r1", first, &options),
            f.recordings.start("r1", second, &options),
        );

        let (won, lost) = match (a, b) {
            (Ok(filename), Err(e)) | (Err(e), Ok(filename)) => (filename, e),
            other => panic!("expected exactly one winner: {other:?}"),
        };
        assert!(matches!(lost, Error::RecordingAlreadyActive(id) if id == "r1"));
        assert_eq!(f.recordings.session("r1").await.unwrap().filename, won);

        let files = std::fs::read_dir(f.dir.path()).unwrap().count();
        assert_eq!(files, 1);
    }

    #[tokio::test]
    async fn test_id_reusable_after_stop() {
        let f = fixture(MockUpstream::new().endless("http://s1", &[]));

        let source = attach(&f, "r1", "http://s1").await;
        assert_ok!(f.recordings.start("r1", source, &RecordingOptions::default()).await);
        assert!(f.recordings.stop("r1").await.is_some());

        f.relay.stop(&SessionKey::recording("r1")).await;
        tokio::time::sleep(Duration::from_millis(2)).await;

        let source = attach(&f, "r1", "http://s1").await;
        assert_ok!(f.recordings.start("r1", source, &RecordingOptions::default()).await);
        assert_eq!(f.upstream.connects(), 2);
    }

    #[tokio::test]
    async fn test_stop_unknown_is_noop() {
        let f = fixture(MockUpstream::new());

        assert!(f.recordings.stop("missing").await.is_none());
        assert_eq!(f.recordings.duration("missing").await, 0);
    }

    #[tokio::test]
    async fn test_stop_twice() {
        let f = fixture(MockUpstream::new().endless("http://s1", &[b"abc"]));

        let source = attach(&f, "r1", "http://s1").await;
        f.recordings
            .start("r1", source, &RecordingOptions::default())
            .await
            .unwrap();

        assert!(f.recordings.stop("r1").await.is_some());
        assert!(f.recordings.stop("r1").await.is_none());
        assert!(!f.recordings.is_active("r1").await);
    }

    #[tokio::test]
    async fn test_duration_monotonic_then_frozen() {
        let f = fixture(MockUpstream::new().endless("http://s1", &[]));

        let source = attach(&f, "r1", "http://s1").await;
        f.recordings
            .start("r1", source, &RecordingOptions::default())
            .await
            .unwrap();

        let mut last = 0;
        for _ in 0..2 {
            tokio::time::sleep(Duration::from_millis(1100)).await;
            let now = f.recordings.duration("r1").await;
            assert!(now >= last);
            last = now;
        }
        assert!(last >= 2);

        let summary = f.recordings.stop("r1").await.unwrap();
        assert!(summary.duration >= last);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(f.recordings.duration("r1").await, 0);
        assert!(f.recordings.status().await.is_empty());
        assert!(f.recordings.stop("r1").await.is_none());
    }

    #[tokio::test]
    async fn test_max_duration_auto_stop() {
        let f = fixture(MockUpstream::new().endless("http://s1", &[b"x"]));

        let source = attach(&f, "r1", "http://s1").await;
        f.recordings
            .start("r1", source, &RecordingOptions::max_duration(1))
            .await
            .unwrap();
        let mut state = f.recordings.watch("r1").await.unwrap();

        assert_eq!(f.recordings.list_active().await, vec!["r1".to_string()]);

        let stopped = tokio::time::timeout(
            Duration::from_secs(3),
            state.wait_for(|s| !s.is_active()),
        )
        .await
        .unwrap()
        .map(|s| *s)
        .unwrap();

        assert_eq!(stopped, RecordingState::Stopped(StopReason::MaxDuration));
        assert!(f.recordings.list_active().await.is_empty());
    }

    #[tokio::test]
    async fn test_source_end_stops_recording() {
        let f = fixture(MockUpstream::new().finite("http://s1", &[b"ab", b"cd"]));

        let source = attach(&f, "r1", "http://s1").await;
        let filename = f
            .recordings
            .start("r1", source, &RecordingOptions::default())
            .await
            .unwrap();

        // May already have finished by the time we look
        if let Some(mut state) = f.recordings.watch("r1").await {
            let _ = state.wait_for(|s| !s.is_active()).await;
        }

        assert!(!f.recordings.is_active("r1").await);
        let written = f.recordings.read_file(&filename).await.unwrap();
        assert_eq!(written.as_ref(), b"abcd");
    }

    #[tokio::test]
    async fn test_upstream_failure_stops_recording() {
        let f = fixture(MockUpstream::new().broken("http://s1", &[b"ab"], "reset"));

        let source = attach(&f, "r1", "http://s1").await;
        let filename = f
            .recordings
            .start("r1", source, &RecordingOptions::default())
            .await
            .unwrap();

        if let Some(mut state) = f.recordings.watch("r1").await {
            let _ = state.wait_for(|s| !s.is_active()).await;
        }

        assert!(!f.recordings.is_active("r1").await);
        let stats = f.recordings.file_stats(&filename).await.unwrap();
        assert_eq!(stats.size, 2);
    }

    #[tokio::test]
    async fn test_storage_unavailable() {
        let f = fixture(MockUpstream::new().endless("http://s1", &[]));
        // A regular file where the directory should be
        let blocker = f.dir.path().join("blocked");
        std::fs::write(&blocker, b"").unwrap();

        let source = attach(&f, "r1", "http://s1").await;
        let result = f
            .recordings
            .start_in("r1", source, &blocker.join("sub"), &RecordingOptions::default())
            .await;

        assert!(matches!(result, Err(Error::StorageUnavailable(_))));
        assert!(!f.recordings.is_active("r1").await);

        // The failed attempt does not hold on to the id
        let source = f
            .relay
            .attach(&SessionKey::new("retry"), "http://s1")
            .await
            .unwrap();
        assert_ok!(f.recordings.start("r1", source, &RecordingOptions::default()).await);
        assert!(f.recordings.is_active("r1").await);
    }

    #[tokio::test]
    async fn test_list_active_in_start_order() {
        let f = fixture(
            MockUpstream::new()
                .endless("http://a", &[])
                .endless("http://b", &[]),
        );

        let b = attach(&f, "b", "http://b").await;
        f.recordings.start("b", b, &RecordingOptions::default()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        let a = attach(&f, "a", "http://a").await;
        f.recordings.start("a", a, &RecordingOptions::default()).await.unwrap();

        assert_eq!(f.recordings.list_active().await, vec!["b".to_string(), "a".to_string()]);

        let status = f.recordings.status().await;
        assert_eq!(status.len(), 2);
        assert!(status.iter().all(|s| s.is_active));
    }

    #[tokio::test]
    async fn test_file_operations() {
        let f = fixture(MockUpstream::new().endless("http://s1", &[]));

        std::fs::write(f.dir.path().join("old_1.mp3"), b"data").unwrap();

        assert_eq!(f.recordings.file_stats("old_1.mp3").await.unwrap().size, 4);
        assert_eq!(f.recordings.read_file("old_1.mp3").await.unwrap().as_ref(), b"data");

        assert_ok!(f.recordings.delete_file("old_1.mp3").await);
        assert!(matches!(
            f.recordings.delete_file("old_1.mp3").await,
            Err(Error::FileNotFound(_))
        ));
        assert!(matches!(
            f.recordings.read_file("old_1.mp3").await,
            Err(Error::FileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_open_file_streams_contents() {
        use tokio::io::AsyncReadExt;

        let f = fixture(MockUpstream::new());
        std::fs::write(f.dir.path().join("show_1.mp3"), b"0123456789").unwrap();
        std::fs::create_dir(f.dir.path().join("nested")).unwrap();

        let (mut file, len) = f.recordings.open_file("show_1.mp3").await.unwrap();
        let mut data = Vec::new();
        file.read_to_end(&mut data).await.unwrap();
        assert_eq!(len, 10);
        assert_eq!(data, b"0123456789");

        assert!(matches!(
            f.recordings.open_file("nested").await,
            Err(Error::FileNotFound(_))
        ));
        assert!(matches!(
            f.recordings.open_file("missing.mp3").await,
            Err(Error::FileNotFound(_))
        ));
        assert!(matches!(
            f.recordings.open_file("../show_1.mp3").await,
            Err(Error::InvalidFilename(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_filenames() {
        let f = fixture(MockUpstream::new());

        for name in ["../etc/passwd", "/etc/passwd", "a/b.mp3", "", "..", ".hidden"] {
            assert!(
                matches!(f.recordings.read_file(name).await, Err(Error::InvalidFilename(_))),
                "{name}"
            );
        }
    }

    #[tokio::test]
    async fn test_delete_active_file_refused() {
        let f = fixture(MockUpstream::new().endless("http://s1", &[]));

        let source = attach(&f, "r1", "http://s1").await;
        let filename = f
            .recordings
            .start("r1", source, &RecordingOptions::default())
            .await
            .unwrap();

        assert_err!(f.recordings.delete_file(&filename).await);
        f.recordings.stop("r1").await;
        assert_ok!(f.recordings.delete_file(&filename).await);
    }

    #[tokio::test]
    async fn test_tracked_handle_sees_source_end() {
        let f = fixture(MockUpstream::new().finite("http://s1", &[b"abc"]));

        let source = attach(&f, "r1", "http://s1").await;
        let handle = f
            .recordings
            .start_tracked("r1", source, &RecordingOptions::default())
            .await
            .unwrap();

        let summary = tokio::time::timeout(Duration::from_secs(2), handle.finished())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.reason, StopReason::SourceEnded);
        assert_eq!(summary.bytes_written, 3);
        assert_eq!(summary.filename, handle.session().filename);
        assert_eq!(handle.state(), RecordingState::Stopped(StopReason::SourceEnded));
        assert!(f.recordings.handle("r1").await.is_none());
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("abc-123_x"), "abc-123_x");
        assert_eq!(sanitize("../evil id"), "___evil_id");
        assert_eq!(sanitize(""), "recording");
    }
}
