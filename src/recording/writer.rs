//! Per-recording writer and timer tasks
//!
//! The writer owns the destination file. Whatever ends the recording (stop,
//! max-duration timer, source end, failure), the writer is the one that
//! flushes, closes, publishes the final state and leaves the active set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::relay::{Delivery, Subscription};

use super::session::{RecordingSession, RecordingState, RecordingSummary, StopReason};

pub(super) type ActiveMap = HashMap<String, Arc<ActiveRecording>>;

/// Live state of one recording, shared by the manager and its tasks
pub(super) struct ActiveRecording {
    pub(super) session: RecordingSession,
    bytes_written: AtomicU64,
    cancel: CancellationToken,
    reason: Mutex<Option<StopReason>>,
    error: Mutex<Option<String>>,
    state: watch::Sender<RecordingState>,
    summary: Mutex<Option<RecordingSummary>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl ActiveRecording {
    pub(super) fn new(session: RecordingSession) -> Self {
        let (state, _) = watch::channel(RecordingState::Active);
        Self {
            session,
            bytes_written: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            reason: Mutex::new(None),
            error: Mutex::new(None),
            state,
            summary: Mutex::new(None),
            timer: Mutex::new(None),
        }
    }

    pub(super) fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    pub(super) fn watch(&self) -> watch::Receiver<RecordingState> {
        self.state.subscribe()
    }

    /// Ask the writer to finish; the first reason recorded wins
    pub(super) fn request_stop(&self, reason: StopReason) {
        self.reason.lock().get_or_insert(reason);
        self.cancel.cancel();
    }

    /// Wait until the writer has finalized, then return its summary
    pub(super) async fn finished(&self) -> Option<RecordingSummary> {
        let mut rx = self.state.subscribe();
        // Err only if the sender is gone, which means we are finalized anyway
        let _ = rx.wait_for(|state| !state.is_active()).await;
        self.summary.lock().clone()
    }

    pub(super) fn arm_timer(self: &Arc<Self>, max: Duration) {
        let recording = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(max) => {
                    tracing::info!(
                        recording_id = %recording.session.recording_id,
                        max_secs = max.as_secs(),
                        "Max duration reached"
                    );
                    recording.request_stop(StopReason::MaxDuration);
                }
                _ = recording.cancel.cancelled() => {}
            }
        });
        *self.timer.lock() = Some(handle);
    }

    fn fail(&self, message: String) -> StopReason {
        self.error.lock().get_or_insert(message);
        StopReason::Failed
    }
}

/// Drain `source` into `file` until the recording ends
pub(super) async fn run_writer(
    recording: Arc<ActiveRecording>,
    mut source: Subscription,
    mut file: BufWriter<File>,
    active: Arc<RwLock<ActiveMap>>,
) {
    let id = recording.session.recording_id.clone();
    let cancel = recording.cancel.clone();

    let outcome = loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break StopReason::Requested,

            delivery = source.recv() => match delivery {
                Delivery::Chunk(bytes) => {
                    if let Err(e) = file.write_all(&bytes).await {
                        tracing::error!(recording_id = %id, error = %e, "Recording write failed");
                        break recording.fail(format!("write failed: {}", e));
                    }
                    recording.bytes_written.fetch_add(bytes.len() as u64, Ordering::Relaxed);
                }
                Delivery::Ended | Delivery::Stopped => break StopReason::SourceEnded,
                Delivery::Failed(msg) => {
                    break recording.fail(format!("upstream failed: {}", msg));
                }
                Delivery::Lagged(skipped) => {
                    break recording.fail(format!(
                        "recording fell behind the stream ({} chunks skipped)",
                        skipped
                    ));
                }
            },
        }
    };

    // Detach from the relay before touching the disk again
    drop(source);

    let mut outcome = outcome;
    if let Err(e) = finish_file(file).await {
        tracing::error!(recording_id = %id, error = %e, "Recording flush failed");
        outcome = recording.fail(format!("flush failed: {}", e));
    }

    cancel.cancel();
    if let Some(timer) = recording.timer.lock().take() {
        timer.abort();
    }

    let reason = *recording.reason.lock().get_or_insert(outcome);
    let summary = RecordingSummary {
        recording_id: id.clone(),
        filename: recording.session.filename.clone(),
        started_at: recording.session.started_at,
        duration: recording.session.elapsed_secs(),
        bytes_written: recording.bytes_written(),
        reason,
        error: recording.error.lock().clone(),
    };

    {
        let mut map = active.write().await;
        if map
            .get(&id)
            .map(|current| Arc::ptr_eq(current, &recording))
            .unwrap_or(false)
        {
            map.remove(&id);
        }
    }

    tracing::info!(
        recording_id = %id,
        filename = %summary.filename,
        reason = ?reason,
        duration_secs = summary.duration,
        bytes = summary.bytes_written,
        "Recording stopped"
    );

    *recording.summary.lock() = Some(summary);
    recording.state.send_replace(RecordingState::Stopped(reason));
}

async fn finish_file(mut file: BufWriter<File>) -> std::io::Result<()> {
    file.flush().await?;
    let file = file.into_inner();
    file.sync_all().await
}
