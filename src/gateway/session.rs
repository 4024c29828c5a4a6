//! Per-client session state machine
//!
//! A [`GatewaySession`] turns client commands into relay and recording
//! calls. It never touches the socket: everything the client should see is
//! queued on the outbound channel returned by [`GatewaySession::new`], and
//! the connection's writer task drains it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::recording::{RecordingHandle, RecordingManager, RecordingOptions, StopReason};
use crate::relay::{Delivery, RelayManager, SessionKey, Subscription};

use super::config::GatewayConfig;
use super::message::{ClientCommand, Outbound, ServerEvent};

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Open,
    Closed,
}

/// A running playback forwarder
struct Playback {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Playback {
    async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

/// State of one connected client
pub struct GatewaySession {
    id: u64,
    state: GatewayState,
    relay: Arc<RelayManager>,
    recordings: RecordingManager,
    config: GatewayConfig,
    outbound: mpsc::Sender<Outbound>,
    playback: HashMap<SessionKey, Playback>,
}

impl GatewaySession {
    /// Create a session and the receiving end of its outbound queue
    pub fn new(
        id: u64,
        relay: Arc<RelayManager>,
        recordings: RecordingManager,
        config: GatewayConfig,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (outbound, rx) = mpsc::channel(config.outbound_capacity);

        let session = Self {
            id,
            state: GatewayState::Open,
            relay,
            recordings,
            config,
            outbound,
            playback: HashMap::new(),
        };

        (session, rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> GatewayState {
        self.state
    }

    /// Stations this client is currently receiving audio from
    pub fn playing(&self) -> Vec<SessionKey> {
        let mut keys: Vec<SessionKey> = self
            .playback
            .iter()
            .filter(|(_, p)| !p.task.is_finished())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Handle one text frame from the client
    pub async fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<ClientCommand>(text) {
            Ok(command) => self.handle(command).await,
            Err(e) => {
                tracing::debug!(session_id = self.id, error = %e, "Unparseable client message");
                self.emit(ServerEvent::error("Invalid message format")).await;
            }
        }
    }

    /// Handle one command; failures are reported to the client as events
    pub async fn handle(&mut self, command: ClientCommand) {
        if self.state == GatewayState::Closed {
            tracing::debug!(session_id = self.id, "Command after close ignored");
            return;
        }

        let context = command.failure_context();
        if let Err(e) = self.dispatch(command).await {
            tracing::warn!(session_id = self.id, error = %e, "{}", context);
            self.emit(ServerEvent::error(format!("{}: {}", context, e)))
                .await;
        }
    }

    async fn dispatch(&mut self, command: ClientCommand) -> Result<()> {
        match command {
            ClientCommand::StartStream {
                station_id,
                station_url,
            } => {
                require("stationId", &station_id)?;
                self.start_stream(station_id, &station_url).await
            }
            ClientCommand::StopStream { station_id } => {
                self.stop_stream(station_id).await;
                Ok(())
            }
            ClientCommand::StartRecording {
                recording_id,
                station_url,
                options,
                ..
            } => {
                require("recordingId", &recording_id)?;
                self.start_recording(recording_id, &station_url, options.unwrap_or_default())
                    .await
            }
            ClientCommand::StopRecording { recording_id } => {
                self.stop_recording(recording_id).await;
                Ok(())
            }
            ClientCommand::GetRecordingStatus => {
                let recordings = self.recordings.status().await;
                self.emit(ServerEvent::RecordingStatus { recordings }).await;
                Ok(())
            }
        }
    }

    async fn start_stream(&mut self, station_id: String, station_url: &str) -> Result<()> {
        let key = SessionKey::station(&station_id);

        if let Some(playback) = self.playback.get(&key) {
            if !playback.task.is_finished() {
                tracing::debug!(session_id = self.id, stream = %key, "Stream already playing");
                self.emit(ServerEvent::StreamStarted {
                    station_id,
                    info: None,
                })
                .await;
                return Ok(());
            }
        }
        self.playback.remove(&key);

        let source = self.relay.attach(&key, station_url).await?;
        let info = source.info().clone();

        // Before the forwarder starts, so the client sees it ahead of any audio
        self.emit(ServerEvent::StreamStarted {
            station_id: station_id.clone(),
            info: Some(info),
        })
        .await;

        tracing::info!(session_id = self.id, stream = %key, "Playback started");

        let cancel = CancellationToken::new();
        let task = tokio::spawn(forward(
            source,
            Arc::clone(&self.relay),
            station_id,
            self.outbound.clone(),
            cancel.clone(),
        ));
        self.playback.insert(key, Playback { cancel, task });

        Ok(())
    }

    async fn stop_stream(&mut self, station_id: String) {
        let key = SessionKey::station(&station_id);

        if let Some(playback) = self.playback.remove(&key) {
            playback.stop().await;
            tracing::info!(session_id = self.id, stream = %key, "Playback stopped");
        }
        self.relay.release(&key).await;

        self.emit(ServerEvent::StreamStopped { station_id }).await;
    }

    async fn start_recording(
        &mut self,
        recording_id: String,
        station_url: &str,
        options: RecordingOptions,
    ) -> Result<()> {
        if self.recordings.is_active(&recording_id).await {
            return Err(Error::RecordingAlreadyActive(recording_id));
        }

        let key = SessionKey::recording(&recording_id);
        let source = self.relay.attach(&key, station_url).await?;

        let handle = match self
            .recordings
            .start_tracked(&recording_id, source, &options)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                self.relay.release(&key).await;
                return Err(e);
            }
        };

        self.emit(ServerEvent::RecordingStarted {
            recording_id,
            filename: handle.session().filename.clone(),
        })
        .await;

        tokio::spawn(monitor(
            handle,
            Arc::clone(&self.relay),
            self.outbound.clone(),
            self.config.update_interval,
        ));

        Ok(())
    }

    async fn stop_recording(&mut self, recording_id: String) {
        let summary = self.recordings.stop(&recording_id).await;

        match &summary {
            Some(_) => {
                self.relay
                    .release(&SessionKey::recording(&recording_id))
                    .await;
            }
            None => {
                tracing::debug!(
                    session_id = self.id,
                    recording_id = %recording_id,
                    "Stop for inactive recording"
                );
            }
        }

        self.emit(ServerEvent::RecordingStopped {
            recording_id,
            duration: summary.as_ref().map(|s| s.duration),
            reason: summary.map(|s| s.reason),
        })
        .await;
    }

    /// Detach every playback forwarder; recordings keep running
    pub async fn close(&mut self) {
        if self.state == GatewayState::Closed {
            return;
        }
        self.state = GatewayState::Closed;

        let playbacks: Vec<(SessionKey, Playback)> = self.playback.drain().collect();
        for (key, playback) in playbacks {
            playback.stop().await;
            self.relay.release(&key).await;
        }

        tracing::debug!(session_id = self.id, "Gateway session closed");
    }

    async fn emit(&self, event: ServerEvent) {
        if self.outbound.send(event.into()).await.is_err() {
            tracing::debug!(session_id = self.id, "Client gone, event dropped");
        }
    }
}

impl Drop for GatewaySession {
    fn drop(&mut self) {
        for playback in self.playback.values() {
            playback.cancel.cancel();
        }
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidCommand(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// Push audio from `source` to the client until the stream ends
///
/// When the forwarder gives up on its own (lag, dead client, end of
/// stream) it drops its subscription and releases the relay key. A
/// cancelled forwarder leaves the release to its canceller.
async fn forward(
    mut source: Subscription,
    relay: Arc<RelayManager>,
    station_id: String,
    outbound: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
) {
    loop {
        let delivery = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            delivery = source.recv() => delivery,
        };

        let terminal = delivery.is_terminal();
        let item = match delivery {
            Delivery::Chunk(bytes) => Outbound::Audio(bytes),
            Delivery::Ended | Delivery::Stopped => ServerEvent::StreamStopped {
                station_id: station_id.clone(),
            }
            .into(),
            Delivery::Failed(reason) => {
                ServerEvent::error(format!("Stream {} failed: {}", station_id, reason)).into()
            }
            Delivery::Lagged(skipped) => ServerEvent::error(format!(
                "Stream {} dropped: client fell {} chunks behind",
                station_id, skipped
            ))
            .into(),
        };

        // A full queue stalls only this client; the relay drops it on lag
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            sent = outbound.send(item) => sent.is_ok(),
        };

        if !sent || terminal {
            break;
        }
    }

    let key = source.key().clone();
    drop(source);
    if relay.release(&key).await {
        tracing::debug!(stream = %key, "Forwarder exit released idle relay");
    }
}

/// Report progress of a recording and clean up its relay key when it ends
///
/// Runs detached from the connection: the client may be gone long before
/// the recording stops.
async fn monitor(
    handle: RecordingHandle,
    relay: Arc<RelayManager>,
    outbound: mpsc::Sender<Outbound>,
    interval: Duration,
) {
    let recording_id = handle.session().recording_id.clone();
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let summary = loop {
        tokio::select! {
            biased;
            summary = handle.finished() => break summary,
            _ = ticker.tick() => {
                if outbound.is_closed() {
                    continue;
                }
                // Progress updates are droppable when the client is slow
                let _ = outbound.try_send(
                    ServerEvent::RecordingUpdate {
                        recording_id: recording_id.clone(),
                        duration: handle.elapsed_secs(),
                    }
                    .into(),
                );
            }
        }
    };

    relay.release(&handle.session().source_key).await;

    let Some(summary) = summary else {
        return;
    };

    // Whoever asked for the stop already answered
    if summary.reason == StopReason::Requested {
        return;
    }

    let mut events = Vec::with_capacity(2);
    if summary.reason == StopReason::Failed {
        events.push(ServerEvent::error(format!(
            "Recording {} failed: {}",
            recording_id,
            summary.error.as_deref().unwrap_or("unknown error")
        )));
    }
    events.push(ServerEvent::RecordingStopped {
        recording_id,
        duration: Some(summary.duration),
        reason: Some(summary.reason),
    });

    for event in events {
        if outbound.send(event.into()).await.is_err() {
            break;
        }
    }
}
