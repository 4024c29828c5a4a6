//! Session keys and the deliveries broadcast to subscribers

use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum KeyKind {
    Stream,
    Recording,
}

/// Unique identifier for a relay session
///
/// Playback sessions are keyed by station id. Recording pulls live in their
/// own namespace so they never share an upstream connection with playback,
/// whatever the station id looks like.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    kind: KeyKind,
    name: String,
}

impl SessionKey {
    /// Create a playback key from any string
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            kind: KeyKind::Stream,
            name: key.into(),
        }
    }

    /// Key for playback of a station
    pub fn station(station_id: &str) -> Self {
        Self::new(station_id)
    }

    /// Key for the dedicated upstream pull of a recording
    pub fn recording(recording_id: &str) -> Self {
        Self {
            kind: KeyKind::Recording,
            name: recording_id.to_string(),
        }
    }

    /// Station or recording id this key was built from
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_recording(&self) -> bool {
        self.kind == KeyKind::Recording
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            KeyKind::Stream => f.write_str(&self.name),
            KeyKind::Recording => write!(f, "recording_{}", self.name),
        }
    }
}

impl From<&str> for SessionKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for SessionKey {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

/// What a subscriber observes on a relay session
///
/// Cheap to clone: `Bytes` is reference counted, so every subscriber shares
/// the allocation of each chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Bytes exactly as received from upstream
    Chunk(Bytes),
    /// Upstream closed the stream
    Ended,
    /// Upstream read failed or timed out
    Failed(String),
    /// The session was stopped explicitly
    Stopped,
    /// This subscriber fell behind and was dropped (chunks skipped)
    Lagged(u64),
}

impl Delivery {
    /// Whether this is the last delivery a subscriber will see
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Delivery::Chunk(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_key() {
        let key = SessionKey::recording("r1");
        assert_eq!(key.to_string(), "recording_r1");
        assert_eq!(key.name(), "r1");
        assert!(key.is_recording());
        assert_ne!(key, SessionKey::station("r1"));
    }

    #[test]
    fn test_station_cannot_alias_recording() {
        let station = SessionKey::station("recording_r1");
        let recording = SessionKey::recording("r1");

        assert_eq!(station.to_string(), recording.to_string());
        assert_ne!(station, recording);
        assert!(!station.is_recording());
    }

    #[test]
    fn test_terminal() {
        assert!(!Delivery::Chunk(Bytes::from_static(b"a")).is_terminal());
        assert!(Delivery::Ended.is_terminal());
        assert!(Delivery::Failed("reset".into()).is_terminal());
        assert!(Delivery::Stopped.is_terminal());
        assert!(Delivery::Lagged(3).is_terminal());
    }
}
