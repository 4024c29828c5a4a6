//! Upstream audio sources
//!
//! [`Upstream`] is the seam between the relay and the network. The relay only
//! needs an ordered stream of byte chunks plus the response metadata;
//! [`HttpUpstream`] provides both over HTTP(S) with reqwest.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::config::RelayConfig;

/// Ordered byte chunks from an upstream server
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Metadata reported by the upstream server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub url: String,
    pub content_type: Option<String>,
    /// `icy-name`
    pub name: Option<String>,
    /// `icy-genre`
    pub genre: Option<String>,
    /// `icy-br`, in kbit/s
    pub bitrate: Option<u32>,
}

impl StreamInfo {
    /// Build from response headers, reading the Icecast/Shoutcast `icy-*` fields
    pub fn from_headers(url: &str, headers: &HeaderMap) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            url: url.to_string(),
            content_type: headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string()),
            name: text("icy-name"),
            genre: text("icy-genre"),
            // Some servers send "128,128"
            bitrate: text("icy-br")
                .and_then(|v| v.split(',').next().and_then(|b| b.trim().parse().ok())),
        }
    }

    /// MIME type without parameters, lowercased
    pub fn mime(&self) -> Option<String> {
        self.content_type.as_deref().map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }

    /// Whether the content type denotes audio
    ///
    /// A missing content type is accepted: many ICY servers omit it.
    pub fn is_audio(&self) -> bool {
        match self.mime() {
            None => true,
            Some(mime) => mime.starts_with("audio/") || mime == "application/ogg",
        }
    }

    /// File extension matching the upstream format, if recognized
    pub fn file_extension(&self) -> Option<&'static str> {
        let ext = match self.mime()?.as_str() {
            "audio/mpeg" | "audio/mp3" | "audio/mpeg3" => "mp3",
            "audio/aac" | "audio/aacp" | "audio/x-aac" => "aac",
            "audio/mp4" | "audio/x-m4a" => "m4a",
            "audio/ogg" | "application/ogg" | "audio/vorbis" => "ogg",
            "audio/opus" => "opus",
            "audio/flac" | "audio/x-flac" => "flac",
            "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
            _ => return None,
        };
        Some(ext)
    }

    /// Bytes per second implied by the advertised bitrate
    pub fn byte_rate(&self) -> Option<u64> {
        self.bitrate
            .filter(|br| *br > 0)
            .map(|br| u64::from(br) * 1000 / 8)
    }
}

/// An open upstream connection
pub struct UpstreamStream {
    pub info: StreamInfo,
    pub body: ByteStream,
}

impl std::fmt::Debug for UpstreamStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamStream")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Source of upstream audio streams
#[async_trait]
pub trait Upstream: Send + Sync + 'static {
    /// Open the stream at `url`
    ///
    /// Fails with [`Error::UpstreamUnreachable`] when the server cannot be
    /// reached or does not answer with a successful audio response.
    async fn connect(&self, url: &str) -> Result<UpstreamStream>;

    /// Read the stream metadata without consuming the stream
    async fn probe(&self, url: &str) -> Result<StreamInfo>;
}

/// HTTP(S) upstream backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    require_audio: bool,
}

impl HttpUpstream {
    /// Build a client from relay configuration
    ///
    /// No total request timeout is set: radio streams never finish. Stalls are
    /// caught by the relay's read timeout instead.
    pub fn new(config: &RelayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            require_audio: config.require_audio_content_type,
        })
    }

    fn check(&self, url: &str, response: &reqwest::Response) -> Result<StreamInfo> {
        let status = response.status();
        if !status.is_success() {
            return Err(Error::upstream(url, format!("status {}", status)));
        }

        let info = StreamInfo::from_headers(url, response.headers());
        if self.require_audio && !info.is_audio() {
            return Err(Error::upstream(
                url,
                format!(
                    "non-audio content type {}",
                    info.content_type.as_deref().unwrap_or_default()
                ),
            ));
        }

        Ok(info)
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn connect(&self, url: &str) -> Result<UpstreamStream> {
        let response = self
            .client
            .get(url)
            .header("Icy-MetaData", "0")
            .send()
            .await
            .map_err(|e| Error::upstream(url, e))?;

        let info = self.check(url, &response)?;

        tracing::debug!(
            url = url,
            content_type = ?info.content_type,
            name = ?info.name,
            "Upstream connected"
        );

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other))
            .boxed();

        Ok(UpstreamStream { info, body })
    }

    async fn probe(&self, url: &str) -> Result<StreamInfo> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| Error::upstream(url, e))?;

        self.check(url, &response)
    }
}
