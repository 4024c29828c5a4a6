//! Live radio relay with concurrent recording
//!
//! Pulls audio from HTTP radio upstreams, fans each stream out to any number
//! of listeners, records streams to disk while they play, and exposes all of
//! it to browser clients over a JSON-over-WebSocket control channel.
//!
//! - [`relay`]: one upstream connection per stream key, broadcast fan-out
//! - [`recording`]: byte-exact capture of a relay subscription into a file
//! - [`gateway`]: per-client command handling and event delivery
//! - [`server`]: axum router, WebSocket endpoint and recording file routes
//!
//! # Example
//!
//! ```no_run
//! use radio_relay::{RadioServer, ServerConfig};
//!
//! # async fn run() -> radio_relay::Result<()> {
//! let server = RadioServer::new(ServerConfig::default().recordings_dir("/var/lib/radio"))?;
//! server.run_until(async {
//!     let _ = tokio::signal::ctrl_c().await;
//! }).await
//! # }
//! ```

pub mod error;
pub mod gateway;
pub mod recording;
pub mod relay;
pub mod server;

pub use error::{Error, Result};
pub use gateway::{ClientCommand, GatewayConfig, GatewaySession, Outbound, ServerEvent};
pub use recording::{RecordingConfig, RecordingManager, RecordingOptions, StopReason};
pub use relay::{Delivery, RelayConfig, RelayManager, SessionKey, Subscription, Upstream};
pub use server::{RadioServer, ServerConfig};
