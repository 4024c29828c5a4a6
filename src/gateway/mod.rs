//! Session control gateway
//!
//! One [`GatewaySession`] per connected client. Commands arrive as JSON text
//! frames; the session answers with JSON events and forwards audio as raw
//! binary frames through a bounded outbound queue.
//!
//! ```text
//!   text frame ──► handle_text ──► RelayManager / RecordingManager
//!                                        │
//!   forwarder (per station) ─────────────┤
//!   monitor (per recording) ─────────────┤
//!                                        ▼
//!                              mpsc<Outbound> ──► socket writer
//! ```
//!
//! Recordings started by a client keep running after it disconnects; only
//! its playback forwarders are detached on close.

pub mod config;
pub mod message;
pub mod session;

pub use config::GatewayConfig;
pub use message::{ClientCommand, Outbound, ServerEvent};
pub use session::{GatewaySession, GatewayState};
