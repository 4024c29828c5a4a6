//! Upstream relay
//!
//! The relay opens one upstream HTTP stream per session key and fans its bytes
//! out to any number of subscribers with `tokio::sync::broadcast`.
//!
//! # Architecture
//!
//! ```text
//!                          Arc<RelayManager>
//!                     ┌──────────────────────────┐
//!                     │ sessions: HashMap<Key,   │
//!                     │   Slot { OnceCell<       │
//!                     │     RelaySession {       │
//!                     │       tx: WeakSender,    │
//!                     │       cancel, ...        │
//!                     │ }>}>                     │
//!                     └────────────┬─────────────┘
//!                                  │
//!   upstream ──► pump task ──► broadcast::Sender
//!                                  │
//!         ┌────────────────────────┼────────────────────────┐
//!         ▼                        ▼                        ▼
//!   [Playback]               [Playback]               [Recording]
//!   sub.recv()               sub.recv()               sub.recv()
//!      │                        │                        │
//!      └──► WebSocket           └──► WebSocket           └──► File
//! ```
//!
//! # Backpressure
//!
//! The pump never waits for subscribers. A subscriber that falls more than
//! `broadcast_capacity` chunks behind receives [`Delivery::Lagged`] and is
//! detached; everyone else keeps receiving in order.

pub mod config;
pub mod entry;
pub mod frame;
pub mod store;
pub mod upstream;

pub use config::RelayConfig;
pub use entry::{RelaySession, RelayStats, Subscription};
pub use frame::{Delivery, SessionKey};
pub use store::RelayManager;
pub use upstream::{ByteStream, HttpUpstream, StreamInfo, Upstream, UpstreamStream};
