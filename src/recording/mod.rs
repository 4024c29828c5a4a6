//! Concurrent recordings
//!
//! Each recording attaches a write sink to a relay [`Subscription`] and
//! appends every chunk, in order and unmodified, to its own file. The file
//! is therefore only as playable as the upstream format is self-describing
//! (MP3, ADTS AAC and Ogg streams are; raw PCM is not).
//!
//! ```text
//!   RelaySession ──► Subscription ──► writer task ──► BufWriter<File>
//!                                          ▲
//!                    timer task ───────────┤ cancel
//!                    stop() ───────────────┘
//! ```
//!
//! [`Subscription`]: crate::relay::Subscription

pub mod config;
pub mod session;
pub mod store;
mod writer;

pub use config::RecordingConfig;
pub use session::{
    FileStats, RecordingOptions, RecordingSession, RecordingState, RecordingStatus,
    RecordingSummary, StopReason,
};
pub use store::{RecordingHandle, RecordingManager};
