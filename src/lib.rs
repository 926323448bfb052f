//! Tapedeck - frame-accurate playback core for remote fragmented MP4
//!
//! This library crate exposes the session, its backends and the pieces they
//! are built from so the CLI and integration tests can drive them directly.
//!
//! # Modules
//!
//! - `download` - Segment-aware ranged downloader running as a tokio task
//! - `buffer` - Capped byte slots with rollover, a seek slot and eviction
//! - `codec` - Demux-and-decode pipeline behind the `VideoDecoder` seam
//! - `schedule` - Display-rate calibration and frame scheduling
//! - `playback` - The playback loop state machine and its timer driver
//! - `backend` - Where downloaded bytes land and how frames become loadable
//! - `session` - One media session gluing the above together

pub mod backend;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod download;
pub mod error;
pub mod events;
pub mod media;
pub mod playback;
pub mod schedule;
pub mod session;

pub use error::{Error, Result};
pub use events::{ErrorCode, EventBus, PlayerEvent};
pub use media::{MediaDescriptor, Rendition};
pub use session::{MediaSession, SeekStatus, SessionOptions, SessionStats};
