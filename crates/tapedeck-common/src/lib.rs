//! Tapedeck-Common: Shared types, IDs, and utilities.
//!
//! This crate provides common functionality used across tapedeck:
//!
//! - **Typed IDs**: Type-safe wrappers for playback sessions and requests
//! - **Core Types**: Playback direction and loop state enums
//! - **Time Ranges**: Ordered, merged sets of buffered time intervals
//! - **Error Handling**: Common error types and result aliases
//!
//! # Examples
//!
//! ```
//! use tapedeck_common::{Direction, SessionId, TimeRanges};
//!
//! let session = SessionId::new();
//! assert_ne!(session, SessionId::new());
//!
//! let mut ranges = TimeRanges::new();
//! ranges.add(0.0, 2.0);
//! ranges.add(2.0, 4.0);
//! assert!(ranges.contains(3.5));
//! assert_eq!(Direction::Forward.sign(), 1);
//! ```

pub mod error;
pub mod ids;
pub mod ranges;
pub mod types;

pub use error::{Error, Result};
pub use ids::*;
pub use ranges::TimeRanges;
pub use types::*;
