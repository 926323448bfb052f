//! The playback loop.
//!
//! A loader prepares frames off-screen into a small queue, a player swaps
//! them in on the display schedule computed by [`crate::schedule`], and a
//! diagnostic tick compares the realized frame rate against the target.
//! Every transition issues a new [`Generation`]; timers carry the
//! generation they were started under and stop when it goes stale.

mod cursor;
mod driver;
mod machine;
mod simulation;
mod source;

pub use cursor::{CursorCell, PlaybackCursor};
pub use driver::PlaybackDriver;
pub use machine::{Generation, GotoOutcome, LoaderAction, PlaybackLoop, PlayerAction};
pub use simulation::{Simulation, SimulationConfig, SimulationStats};
pub use source::{FrameQueue, FrameSource, InstantSource, LoadResult, LoadedFrame};
