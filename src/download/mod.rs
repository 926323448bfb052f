//! Segment-aware downloader.
//!
//! - `client`: the [`RangeFetcher`] seam with HTTP and in-memory fetchers
//! - `on_demand`: the scrub window planner
//! - `worker`: the tokio task that runs fetches and posts [`DownloadEvent`]s

mod client;
mod error;
pub mod on_demand;
mod worker;

pub use client::{load_index, HttpFetcher, RangeFetcher, RetryPolicy, StaticFetcher};
pub use error::DownloadError;
pub use on_demand::{OnDemandStep, OnDemandWindow, WindowParams};
pub use worker::{
    DownloadCommand, DownloadEvent, DownloadHandle, DownloadWorker, MediaSource, SeekDispatch,
};
