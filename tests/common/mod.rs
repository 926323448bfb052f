//! Shared fixtures for integration tests.
//!
//! Synthetic fragmented MP4 renditions are served either from memory
//! ([`StaticFetcher`]) or over HTTP by a `wiremock` server whose responder
//! honours `Range` headers like a CDN would.

#![allow(dead_code)]

use std::sync::Arc;

use tapedeck::config::Config;
use tapedeck::download::StaticFetcher;
use tapedeck::media::{MediaDescriptor, Rendition};
use tapedeck_media::fmp4::{SyntheticMedia, SyntheticVideo};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const FPS: f64 = 30.0;

/// One synthetic rendition: 30 fps, one-second GOPs, ten-frame fragments.
pub fn synthetic(frames: u64, width: u16, height: u16) -> SyntheticMedia {
    SyntheticVideo::new(FPS, frames)
        .gop_len(30)
        .frag_len(10)
        .dimensions(width, height)
        .build()
        .expect("synthetic media")
}

/// Config with one-fragment sequential blocks so prefetch posts many
/// `Buffer` events.
pub fn small_blocks() -> Config {
    let mut config = Config::default();
    config.download.min_block_bytes = 1;
    config.download.event_channel_capacity = 4;
    config
}

pub fn rendition(base: &str, name: &str, resolution: [u32; 2]) -> Rendition {
    Rendition {
        url: format!("{}/{}.mp4", base, name),
        resolution,
        // Zero keeps block sizes at `min_block_bytes`.
        bit_rate: 0,
        segment_index_url: Some(format!("{}/{}.json", base, name)),
    }
}

pub fn descriptor(renditions: Vec<Rendition>, num_frames: u64) -> MediaDescriptor {
    MediaDescriptor {
        renditions,
        fps: FPS,
        num_frames,
    }
}

/// Register `media` and its index with an in-memory fetcher.
pub fn insert(fetcher: &StaticFetcher, rendition: &Rendition, media: &SyntheticMedia) {
    fetcher.insert(rendition.url.clone(), media.bytes.clone());
    if let Some(index_url) = &rendition.segment_index_url {
        fetcher.insert(index_url.clone(), media.index_json.clone().into_bytes());
    }
}

/// Two renditions of the same 300-frame clip held in memory.
pub fn two_renditions() -> (Arc<StaticFetcher>, MediaDescriptor) {
    let hi = synthetic(300, 1280, 720);
    let lo = synthetic(300, 640, 360);
    let fetcher = StaticFetcher::new();
    let hi_r = rendition("mem://cdn", "hi", [720, 1280]);
    let lo_r = rendition("mem://cdn", "lo", [360, 640]);
    insert(&fetcher, &hi_r, &hi);
    insert(&fetcher, &lo_r, &lo);
    (Arc::new(fetcher), descriptor(vec![hi_r, lo_r], 300))
}

// ---------------------------------------------------------------------------
// HTTP fixtures
// ---------------------------------------------------------------------------

/// Serves a byte resource, answering `Range: bytes=a-b` with 206.
pub struct RangeResponder {
    body: Vec<u8>,
}

impl RangeResponder {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self { body: body.into() }
    }
}

/// Parse `bytes=a-b` (inclusive end).
pub fn parse_range(value: &str) -> Option<(usize, usize)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_range);
        match range {
            Some((start, end)) if start <= end && end < self.body.len() => {
                ResponseTemplate::new(206)
                    .insert_header(
                        "content-range",
                        format!("bytes {}-{}/{}", start, end, self.body.len()).as_str(),
                    )
                    .set_body_bytes(self.body[start..=end].to_vec())
            }
            Some(_) => ResponseTemplate::new(416),
            None => ResponseTemplate::new(200).set_body_bytes(self.body.clone()),
        }
    }
}

/// Mount `media` at `/<name>.mp4` and its index at `/<name>.json`.
pub async fn serve(
    server: &MockServer,
    name: &str,
    media: &SyntheticMedia,
    resolution: [u32; 2],
) -> Rendition {
    Mock::given(method("GET"))
        .and(path(format!("/{}.mp4", name)))
        .respond_with(RangeResponder::new(media.bytes.to_vec()))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/{}.json", name)))
        .respond_with(ResponseTemplate::new(200).set_body_string(media.index_json.clone()))
        .mount(server)
        .await;
    rendition(&server.uri(), name, resolution)
}
