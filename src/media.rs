//! Media descriptor: the renditions of one video and its frame geometry.

use serde::{Deserialize, Serialize};

/// One encoded rendition of the media.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rendition {
    pub url: String,
    /// `[height, width]`.
    pub resolution: [u32; 2],
    /// Bits per second.
    #[serde(alias = "bitRate", default)]
    pub bit_rate: u64,
    #[serde(alias = "segmentIndexUrl", default)]
    pub segment_index_url: Option<String>,
}

impl Rendition {
    pub fn height(&self) -> u32 {
        self.resolution[0]
    }

    pub fn width(&self) -> u32 {
        self.resolution[1]
    }

    /// Pixel count, used to order renditions by quality.
    pub fn pixels(&self) -> u64 {
        self.height() as u64 * self.width() as u64
    }
}

/// Everything needed to start a playback session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub renditions: Vec<Rendition>,
    pub fps: f64,
    #[serde(alias = "numFrames")]
    pub num_frames: u64,
}

impl MediaDescriptor {
    /// Parse and validate a descriptor from JSON.
    pub fn from_json(json: &[u8]) -> crate::Result<Self> {
        let descriptor: Self = serde_json::from_slice(json)
            .map_err(|e| crate::Error::InvalidDescriptor(e.to_string()))?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.renditions.is_empty() {
            return Err(crate::Error::InvalidDescriptor("no renditions".into()));
        }
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(crate::Error::InvalidDescriptor(format!(
                "fps must be positive, got {}",
                self.fps
            )));
        }
        if self.num_frames == 0 {
            return Err(crate::Error::InvalidDescriptor("num_frames is 0".into()));
        }
        if let Some(r) = self.renditions.iter().find(|r| r.url.is_empty()) {
            return Err(crate::Error::InvalidDescriptor(format!(
                "rendition {}x{} has no url",
                r.width(),
                r.height()
            )));
        }
        Ok(())
    }

    /// Index of the rendition with the fewest pixels, ties broken by bitrate.
    pub fn lowest_rendition(&self) -> usize {
        self.renditions
            .iter()
            .enumerate()
            .min_by_key(|(_, r)| (r.pixels(), r.bit_rate))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    pub fn rendition(&self, index: usize) -> crate::Result<&Rendition> {
        self.renditions.get(index).ok_or_else(|| {
            crate::Error::invalid_input(format!(
                "rendition {} out of range (have {})",
                index,
                self.renditions.len()
            ))
        })
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.num_frames as f64 / self.fps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTOR: &str = r#"{
        "renditions": [
            {"url": "http://cdn/hi.mp4", "resolution": [1080, 1920], "bitRate": 8000000,
             "segmentIndexUrl": "http://cdn/hi.json"},
            {"url": "http://cdn/lo.mp4", "resolution": [360, 640], "bit_rate": 800000}
        ],
        "fps": 30,
        "numFrames": 300
    }"#;

    #[test]
    fn test_parse_camel_case_aliases() {
        let d = MediaDescriptor::from_json(DESCRIPTOR.as_bytes()).unwrap();
        assert_eq!(d.num_frames, 300);
        assert_eq!(d.renditions[0].bit_rate, 8_000_000);
        assert_eq!(
            d.renditions[0].segment_index_url.as_deref(),
            Some("http://cdn/hi.json")
        );
        assert_eq!(d.renditions[1].segment_index_url, None);
        assert_eq!(d.renditions[0].width(), 1920);
        assert_eq!(d.duration(), 10.0);
    }

    #[test]
    fn test_lowest_rendition() {
        let d = MediaDescriptor::from_json(DESCRIPTOR.as_bytes()).unwrap();
        assert_eq!(d.lowest_rendition(), 1);
    }

    #[test]
    fn test_invalid_descriptors() {
        let empty = r#"{"renditions": [], "fps": 30, "num_frames": 10}"#;
        assert!(MediaDescriptor::from_json(empty.as_bytes()).is_err());

        let no_fps = r#"{"renditions": [{"url": "a", "resolution": [1, 1]}], "fps": 0, "num_frames": 10}"#;
        assert!(MediaDescriptor::from_json(no_fps.as_bytes()).is_err());

        assert!(MediaDescriptor::from_json(b"not json").is_err());
    }

    #[test]
    fn test_rendition_out_of_range() {
        let d = MediaDescriptor::from_json(DESCRIPTOR.as_bytes()).unwrap();
        assert!(d.rendition(1).is_ok());
        assert!(d.rendition(2).is_err());
    }
}
