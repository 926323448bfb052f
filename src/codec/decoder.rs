//! Decoder seam and the headless implementation.

use super::error::DecodeError;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tapedeck_media::fmp4::SyntheticVideo;
use tapedeck_media::TrackConfig;

/// Configuration handed to [`VideoDecoder::configure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    pub codec: String,
    pub coded_width: u16,
    pub coded_height: u16,
    pub description: Option<Bytes>,
}

impl From<&TrackConfig> for DecoderConfig {
    fn from(track: &TrackConfig) -> Self {
        Self {
            codec: track.codec.clone(),
            coded_width: track.coded_width,
            coded_height: track.coded_height,
            description: track.description.clone(),
        }
    }
}

/// One compressed sample submitted for decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedChunk {
    /// Presentation time in seconds, tape offset included.
    pub timestamp: f64,
    pub duration: f64,
    pub is_key: bool,
    pub data: Bytes,
}

/// A decoded frame. Pixel data stays with the decoder; only the timing and
/// an optional frame tag travel.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub timestamp: f64,
    pub duration: f64,
    /// Frame number carried in the payload, when the stream tags its samples.
    pub tag: Option<u64>,
}

/// A video decoder with the configure/decode/flush/reset lifecycle.
pub trait VideoDecoder: Send {
    fn configure(&mut self, config: &DecoderConfig) -> Result<(), DecodeError>;

    fn decode(&mut self, chunk: EncodedChunk) -> Result<(), DecodeError>;

    /// Emit every frame still held by the decoder.
    fn flush(&mut self) -> Result<(), DecodeError>;

    /// Drop queued work. The decoder must be configured again.
    fn reset(&mut self);

    fn poll_output(&mut self) -> Option<DecodedFrame>;

    /// Chunks submitted but not yet output.
    fn queue_size(&self) -> usize;
}

/// Creates decoders; a reclaimed decoder is replaced through this.
pub trait DecoderFactory: Send + Sync {
    fn create(&self) -> Box<dyn VideoDecoder>;
}

// ---------------------------------------------------------------------------
// HeadlessDecoder
// ---------------------------------------------------------------------------

/// Pass-through decoder: outputs each chunk's timing once `hold_back`
/// newer chunks have been submitted, like a reordering hardware decoder.
pub struct HeadlessDecoder {
    config: Option<DecoderConfig>,
    needs_key: bool,
    hold_back: usize,
    held: VecDeque<DecodedFrame>,
    ready: VecDeque<DecodedFrame>,
    faults: Arc<Mutex<VecDeque<String>>>,
}

impl HeadlessDecoder {
    pub fn new(hold_back: usize) -> Self {
        Self {
            config: None,
            needs_key: true,
            hold_back,
            held: VecDeque::new(),
            ready: VecDeque::new(),
            faults: Arc::default(),
        }
    }

    pub fn config(&self) -> Option<&DecoderConfig> {
        self.config.as_ref()
    }

    fn release_held(&mut self, keep: usize) {
        while self.held.len() > keep {
            if let Some(frame) = self.held.pop_front() {
                self.ready.push_back(frame);
            }
        }
    }
}

impl VideoDecoder for HeadlessDecoder {
    fn configure(&mut self, config: &DecoderConfig) -> Result<(), DecodeError> {
        if config.codec.is_empty() {
            return Err(DecodeError::Unsupported("empty codec string".into()));
        }
        self.config = Some(config.clone());
        self.needs_key = true;
        Ok(())
    }

    fn decode(&mut self, chunk: EncodedChunk) -> Result<(), DecodeError> {
        if let Some(fault) = self.faults.lock().pop_front() {
            return Err(DecodeError::Decoder(fault));
        }
        if self.config.is_none() {
            return Err(DecodeError::NotConfigured);
        }
        if self.needs_key {
            if !chunk.is_key {
                return Err(DecodeError::KeyFrameRequired);
            }
            self.needs_key = false;
        }

        self.held.push_back(DecodedFrame {
            timestamp: chunk.timestamp,
            duration: chunk.duration,
            tag: SyntheticVideo::frame_number(&chunk.data),
        });
        self.release_held(self.hold_back);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DecodeError> {
        if self.config.is_none() {
            return Err(DecodeError::NotConfigured);
        }
        self.release_held(0);
        Ok(())
    }

    fn reset(&mut self) {
        self.config = None;
        self.needs_key = true;
        self.held.clear();
        self.ready.clear();
    }

    fn poll_output(&mut self) -> Option<DecodedFrame> {
        self.ready.pop_front()
    }

    fn queue_size(&self) -> usize {
        self.held.len()
    }
}

/// Factory for [`HeadlessDecoder`]s.
///
/// Faults queued with [`inject_fault`](Self::inject_fault) are raised by the
/// next `decode` call of any decoder this factory created.
#[derive(Clone, Default)]
pub struct HeadlessFactory {
    hold_back: usize,
    faults: Arc<Mutex<VecDeque<String>>>,
}

impl HeadlessFactory {
    pub fn new(hold_back: usize) -> Self {
        Self {
            hold_back,
            faults: Arc::default(),
        }
    }

    pub fn inject_fault(&self, message: impl Into<String>) {
        self.faults.lock().push_back(message.into());
    }
}

impl DecoderFactory for HeadlessFactory {
    fn create(&self) -> Box<dyn VideoDecoder> {
        let mut decoder = HeadlessDecoder::new(self.hold_back);
        decoder.faults = self.faults.clone();
        Box::new(decoder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn config() -> DecoderConfig {
        DecoderConfig {
            codec: "avc1.64001f".into(),
            coded_width: 640,
            coded_height: 360,
            description: None,
        }
    }

    fn chunk(frame: u64, is_key: bool) -> EncodedChunk {
        EncodedChunk {
            timestamp: frame as f64 / 30.0,
            duration: 1.0 / 30.0,
            is_key,
            data: Bytes::copy_from_slice(&frame.to_be_bytes()),
        }
    }

    #[test]
    fn test_requires_configure_and_key() {
        let mut decoder = HeadlessDecoder::new(0);
        assert_matches!(decoder.decode(chunk(0, true)), Err(DecodeError::NotConfigured));
        decoder.configure(&config()).unwrap();
        assert_matches!(decoder.decode(chunk(1, false)), Err(DecodeError::KeyFrameRequired));
        decoder.decode(chunk(0, true)).unwrap();
        decoder.decode(chunk(1, false)).unwrap();
        assert_eq!(decoder.poll_output().unwrap().tag, Some(0));
        assert_eq!(decoder.poll_output().unwrap().tag, Some(1));
        assert!(decoder.poll_output().is_none());
    }

    #[test]
    fn test_hold_back_until_flush() {
        let mut decoder = HeadlessDecoder::new(2);
        decoder.configure(&config()).unwrap();
        for (i, key) in [(0, true), (1, false), (2, false)] {
            decoder.decode(chunk(i, key)).unwrap();
        }
        assert_eq!(decoder.queue_size(), 2);
        assert_eq!(decoder.poll_output().unwrap().tag, Some(0));
        assert!(decoder.poll_output().is_none());

        decoder.flush().unwrap();
        assert_eq!(decoder.queue_size(), 0);
        assert_eq!(decoder.poll_output().unwrap().tag, Some(1));
        assert_eq!(decoder.poll_output().unwrap().tag, Some(2));
    }

    #[test]
    fn test_reset_unconfigures() {
        let mut decoder = HeadlessDecoder::new(1);
        decoder.configure(&config()).unwrap();
        decoder.decode(chunk(0, true)).unwrap();
        decoder.reset();
        assert!(decoder.config().is_none());
        assert_eq!(decoder.queue_size(), 0);
        assert_matches!(decoder.decode(chunk(0, true)), Err(DecodeError::NotConfigured));
    }

    #[test]
    fn test_injected_fault() {
        let factory = HeadlessFactory::new(0);
        let mut decoder = factory.create();
        decoder.configure(&config()).unwrap();
        factory.inject_fault("boom");
        assert_matches!(decoder.decode(chunk(0, true)), Err(DecodeError::Decoder(m)) if m == "boom");
        decoder.decode(chunk(0, true)).unwrap();
    }
}
