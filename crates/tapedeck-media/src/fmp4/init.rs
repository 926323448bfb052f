//! Initialization segment (ftyp + moov) writer for a single video track.

use super::boxes::{begin_box, end_box, FourCc};
use bytes::{BufMut, Bytes, BytesMut};

/// Serialized initialization segment.
#[derive(Debug, Clone)]
pub struct InitSegment {
    /// `ftyp` followed by `moov`.
    pub data: Bytes,
    /// Length of the `ftyp` box.
    pub ftyp_len: usize,
    pub timescale: u32,
}

impl InitSegment {
    pub fn builder() -> InitSegmentBuilder {
        InitSegmentBuilder::new()
    }

    /// Length of the `moov` box.
    pub fn moov_len(&self) -> usize {
        self.data.len() - self.ftyp_len
    }
}

/// Builder for video-only init segments.
#[derive(Debug, Clone)]
pub struct InitSegmentBuilder {
    track_id: u32,
    timescale: u32,
    duration: u64,
    width: u16,
    height: u16,
    sample_entry: FourCc,
    config_box: FourCc,
    config: Option<Vec<u8>>,
    default_sample_duration: u32,
}

impl InitSegmentBuilder {
    pub fn new() -> Self {
        Self {
            track_id: 1,
            timescale: 90000,
            duration: 0,
            width: 1920,
            height: 1080,
            sample_entry: FourCc::AVC1,
            config_box: FourCc::AVCC,
            config: None,
            default_sample_duration: 0,
        }
    }

    pub fn track_id(mut self, id: u32) -> Self {
        self.track_id = id;
        self
    }

    pub fn timescale(mut self, ts: u32) -> Self {
        self.timescale = ts;
        self
    }

    pub fn duration(mut self, d: u64) -> Self {
        self.duration = d;
        self
    }

    pub fn dimensions(mut self, width: u16, height: u16) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the `avcC` record carried by an `avc1` entry.
    pub fn avc_config(mut self, record: Vec<u8>) -> Self {
        self.sample_entry = FourCc::AVC1;
        self.config_box = FourCc::AVCC;
        self.config = Some(record);
        self
    }

    /// Set an arbitrary sample entry and configuration box.
    pub fn codec(mut self, sample_entry: FourCc, config_box: FourCc, record: Vec<u8>) -> Self {
        self.sample_entry = sample_entry;
        self.config_box = config_box;
        self.config = Some(record);
        self
    }

    /// Default sample duration recorded in `trex`.
    pub fn default_sample_duration(mut self, d: u32) -> Self {
        self.default_sample_duration = d;
        self
    }

    pub fn build(self) -> InitSegment {
        let mut buf = BytesMut::with_capacity(1024);
        self.write_ftyp(&mut buf);
        let ftyp_len = buf.len();
        self.write_moov(&mut buf);
        InitSegment {
            data: buf.freeze(),
            ftyp_len,
            timescale: self.timescale,
        }
    }

    fn write_ftyp(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::FTYP);
        buf.put_slice(b"isom");
        buf.put_u32(0x200);
        for brand in [b"isom", b"iso6", b"avc1", b"mp41"] {
            buf.put_slice(brand);
        }
        end_box(buf, start);
    }

    fn write_moov(&self, buf: &mut BytesMut) {
        let moov = begin_box(buf, FourCc::MOOV);
        self.write_mvhd(buf);

        let trak = begin_box(buf, FourCc::TRAK);
        self.write_tkhd(buf);
        let mdia = begin_box(buf, FourCc::MDIA);
        self.write_mdhd(buf);
        write_hdlr(buf);
        self.write_minf(buf);
        end_box(buf, mdia);
        end_box(buf, trak);

        let mvex = begin_box(buf, FourCc::MVEX);
        let trex = begin_box(buf, FourCc::TREX);
        buf.put_u32(0); // version/flags
        buf.put_u32(self.track_id);
        buf.put_u32(1); // default sample description index
        buf.put_u32(self.default_sample_duration);
        buf.put_u32(0); // default sample size
        buf.put_u32(0x0101_0000); // non-sync by default
        end_box(buf, trex);
        end_box(buf, mvex);

        end_box(buf, moov);
    }

    fn write_mvhd(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::MVHD);
        buf.put_u8(1); // version 1
        buf.put_slice(&[0, 0, 0]);
        buf.put_u64(0); // creation time
        buf.put_u64(0); // modification time
        buf.put_u32(self.timescale);
        buf.put_u64(self.duration);
        buf.put_u32(0x0001_0000); // rate = 1.0
        buf.put_u16(0x0100); // volume = 1.0
        buf.put_u16(0);
        buf.put_u64(0);
        put_identity_matrix(buf);
        for _ in 0..6 {
            buf.put_u32(0);
        }
        buf.put_u32(self.track_id + 1); // next track ID
        end_box(buf, start);
    }

    fn write_tkhd(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::TKHD);
        buf.put_u8(1);
        buf.put_slice(&[0, 0, 7]); // enabled, in_movie, in_preview
        buf.put_u64(0);
        buf.put_u64(0);
        buf.put_u32(self.track_id);
        buf.put_u32(0);
        buf.put_u64(self.duration);
        buf.put_u64(0);
        buf.put_u16(0); // layer
        buf.put_u16(0); // alternate group
        buf.put_u16(0); // volume
        buf.put_u16(0);
        put_identity_matrix(buf);
        buf.put_u32((self.width as u32) << 16);
        buf.put_u32((self.height as u32) << 16);
        end_box(buf, start);
    }

    fn write_mdhd(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::MDHD);
        buf.put_u8(1);
        buf.put_slice(&[0, 0, 0]);
        buf.put_u64(0);
        buf.put_u64(0);
        buf.put_u32(self.timescale);
        buf.put_u64(self.duration);
        buf.put_u16(0x55C4); // language: und
        buf.put_u16(0);
        end_box(buf, start);
    }

    fn write_minf(&self, buf: &mut BytesMut) {
        let minf = begin_box(buf, FourCc::MINF);

        buf.put_u32(20);
        buf.put_slice(b"vmhd");
        buf.put_u32(1); // version/flags
        buf.put_u64(0); // graphics mode + opcolor

        buf.put_u32(36);
        buf.put_slice(b"dinf");
        buf.put_u32(28);
        buf.put_slice(b"dref");
        buf.put_u32(0);
        buf.put_u32(1);
        buf.put_u32(12);
        buf.put_slice(b"url ");
        buf.put_u32(1); // self-contained

        let stbl = begin_box(buf, FourCc::STBL);
        self.write_stsd(buf);
        // Fragmented files keep the sample tables empty.
        for (name, extra) in [(b"stts", 0), (b"stsc", 0), (b"stsz", 4), (b"stco", 0)] {
            buf.put_u32(16 + extra);
            buf.put_slice(name);
            buf.put_u32(0);
            buf.put_u32(0);
            if extra > 0 {
                buf.put_u32(0);
            }
        }
        end_box(buf, stbl);

        end_box(buf, minf);
    }

    fn write_stsd(&self, buf: &mut BytesMut) {
        let stsd = begin_box(buf, FourCc::STSD);
        buf.put_u32(0);
        buf.put_u32(1); // entry count

        let entry = begin_box(buf, self.sample_entry);
        buf.put_slice(&[0; 6]);
        buf.put_u16(1); // data reference index
        buf.put_u16(0);
        buf.put_u16(0);
        buf.put_slice(&[0; 12]);
        buf.put_u16(self.width);
        buf.put_u16(self.height);
        buf.put_u32(0x0048_0000); // 72 dpi
        buf.put_u32(0x0048_0000);
        buf.put_u32(0);
        buf.put_u16(1); // frame count
        buf.put_slice(&[0; 32]); // compressor name
        buf.put_u16(0x0018); // depth
        buf.put_i16(-1);

        if let Some(ref record) = self.config {
            let config = begin_box(buf, self.config_box);
            buf.put_slice(record);
            end_box(buf, config);
        }

        end_box(buf, entry);
        end_box(buf, stsd);
    }
}

impl Default for InitSegmentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn write_hdlr(buf: &mut BytesMut) {
    let start = begin_box(buf, FourCc::HDLR);
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_slice(b"vide");
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_slice(b"VideoHandler\0");
    end_box(buf, start);
}

fn put_identity_matrix(buf: &mut BytesMut) {
    for v in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
        buf.put_u32(v);
    }
}
