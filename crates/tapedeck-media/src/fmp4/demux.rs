//! Streaming fragmented MP4 demuxer.
//!
//! Bytes may arrive in arbitrary chunks. Each chunk carries its offset in the
//! remote file; a chunk that does not continue the previous one drops any
//! partially buffered box, which is what happens when a seek fetch jumps to a
//! different part of the file. Chunks must start on a box boundary after
//! such a jump.

use super::boxes::{children, find_child, BoxHeader, ByteReader, FourCc};
use crate::{Error, Result};
use bytes::{Bytes, BytesMut};

const TFHD_BASE_DATA_OFFSET: u32 = 0x0000_01;
const TFHD_SAMPLE_DESCRIPTION_INDEX: u32 = 0x0000_02;
const TFHD_DEFAULT_DURATION: u32 = 0x0000_08;
const TFHD_DEFAULT_SIZE: u32 = 0x0000_10;
const TFHD_DEFAULT_FLAGS: u32 = 0x0000_20;

const TRUN_DATA_OFFSET: u32 = 0x0000_01;
const TRUN_FIRST_SAMPLE_FLAGS: u32 = 0x0000_04;
const TRUN_SAMPLE_DURATION: u32 = 0x0001_00;
const TRUN_SAMPLE_SIZE: u32 = 0x0002_00;
const TRUN_SAMPLE_FLAGS: u32 = 0x0004_00;
const TRUN_SAMPLE_CTS: u32 = 0x0008_00;

const SAMPLE_IS_NON_SYNC: u32 = 0x0001_0000;

/// Offset of the first child box inside a visual sample entry payload.
const VISUAL_SAMPLE_ENTRY_CHILDREN: usize = 78;

/// Decoder configuration for the single video track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackConfig {
    pub track_id: u32,
    pub timescale: u32,
    /// RFC 6381 codec string, e.g. `avc1.64001f`.
    pub codec: String,
    pub coded_width: u16,
    pub coded_height: u16,
    /// Codec configuration record (`avcC`, `hvcC`, ...) payload.
    pub description: Option<Bytes>,
    pub default_sample_duration: u32,
    pub default_sample_size: u32,
    pub default_sample_flags: u32,
}

/// One demuxed video sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// Decode timestamp in track timescale.
    pub dts: u64,
    /// Composition timestamp in track timescale.
    pub cts: i64,
    pub duration: u32,
    pub is_sync: bool,
    pub timescale: u32,
    pub data: Bytes,
}

impl Sample {
    /// Presentation time in seconds.
    pub fn timestamp(&self) -> f64 {
        if self.timescale == 0 {
            return 0.0;
        }
        self.cts as f64 / self.timescale as f64
    }

    /// Duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.timescale == 0 {
            return 0.0;
        }
        self.duration as f64 / self.timescale as f64
    }
}

/// Output of [`Demuxer::push_chunk`].
#[derive(Debug, Clone, PartialEq)]
pub enum DemuxEvent {
    /// A `moov` was parsed.
    Init(TrackConfig),
    /// A `moof` + `mdat` pair was parsed.
    Samples(Vec<Sample>),
}

/// Sample described by a `trun`, located by absolute file offset.
#[derive(Debug, Clone)]
struct PendingSample {
    offset: u64,
    size: u32,
    dts: u64,
    cts_offset: i32,
    duration: u32,
    is_sync: bool,
}

/// Streaming demuxer state.
#[derive(Debug, Default)]
pub struct Demuxer {
    pending: BytesMut,
    pending_offset: u64,
    track: Option<TrackConfig>,
    fragment: Option<Vec<PendingSample>>,
    next_dts: u64,
}

impl Demuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Demuxer that already knows the track, for byte streams that start
    /// at a `moof` without repeating the init segment.
    pub fn with_track(track: TrackConfig) -> Self {
        Self {
            track: Some(track),
            ..Self::default()
        }
    }

    /// Track configuration from the last parsed `moov`.
    pub fn track(&self) -> Option<&TrackConfig> {
        self.track.as_ref()
    }

    /// Bytes held back waiting for the rest of a box.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Forget partial data and any `moof` awaiting its `mdat`.
    pub fn discard_partial(&mut self) {
        self.pending.clear();
        self.fragment = None;
    }

    /// Forget everything, including the track configuration.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Feed bytes that start at `file_offset` in the remote file.
    pub fn push_chunk(&mut self, file_offset: u64, data: &[u8]) -> Result<Vec<DemuxEvent>> {
        if self.pending.is_empty() {
            self.pending_offset = file_offset;
        } else if self.pending_offset + self.pending.len() as u64 != file_offset {
            self.discard_partial();
            self.pending_offset = file_offset;
        }
        self.pending.extend_from_slice(data);

        let mut events = Vec::new();
        while let Some(header) = BoxHeader::peek(&self.pending)? {
            if (self.pending.len() as u64) < header.size {
                break;
            }
            let offset = self.pending_offset;
            let whole = self.pending.split_to(header.size as usize).freeze();
            self.pending_offset += header.size;
            if let Some(event) = self.handle_box(offset, header, whole)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    fn handle_box(&mut self, offset: u64, header: BoxHeader, whole: Bytes) -> Result<Option<DemuxEvent>> {
        let payload = whole.slice(header.header_len as usize..);
        match header.fourcc {
            FourCc::MOOV => {
                let track = parse_moov(&payload)?;
                self.track = Some(track.clone());
                self.fragment = None;
                Ok(Some(DemuxEvent::Init(track)))
            }
            FourCc::MOOF => {
                let track = self.track.as_ref().ok_or(Error::MissingBox("moov"))?;
                let samples = parse_moof(&payload, offset, header.header_len, track, self.next_dts)?;
                self.fragment = Some(samples);
                Ok(None)
            }
            FourCc::MDAT => {
                let Some(samples) = self.fragment.take() else {
                    return Ok(None);
                };
                let track = self.track.as_ref().ok_or(Error::MissingBox("moov"))?;
                let data_start = offset + header.header_len as u64;
                let data_end = offset + header.size;
                let mut out = Vec::with_capacity(samples.len());
                for s in samples {
                    let end = s.offset + s.size as u64;
                    if s.offset < data_start || end > data_end {
                        return Err(Error::invalid_mp4(format!(
                            "sample at {}..{} outside mdat {}..{}",
                            s.offset, end, data_start, data_end
                        )));
                    }
                    let rel = (s.offset - offset) as usize;
                    self.next_dts = s.dts + s.duration as u64;
                    out.push(Sample {
                        dts: s.dts,
                        cts: s.dts as i64 + s.cts_offset as i64,
                        duration: s.duration,
                        is_sync: s.is_sync,
                        timescale: track.timescale,
                        data: whole.slice(rel..rel + s.size as usize),
                    });
                }
                Ok(Some(DemuxEvent::Samples(out)))
            }
            _ => Ok(None),
        }
    }
}

fn parse_moov(payload: &[u8]) -> Result<TrackConfig> {
    let mut track = None;
    for child in children(payload) {
        let (header, body) = child?;
        if header.fourcc == FourCc::TRAK && track.is_none() {
            track = parse_trak(body)?;
        }
    }
    let mut track = track.ok_or(Error::MissingBox("video trak"))?;

    if let Some(mvex) = find_child(payload, FourCc::MVEX)? {
        for child in children(mvex) {
            let (header, body) = child?;
            if header.fourcc != FourCc::TREX {
                continue;
            }
            let mut r = ByteReader::new(body);
            r.version_flags()?;
            if r.u32()? != track.track_id {
                continue;
            }
            r.u32()?; // default sample description index
            track.default_sample_duration = r.u32()?;
            track.default_sample_size = r.u32()?;
            track.default_sample_flags = r.u32()?;
        }
    }
    Ok(track)
}

/// Parse a `trak`, returning `None` when it is not a video track.
fn parse_trak(payload: &[u8]) -> Result<Option<TrackConfig>> {
    let mdia = find_child(payload, FourCc::MDIA)?.ok_or(Error::MissingBox("mdia"))?;
    let hdlr = find_child(mdia, FourCc::HDLR)?.ok_or(Error::MissingBox("hdlr"))?;
    let mut r = ByteReader::new(hdlr);
    r.skip(8)?;
    if r.bytes(4)? != b"vide" {
        return Ok(None);
    }

    let tkhd = find_child(payload, FourCc::TKHD)?.ok_or(Error::MissingBox("tkhd"))?;
    let mut r = ByteReader::new(tkhd);
    let (version, _) = r.version_flags()?;
    r.skip(if version == 1 { 16 } else { 8 })?;
    let track_id = r.u32()?;

    let mdhd = find_child(mdia, FourCc::MDHD)?.ok_or(Error::MissingBox("mdhd"))?;
    let mut r = ByteReader::new(mdhd);
    let (version, _) = r.version_flags()?;
    r.skip(if version == 1 { 16 } else { 8 })?;
    let timescale = r.u32()?;
    if timescale == 0 {
        return Err(Error::invalid_mp4("mdhd timescale is zero"));
    }

    let minf = find_child(mdia, FourCc::MINF)?.ok_or(Error::MissingBox("minf"))?;
    let stbl = find_child(minf, FourCc::STBL)?.ok_or(Error::MissingBox("stbl"))?;
    let stsd = find_child(stbl, FourCc::STSD)?.ok_or(Error::MissingBox("stsd"))?;
    let mut r = ByteReader::new(stsd);
    r.version_flags()?;
    if r.u32()? == 0 {
        return Err(Error::MissingBox("sample entry"));
    }
    let (entry, body) = children(&stsd[8..])
        .next()
        .ok_or(Error::MissingBox("sample entry"))??;
    if !entry.fourcc.is_visual_sample_entry() {
        return Err(Error::unsupported(format!("sample entry '{}'", entry.fourcc)));
    }

    let mut r = ByteReader::new(body);
    r.skip(24)?;
    let coded_width = r.u16()?;
    let coded_height = r.u16()?;
    if body.len() < VISUAL_SAMPLE_ENTRY_CHILDREN {
        return Err(Error::BufferUnderflow {
            need: VISUAL_SAMPLE_ENTRY_CHILDREN,
            have: body.len(),
        });
    }

    let mut description = None;
    for child in children(&body[VISUAL_SAMPLE_ENTRY_CHILDREN..]) {
        let (header, config) = child?;
        if matches!(
            header.fourcc,
            FourCc::AVCC | FourCc::HVCC | FourCc::VPCC | FourCc::AV1C
        ) {
            description = Some(Bytes::copy_from_slice(config));
            break;
        }
    }

    Ok(Some(TrackConfig {
        track_id,
        timescale,
        codec: codec_string(entry.fourcc, description.as_deref()),
        coded_width,
        coded_height,
        description,
        default_sample_duration: 0,
        default_sample_size: 0,
        default_sample_flags: 0,
    }))
}

/// Build an RFC 6381 codec string from the sample entry and its config.
pub fn codec_string(entry: FourCc, config: Option<&[u8]>) -> String {
    match (entry, config) {
        (FourCc::AVC1 | FourCc::AVC3, Some(c)) if c.len() >= 4 => {
            format!("{}.{:02x}{:02x}{:02x}", entry, c[1], c[2], c[3])
        }
        (FourCc::HVC1 | FourCc::HEV1, Some(c)) if c.len() >= 13 => {
            let profile = c[1] & 0x1f;
            let tier = if c[1] & 0x20 != 0 { 'H' } else { 'L' };
            format!("{}.{}.4.{}{}.B0", entry, profile, tier, c[12])
        }
        (FourCc::VP09, Some(c)) if c.len() >= 7 => {
            format!("vp09.{:02}.{:02}.{:02}", c[4], c[5], c[6] >> 4)
        }
        _ => entry.to_string(),
    }
}

fn parse_moof(
    payload: &[u8],
    moof_offset: u64,
    header_len: u8,
    track: &TrackConfig,
    fallback_dts: u64,
) -> Result<Vec<PendingSample>> {
    let mut out = Vec::new();
    let mut traf_seen = false;

    for child in children(payload) {
        let (header, traf) = child?;
        if header.fourcc != FourCc::TRAF {
            continue;
        }

        let tfhd = find_child(traf, FourCc::TFHD)?.ok_or(Error::MissingBox("tfhd"))?;
        let mut r = ByteReader::new(tfhd);
        let (_, flags) = r.version_flags()?;
        let track_id = r.u32()?;
        if track_id != track.track_id {
            continue;
        }
        // Without an explicit base, the first traf starts at the moof.
        let mut base = moof_offset;
        if flags & TFHD_BASE_DATA_OFFSET != 0 {
            base = r.u64()?;
        } else if traf_seen {
            base = out
                .last()
                .map(|s: &PendingSample| s.offset + s.size as u64)
                .unwrap_or(moof_offset);
        }
        if flags & TFHD_SAMPLE_DESCRIPTION_INDEX != 0 {
            r.u32()?;
        }
        let default_duration = if flags & TFHD_DEFAULT_DURATION != 0 {
            r.u32()?
        } else {
            track.default_sample_duration
        };
        let default_size = if flags & TFHD_DEFAULT_SIZE != 0 {
            r.u32()?
        } else {
            track.default_sample_size
        };
        let default_flags = if flags & TFHD_DEFAULT_FLAGS != 0 {
            r.u32()?
        } else {
            track.default_sample_flags
        };
        traf_seen = true;

        let mut dts = match find_child(traf, FourCc::TFDT)? {
            Some(tfdt) => {
                let mut r = ByteReader::new(tfdt);
                let (version, _) = r.version_flags()?;
                if version == 1 {
                    r.u64()?
                } else {
                    r.u32()? as u64
                }
            }
            None => fallback_dts,
        };

        let mut cursor = base;
        for child in children(traf) {
            let (header, trun) = child?;
            if header.fourcc != FourCc::TRUN {
                continue;
            }
            let mut r = ByteReader::new(trun);
            let (_, flags) = r.version_flags()?;
            let count = r.u32()?;
            if flags & TRUN_DATA_OFFSET != 0 {
                let rel = r.i32()? as i64;
                cursor = (base as i64 + rel).max(0) as u64;
            }
            let first_flags = if flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
                Some(r.u32()?)
            } else {
                None
            };
            for i in 0..count {
                let duration = if flags & TRUN_SAMPLE_DURATION != 0 {
                    r.u32()?
                } else {
                    default_duration
                };
                let size = if flags & TRUN_SAMPLE_SIZE != 0 {
                    r.u32()?
                } else {
                    default_size
                };
                let sample_flags = if flags & TRUN_SAMPLE_FLAGS != 0 {
                    r.u32()?
                } else if i == 0 {
                    first_flags.unwrap_or(default_flags)
                } else {
                    default_flags
                };
                let cts_offset = if flags & TRUN_SAMPLE_CTS != 0 {
                    r.i32()?
                } else {
                    0
                };
                out.push(PendingSample {
                    offset: cursor,
                    size,
                    dts,
                    cts_offset,
                    duration,
                    is_sync: sample_flags & SAMPLE_IS_NON_SYNC == 0,
                });
                cursor += size as u64;
                dts += duration as u64;
            }
        }
    }

    if !traf_seen {
        return Err(Error::invalid_mp4(format!(
            "moof at {} (header {}) has no traf for track {}",
            moof_offset, header_len, track.track_id
        )));
    }
    Ok(out)
}
