//! ISO BMFF box headers, a bounds-checked reader, and writer helpers.

use crate::{Error, Result};
use bytes::{BufMut, BytesMut};

/// Four-character box type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const STYP: Self = Self(*b"styp");
    pub const MOOV: Self = Self(*b"moov");
    pub const MVHD: Self = Self(*b"mvhd");
    pub const TRAK: Self = Self(*b"trak");
    pub const TKHD: Self = Self(*b"tkhd");
    pub const MDIA: Self = Self(*b"mdia");
    pub const MDHD: Self = Self(*b"mdhd");
    pub const HDLR: Self = Self(*b"hdlr");
    pub const MINF: Self = Self(*b"minf");
    pub const STBL: Self = Self(*b"stbl");
    pub const STSD: Self = Self(*b"stsd");
    pub const MVEX: Self = Self(*b"mvex");
    pub const TREX: Self = Self(*b"trex");
    pub const MOOF: Self = Self(*b"moof");
    pub const MFHD: Self = Self(*b"mfhd");
    pub const TRAF: Self = Self(*b"traf");
    pub const TFHD: Self = Self(*b"tfhd");
    pub const TFDT: Self = Self(*b"tfdt");
    pub const TRUN: Self = Self(*b"trun");
    pub const MDAT: Self = Self(*b"mdat");
    pub const AVC1: Self = Self(*b"avc1");
    pub const AVC3: Self = Self(*b"avc3");
    pub const HVC1: Self = Self(*b"hvc1");
    pub const HEV1: Self = Self(*b"hev1");
    pub const VP09: Self = Self(*b"vp09");
    pub const AV01: Self = Self(*b"av01");
    pub const AVCC: Self = Self(*b"avcC");
    pub const HVCC: Self = Self(*b"hvcC");
    pub const VPCC: Self = Self(*b"vpcC");
    pub const AV1C: Self = Self(*b"av1C");

    /// Get the 4-char code as a string.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }

    /// Sample entry types that carry video.
    pub fn is_visual_sample_entry(&self) -> bool {
        matches!(
            *self,
            Self::AVC1 | Self::AVC3 | Self::HVC1 | Self::HEV1 | Self::VP09 | Self::AV01
        )
    }
}

impl std::fmt::Display for FourCc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parsed box header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    /// Box type code.
    pub fourcc: FourCc,
    /// Box size including header.
    pub size: u64,
    /// Size of the header (8 or 16 bytes).
    pub header_len: u8,
}

impl BoxHeader {
    /// Size of the payload.
    pub fn payload_len(&self) -> u64 {
        self.size.saturating_sub(self.header_len as u64)
    }

    /// Peek a header at the start of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` is too short to hold the header.
    /// Boxes that extend to end of file (size 0) cannot be framed from a
    /// stream and are rejected.
    pub fn peek(buf: &[u8]) -> Result<Option<Self>> {
        if buf.len() < 8 {
            return Ok(None);
        }
        let size32 = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let fourcc = FourCc([buf[4], buf[5], buf[6], buf[7]]);
        let (size, header_len) = match size32 {
            0 => {
                return Err(Error::unsupported(format!(
                    "box '{}' extends to end of file",
                    fourcc
                )))
            }
            1 => {
                if buf.len() < 16 {
                    return Ok(None);
                }
                let mut large = [0u8; 8];
                large.copy_from_slice(&buf[8..16]);
                (u64::from_be_bytes(large), 16u8)
            }
            n => (n as u64, 8u8),
        };
        if size < header_len as u64 {
            return Err(Error::invalid_mp4(format!(
                "box '{}' size {} smaller than its header",
                fourcc, size
            )));
        }
        Ok(Some(Self {
            fourcc,
            size,
            header_len,
        }))
    }
}

/// Iterate the child boxes packed into `payload`.
pub fn children(payload: &[u8]) -> Children<'_> {
    Children { rest: payload }
}

/// Iterator over child boxes, yielding `(header, payload)`.
pub struct Children<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for Children<'a> {
    type Item = Result<(BoxHeader, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let header = match BoxHeader::peek(self.rest) {
            Ok(Some(h)) => h,
            Ok(None) => {
                let have = self.rest.len();
                self.rest = &[];
                return Some(Err(Error::BufferUnderflow { need: 8, have }));
            }
            Err(e) => {
                self.rest = &[];
                return Some(Err(e));
            }
        };
        let size = header.size as usize;
        if size > self.rest.len() {
            let have = self.rest.len();
            self.rest = &[];
            return Some(Err(Error::BufferUnderflow { need: size, have }));
        }
        let payload = &self.rest[header.header_len as usize..size];
        self.rest = &self.rest[size..];
        Some(Ok((header, payload)))
    }
}

/// Find the first child of type `fourcc`.
pub fn find_child(payload: &[u8], fourcc: FourCc) -> Result<Option<&[u8]>> {
    for child in children(payload) {
        let (header, body) = child?;
        if header.fourcc == fourcc {
            return Ok(Some(body));
        }
    }
    Ok(None)
}

/// Bounds-checked big-endian reader over a box payload.
#[derive(Debug)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::BufferUnderflow {
                need: n,
                have: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i32(&mut self) -> Result<i32> {
        Ok(self.u32()? as i32)
    }

    pub fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_be_bytes(arr))
    }

    /// Read a full-box `(version, flags)` prefix.
    pub fn version_flags(&mut self) -> Result<(u8, u32)> {
        let v = self.u32()?;
        Ok(((v >> 24) as u8, v & 0x00ff_ffff))
    }
}

/// Start a box, returning the position of its size placeholder.
pub(crate) fn begin_box(buf: &mut BytesMut, fourcc: FourCc) -> usize {
    let start = buf.len();
    buf.put_u32(0);
    buf.put_slice(&fourcc.0);
    start
}

/// Patch the size of a box started with [`begin_box`].
pub(crate) fn end_box(buf: &mut BytesMut, start: usize) {
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}
