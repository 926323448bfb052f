//! Movie fragment (moof + mdat) writer.

use super::boxes::{begin_box, end_box, FourCc};
use bytes::{BufMut, Bytes, BytesMut};

const SYNC_SAMPLE_FLAGS: u32 = 0x0200_0000;
const NON_SYNC_SAMPLE_FLAGS: u32 = 0x0101_0000;

/// One sample to place in a fragment.
#[derive(Debug, Clone)]
pub struct FragmentSample {
    pub duration: u32,
    pub cts_offset: i32,
    pub is_sync: bool,
    pub data: Bytes,
}

/// A serialized `moof` followed by its `mdat`.
#[derive(Debug, Clone)]
pub struct EncodedFragment {
    pub bytes: Bytes,
    pub moof_len: usize,
}

impl EncodedFragment {
    pub fn mdat_len(&self) -> usize {
        self.bytes.len() - self.moof_len
    }
}

/// Builder for one movie fragment.
pub struct FragmentBuilder {
    sequence_number: u32,
    track_id: u32,
    base_media_decode_time: u64,
}

impl FragmentBuilder {
    pub fn new(sequence_number: u32, track_id: u32) -> Self {
        Self {
            sequence_number,
            track_id,
            base_media_decode_time: 0,
        }
    }

    pub fn base_media_decode_time(mut self, time: u64) -> Self {
        self.base_media_decode_time = time;
        self
    }

    /// Serialize `samples` as `moof` + `mdat`.
    pub fn build(self, samples: &[FragmentSample]) -> EncodedFragment {
        let data_size: usize = samples.iter().map(|s| s.data.len()).sum();
        let mut buf = BytesMut::with_capacity(256 + samples.len() * 16 + data_size);

        let moof = begin_box(&mut buf, FourCc::MOOF);

        buf.put_u32(16);
        buf.put_slice(b"mfhd");
        buf.put_u32(0);
        buf.put_u32(self.sequence_number);

        let traf = begin_box(&mut buf, FourCc::TRAF);

        // default-base-is-moof
        buf.put_u32(16);
        buf.put_slice(b"tfhd");
        buf.put_u32(0x0002_0000);
        buf.put_u32(self.track_id);

        buf.put_u32(20);
        buf.put_slice(b"tfdt");
        buf.put_u32(0x0100_0000); // version 1
        buf.put_u64(self.base_media_decode_time);

        // data offset, duration, size, flags, composition offset
        let flags = 0x0000_0001 | 0x0000_0100 | 0x0000_0200 | 0x0000_0400 | 0x0000_0800;
        buf.put_u32((12 + 4 + 4 + samples.len() * 16) as u32);
        buf.put_slice(b"trun");
        buf.put_u32(0x0100_0000 | flags); // version 1: signed offsets
        buf.put_u32(samples.len() as u32);
        let data_offset_pos = buf.len();
        buf.put_u32(0);
        for sample in samples {
            buf.put_u32(sample.duration);
            buf.put_u32(sample.data.len() as u32);
            buf.put_u32(if sample.is_sync {
                SYNC_SAMPLE_FLAGS
            } else {
                NON_SYNC_SAMPLE_FLAGS
            });
            buf.put_i32(sample.cts_offset);
        }

        end_box(&mut buf, traf);
        end_box(&mut buf, moof);
        let moof_len = buf.len();

        // Offset from moof start to the first sample byte.
        let data_offset = (moof_len + 8) as u32;
        buf[data_offset_pos..data_offset_pos + 4].copy_from_slice(&data_offset.to_be_bytes());

        buf.put_u32((data_size + 8) as u32);
        buf.put_slice(b"mdat");
        for sample in samples {
            buf.put_slice(&sample.data);
        }

        EncodedFragment {
            bytes: buf.freeze(),
            moof_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fmp4::boxes::BoxHeader;

    fn sample(n: u8, is_sync: bool) -> FragmentSample {
        FragmentSample {
            duration: 1000,
            cts_offset: 0,
            is_sync,
            data: Bytes::from(vec![n; 10 + n as usize]),
        }
    }

    #[test]
    fn test_fragment_layout() {
        let frag = FragmentBuilder::new(1, 1)
            .base_media_decode_time(3000)
            .build(&[sample(0, true), sample(1, false)]);

        let moof = BoxHeader::peek(&frag.bytes).unwrap().unwrap();
        assert_eq!(moof.fourcc, FourCc::MOOF);
        assert_eq!(moof.size as usize, frag.moof_len);

        let mdat = BoxHeader::peek(&frag.bytes[frag.moof_len..]).unwrap().unwrap();
        assert_eq!(mdat.fourcc, FourCc::MDAT);
        assert_eq!(mdat.size as usize, frag.mdat_len());
        assert_eq!(frag.mdat_len(), 8 + 10 + 11);
    }

    #[test]
    fn test_empty_fragment() {
        let frag = FragmentBuilder::new(7, 1).build(&[]);
        assert_eq!(frag.mdat_len(), 8);
    }
}
