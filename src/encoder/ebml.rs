//! EBML primitives
//!
//! Element IDs and variable-size integers as used by Matroska/WebM, plus a
//! small writer that builds element trees into a byte buffer.

/// Element IDs used by the Matroska writer
pub mod ids {
    pub const EBML: u32 = 0x1A45_DFA3;
    pub const EBML_VERSION: u32 = 0x4286;
    pub const EBML_READ_VERSION: u32 = 0x42F7;
    pub const EBML_MAX_ID_LENGTH: u32 = 0x42F2;
    pub const EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
    pub const DOC_TYPE: u32 = 0x4282;
    pub const DOC_TYPE_VERSION: u32 = 0x4287;
    pub const DOC_TYPE_READ_VERSION: u32 = 0x4285;

    pub const SEGMENT: u32 = 0x1853_8067;
    pub const INFO: u32 = 0x1549_A966;
    pub const TIMESTAMP_SCALE: u32 = 0x2A_D7B1;
    pub const MUXING_APP: u32 = 0x4D80;
    pub const WRITING_APP: u32 = 0x5741;

    pub const TRACKS: u32 = 0x1654_AE6B;
    pub const TRACK_ENTRY: u32 = 0xAE;
    pub const TRACK_NUMBER: u32 = 0xD7;
    pub const TRACK_UID: u32 = 0x73C5;
    pub const TRACK_TYPE: u32 = 0x83;
    pub const FLAG_LACING: u32 = 0x9C;
    pub const CODEC_ID: u32 = 0x86;

    pub const VIDEO: u32 = 0xE0;
    pub const PIXEL_WIDTH: u32 = 0xB0;
    pub const PIXEL_HEIGHT: u32 = 0xBA;
    pub const COLOUR_SPACE: u32 = 0x2E_B524;

    pub const AUDIO: u32 = 0xE1;
    pub const SAMPLING_FREQUENCY: u32 = 0xB5;
    pub const CHANNELS: u32 = 0x9F;
    pub const BIT_DEPTH: u32 = 0x6264;

    pub const CLUSTER: u32 = 0x1F43_B675;
    pub const TIMESTAMP: u32 = 0xE7;
    pub const SIMPLE_BLOCK: u32 = 0xA3;
}

/// Size marker for masters whose length is not known up front
pub const UNKNOWN_SIZE: [u8; 8] = [0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];

/// Largest size a vint of 8 bytes can carry (all-ones is reserved)
pub const MAX_VINT: u64 = (1 << 56) - 2;

/// Encode a variable-size integer using the shortest form.
/// Values above `MAX_VINT` are clamped to it.
pub fn encode_vint(value: u64) -> Vec<u8> {
    let value = value.min(MAX_VINT);
    let mut length = 1;
    // All-ones at a given length means "unknown", so it needs one more byte
    while length < 8 && value >= (1u64 << (7 * length)) - 1 {
        length += 1;
    }
    let marked = value | (1u64 << (7 * length));
    marked.to_be_bytes()[8 - length..].to_vec()
}

/// Encode an element ID. IDs carry their own length marker.
pub fn encode_id(id: u32) -> Vec<u8> {
    let bytes = id.to_be_bytes();
    let skip = match id {
        0..=0xFF => 3,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 1,
        _ => 0,
    };
    bytes[skip..].to_vec()
}

/// Builds EBML elements into a buffer
#[derive(Debug, Default)]
pub struct EbmlWriter {
    buf: Vec<u8>,
}

impl EbmlWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Element with raw payload
    pub fn binary(&mut self, id: u32, data: &[u8]) {
        self.buf.extend(encode_id(id));
        self.buf.extend(encode_vint(data.len() as u64));
        self.buf.extend_from_slice(data);
    }

    /// Unsigned integer element, shortest big-endian form
    pub fn uint(&mut self, id: u32, value: u64) {
        let bytes = value.to_be_bytes();
        let skip = (value.leading_zeros() / 8).min(7) as usize;
        self.binary(id, &bytes[skip..]);
    }

    /// 64-bit float element
    pub fn float(&mut self, id: u32, value: f64) {
        self.binary(id, &value.to_be_bytes());
    }

    pub fn string(&mut self, id: u32, value: &str) {
        self.binary(id, value.as_bytes());
    }

    /// Master element whose children are written by `build`
    pub fn master(&mut self, id: u32, build: impl FnOnce(&mut EbmlWriter)) {
        let mut child = EbmlWriter::new();
        build(&mut child);
        self.binary(id, &child.buf);
    }

    /// Open a master element of unknown size; children simply follow it
    pub fn open_unknown(&mut self, id: u32) {
        self.buf.extend(encode_id(id));
        self.buf.extend_from_slice(&UNKNOWN_SIZE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vint_lengths() {
        assert_eq!(encode_vint(0), vec![0x80]);
        assert_eq!(encode_vint(1), vec![0x81]);
        assert_eq!(encode_vint(126), vec![0xFE]);
        // 127 would be all-ones in one byte
        assert_eq!(encode_vint(127), vec![0x40, 0x7F]);
        assert_eq!(encode_vint(16_382), vec![0x7F, 0xFE]);
        assert_eq!(encode_vint(16_383), vec![0x20, 0x3F, 0xFF]);
        assert_eq!(encode_vint(MAX_VINT).len(), 8);
    }

    #[test]
    fn test_id_keeps_marker_bytes() {
        assert_eq!(encode_id(ids::TRACK_ENTRY), vec![0xAE]);
        assert_eq!(encode_id(ids::DOC_TYPE), vec![0x42, 0x82]);
        assert_eq!(encode_id(ids::TIMESTAMP_SCALE), vec![0x2A, 0xD7, 0xB1]);
        assert_eq!(encode_id(ids::EBML), vec![0x1A, 0x45, 0xDF, 0xA3]);
    }

    #[test]
    fn test_uint_shortest_form() {
        let mut w = EbmlWriter::new();
        w.uint(ids::TRACK_NUMBER, 0);
        w.uint(ids::TRACK_NUMBER, 1_000_000);
        assert_eq!(
            w.into_bytes(),
            vec![0xD7, 0x81, 0x00, 0xD7, 0x83, 0x0F, 0x42, 0x40]
        );
    }

    #[test]
    fn test_master_wraps_children() {
        let mut w = EbmlWriter::new();
        w.master(ids::VIDEO, |v| {
            v.uint(ids::PIXEL_WIDTH, 2);
            v.uint(ids::PIXEL_HEIGHT, 3);
        });
        assert_eq!(
            w.into_bytes(),
            vec![0xE0, 0x86, 0xB0, 0x81, 0x02, 0xBA, 0x81, 0x03]
        );
    }

    #[test]
    fn test_unknown_size_master() {
        let mut w = EbmlWriter::new();
        w.open_unknown(ids::SEGMENT);
        let bytes = w.into_bytes();
        assert_eq!(&bytes[..4], &[0x18, 0x53, 0x80, 0x67]);
        assert_eq!(&bytes[4..], &UNKNOWN_SIZE);
    }
}
