//! JPEG container plumbing: marker constants, extracted marker records,
//! segment scanning, and byte source adaptors.

pub mod icc;
pub mod segment;
pub mod source;

use bytes::Bytes;

use crate::types::{Error, Result};
use self::segment::{SegmentScanner, StopCondition};

/// JPEG marker codes and sizes.
pub mod markers {
    /// Size of a marker code (`0xFF` prefix plus the code byte).
    pub const MARKER_CODE_SIZE: usize = 2;
    /// Size of a segment's big-endian parameter length field.
    pub const PARAMETER_LENGTH_SIZE: usize = 2;
    /// Largest parameter payload one segment can carry, excluding the
    /// length field itself.
    pub const MAX_PARAMETER_BYTES: usize = u16::MAX as usize - PARAMETER_LENGTH_SIZE;

    /// Temporary private use marker (stand-alone).
    pub const TEM: u8 = 0x01;
    /// First restart marker.
    pub const RST0: u8 = 0xD0;
    /// Last restart marker.
    pub const RST7: u8 = 0xD7;
    /// Start of Image.
    pub const SOI: u8 = 0xD8;
    /// End of Image.
    pub const EOI: u8 = 0xD9;
    /// Start of Scan.
    pub const SOS: u8 = 0xDA;
    /// APP0 (JFIF).
    pub const APP0: u8 = 0xE0;
    /// APP1 (Exif, XMP).
    pub const APP1: u8 = 0xE1;
    /// APP2 (ICC, MPF, ISO 21496-1).
    pub const APP2: u8 = 0xE2;
    /// APP15 (legacy gain map box).
    pub const APP15: u8 = 0xEF;

    /// Whether a marker carries no parameter length field.
    pub fn is_standalone(marker: u8) -> bool {
        marker == TEM || (RST0..=RST7).contains(&marker) || marker == SOI || marker == EOI
    }
}

/// Signature prefixes that disambiguate APPn payloads.
pub mod signatures {
    /// Standard XMP packet in APP1.
    pub const XMP_STANDARD: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";
    /// Extended XMP chunk in APP1.
    pub const XMP_EXTENDED: &[u8] = b"http://ns.adobe.com/xmp/extension/\0";
    /// Exif in APP1.
    pub const EXIF: &[u8] = b"Exif\0\0";
    /// Multi-Picture Format directory in APP2.
    pub const MPF: &[u8] = b"MPF\0";
    /// ICC profile chunk in APP2.
    pub const ICC: &[u8] = b"ICC_PROFILE\0";
    /// ISO 21496-1 gain map metadata box in APP2.
    pub const ISO21496: &[u8] = b"urn:iso:std:iso:ts:21496:-1\0";
    /// Legacy single-segment gain map box in APP15.
    pub const LEGACY_GAINMAP: &[u8] = b"gmap\0";
}

/// A marker's raw parameter bytes, already extracted from the stream.
///
/// Upstream codecs that preserve APP segments hand these over directly; for
/// raw byte sources, [`markers_from_jpeg`] produces the same list by
/// scanning. Duplicates (multi-part ICC or XMP) are expected and resolved by
/// the consuming parser, not deduplicated here.
#[derive(Debug, Clone)]
pub struct Marker {
    /// The marker code (e.g. [`markers::APP1`]).
    pub marker: u8,
    /// The parameter bytes, excluding the length field.
    pub data: Bytes,
}

impl Marker {
    /// Create a marker record.
    pub fn new(marker: u8, data: impl Into<Bytes>) -> Self {
        Self {
            marker,
            data: data.into(),
        }
    }

    /// Standard XMP packet (APP1).
    pub fn is_xmp_standard(&self) -> bool {
        self.marker == markers::APP1 && self.data.starts_with(signatures::XMP_STANDARD)
    }

    /// Extended XMP chunk (APP1).
    pub fn is_xmp_extended(&self) -> bool {
        self.marker == markers::APP1 && self.data.starts_with(signatures::XMP_EXTENDED)
    }

    /// Exif payload (APP1).
    pub fn is_exif(&self) -> bool {
        self.marker == markers::APP1 && self.data.starts_with(signatures::EXIF)
    }

    /// Multi-Picture Format directory (APP2).
    pub fn is_mpf(&self) -> bool {
        self.marker == markers::APP2 && self.data.starts_with(signatures::MPF)
    }

    /// ICC profile chunk (APP2).
    pub fn is_icc(&self) -> bool {
        self.marker == markers::APP2 && self.data.starts_with(signatures::ICC)
    }

    /// ISO 21496-1 gain map metadata box (APP2).
    pub fn is_iso_gainmap(&self) -> bool {
        self.marker == markers::APP2 && self.data.starts_with(signatures::ISO21496)
    }

    /// Legacy single-segment gain map box (APP15).
    pub fn is_legacy_gainmap(&self) -> bool {
        self.marker == markers::APP15 && self.data.starts_with(signatures::LEGACY_GAINMAP)
    }

    /// The payload after a signature prefix, if this marker carries it.
    pub fn payload_after(&self, signature: &[u8]) -> Option<Bytes> {
        if self.data.starts_with(signature) {
            Some(self.data.slice(signature.len()..))
        } else {
            None
        }
    }
}

/// An ordered sequence of extracted marker records.
pub type MarkerList = Vec<Marker>;

/// Extract the APPn marker records of the primary image in `data`.
///
/// Scans up to the primary image's EOI; payload buffers are zero-copy
/// slices of `data`.
pub fn markers_from_jpeg(data: &Bytes) -> Result<MarkerList> {
    let mut scanner = SegmentScanner::new(StopCondition::at_end_of_image());
    scanner.write(data);
    let segments = scanner.finish()?;

    let mut list = MarkerList::new();
    for seg in &segments {
        if !(markers::APP0..=markers::APP15).contains(&seg.marker) {
            continue;
        }
        if let Some(range) = seg.parameter_range() {
            if range.end <= data.len() {
                list.push(Marker::new(seg.marker, data.slice(range)));
            }
        }
    }
    Ok(list)
}

/// Wrap parameter bytes into a complete marker segment
/// (`FF`, code, length, payload).
pub fn wrap_segment(marker: u8, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > markers::MAX_PARAMETER_BYTES {
        return Err(Error::Encode(format!(
            "segment payload of {} bytes exceeds the {} limit",
            payload.len(),
            markers::MAX_PARAMETER_BYTES
        )));
    }
    let length = (payload.len() + markers::PARAMETER_LENGTH_SIZE) as u16;
    let mut out = Vec::with_capacity(markers::MARKER_CODE_SIZE + length as usize);
    out.push(0xFF);
    out.push(marker);
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Insert complete marker segments immediately after the SOI of `jpeg`.
pub fn insert_after_soi(jpeg: &[u8], segments: &[Vec<u8>]) -> Result<Vec<u8>> {
    if jpeg.len() < 2 || jpeg[0] != 0xFF || jpeg[1] != markers::SOI {
        return Err(Error::Encode("image does not start with SOI".into()));
    }

    let inserted: usize = segments.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(jpeg.len() + inserted);
    out.extend_from_slice(&jpeg[..2]);
    for segment in segments {
        out.extend_from_slice(segment);
    }
    out.extend_from_slice(&jpeg[2..]);
    Ok(out)
}
