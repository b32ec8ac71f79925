//! Gain map metadata discovery and synthesis for JPEG containers.
//!
//! An HDR gain map container is a standard JPEG with a secondary image
//! appended after the primary image's EOI. Three interleaved micro-formats
//! describe it: marker segments locate metadata in the byte stream, the
//! binary MPF directory (CIPA DC-007) lists the embedded images, and
//! XMP/RDF or ISO 21496-1 metadata carries the parameters for applying the
//! gain map.
//!
//! This crate finds, validates and extracts that metadata, and synthesizes
//! it when writing a container. It deliberately has **no pixel codec
//! dependency**: decoding the images themselves is the caller's concern,
//! and the crate hands back encoded byte ranges plus a normalized
//! [`GainmapInfo`] record.
//!
//! # Example
//!
//! ```ignore
//! use jpeg_gainmap::{find_gainmap_in_bytes, encode_gainmap_container, GainmapInfo};
//!
//! // Discovery: locate the gain map image and its parameters.
//! if let Some((gainmap_bytes, info)) = find_gainmap_in_bytes(jpeg_bytes, None)? {
//!     let gainmap_pixels = my_codec::decode(&gainmap_bytes)?;
//!     render_hdr(&base_pixels, &gainmap_pixels, &info);
//! }
//!
//! // Synthesis: bundle two encoded images into one container.
//! let container = encode_gainmap_container(&base_jpeg, &gainmap_jpeg, &info)?;
//! ```
//!
//! # Standards
//!
//! - [Ultra HDR Image Format v1.1](https://developer.android.com/media/platform/hdr-image-format)
//! - CIPA DC-007 (Multi-Picture Format)
//! - ISO 21496-1 (gain map metadata)
//! - Adobe XMP (hdrgm namespace), XMP Specification Part 3 (extended XMP)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod jpeg;
pub mod metadata;

mod decode;
mod encode;
mod types;

pub use decode::{find_gainmap_in_bytes, GainmapDecoder};
pub use encode::{
    encode_gainmap_container, prepare_base_image, prepare_gainmap_image, splice_with_mpf,
};
pub use types::{BaseImageType, Error, Fraction, GainmapInfo, Result};

/// Safety limits for parsing and allocation.
pub mod limits {
    /// Maximum XMP document length to parse (16 MB).
    pub const MAX_XMP_LENGTH: usize = 16 * 1024 * 1024;

    /// Maximum number of marker segments scanned from one stream.
    pub const MAX_SEGMENT_COUNT: usize = 8192;

    /// Maximum number of images an MPF directory may declare.
    pub const MAX_MPF_IMAGES: usize = 4096;
}
