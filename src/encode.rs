//! Gain map container synthesis.
//!
//! The inverse of discovery: given an already-encoded base image, an
//! already-encoded gain map image and the gain map parameters, inject the
//! metadata segments into each image and splice the pair into one stream
//! behind a freshly-serialized MPF directory.

use std::io::Cursor;

use crate::jpeg::icc::icc_segments;
use crate::jpeg::segment::{scan_seekable, StopCondition};
use crate::jpeg::{insert_after_soi, markers, signatures, wrap_segment};
use crate::metadata::iso21496;
use crate::metadata::mpf::{serialized_len, MpfImage, MultiPictureParams};
use crate::metadata::xmp::{generate_container_xmp, generate_hdrgm_xmp};
use crate::types::{Error, GainmapInfo, Result};

/// Build the gain map image's final bytes.
///
/// Injects the `hdrgm` XMP packet, the full ISO 21496-1 metadata box and,
/// when the parameters carry one, the alternate color space's ICC profile.
pub fn prepare_gainmap_image(gainmap_jpeg: &[u8], info: &GainmapInfo) -> Result<Vec<u8>> {
    let mut segments = Vec::new();

    let xmp = generate_hdrgm_xmp(info);
    let mut xmp_payload = signatures::XMP_STANDARD.to_vec();
    xmp_payload.extend_from_slice(xmp.as_bytes());
    segments.push(wrap_segment(markers::APP1, &xmp_payload)?);

    let mut iso_payload = signatures::ISO21496.to_vec();
    iso_payload.extend_from_slice(&iso21496::serialize(info));
    segments.push(wrap_segment(markers::APP2, &iso_payload)?);

    if let Some(icc) = &info.alternate_color_icc {
        segments.extend(icc_segments(icc)?);
    }

    insert_after_soi(gainmap_jpeg, &segments)
}

/// Build the base image's final bytes.
///
/// Injects the container directory XMP referencing the gain map's final
/// byte length, plus the version-only ISO 21496-1 box.
pub fn prepare_base_image(base_jpeg: &[u8], gainmap_length: usize) -> Result<Vec<u8>> {
    let mut segments = Vec::new();

    let xmp = generate_container_xmp(gainmap_length);
    let mut xmp_payload = signatures::XMP_STANDARD.to_vec();
    xmp_payload.extend_from_slice(xmp.as_bytes());
    segments.push(wrap_segment(markers::APP1, &xmp_payload)?);

    let mut iso_payload = signatures::ISO21496.to_vec();
    iso_payload.extend_from_slice(&iso21496::serialize_version());
    segments.push(wrap_segment(markers::APP2, &iso_payload)?);

    insert_after_soi(base_jpeg, &segments)
}

/// Splice a prepared base image and a prepared gain map image into one
/// stream with an MPF directory.
///
/// The MPF segment is inserted where the base image's Start-Of-Scan begins.
/// Its own serialized size is fixed for two images, so the final offsets
/// are a closed form rather than a fixed point: the base entry's size is
/// the base plus the MPF segment, and the gain map's data offset is that
/// total rebased onto the MPF endian field.
pub fn splice_with_mpf(base: &[u8], gainmap: &[u8]) -> Result<Vec<u8>> {
    let segments = scan_seekable(&mut Cursor::new(base), StopCondition::at_start_of_scan())?;
    let sos_offset = segments
        .last()
        .filter(|s| s.marker == markers::SOS)
        .map(|s| s.offset)
        .ok_or_else(|| Error::Encode("base image has no start-of-scan segment".into()))?;

    let mpf_segment_len =
        markers::MARKER_CODE_SIZE + markers::PARAMETER_LENGTH_SIZE + serialized_len(2);
    let base_total = base.len() + mpf_segment_len;

    let offset_base = sos_offset
        + markers::MARKER_CODE_SIZE
        + markers::PARAMETER_LENGTH_SIZE
        + signatures::MPF.len();
    let gainmap_data_offset = (base_total - offset_base) as u32;

    let params = MultiPictureParams {
        images: vec![
            MpfImage {
                size: base_total as u32,
                data_offset: 0,
            },
            MpfImage {
                size: gainmap.len() as u32,
                data_offset: gainmap_data_offset,
            },
        ],
    };
    let mpf_segment = wrap_segment(markers::APP2, &params.serialize()?)?;
    debug_assert_eq!(mpf_segment.len(), mpf_segment_len);

    let mut out = Vec::with_capacity(base_total + gainmap.len());
    out.extend_from_slice(&base[..sos_offset]);
    out.extend_from_slice(&mpf_segment);
    out.extend_from_slice(&base[sos_offset..]);
    out.extend_from_slice(gainmap);
    Ok(out)
}

/// Encode a complete gain map container.
///
/// Both inputs are complete encoded JPEG images; the output is the base
/// image with metadata and MPF directory spliced in, followed by the gain
/// map image.
pub fn encode_gainmap_container(
    base_jpeg: &[u8],
    gainmap_jpeg: &[u8],
    info: &GainmapInfo,
) -> Result<Vec<u8>> {
    info.validate()?;
    let gainmap = prepare_gainmap_image(gainmap_jpeg, info)?;
    let base = prepare_base_image(base_jpeg, gainmap.len())?;
    splice_with_mpf(&base, &gainmap)
}
