//! Gain map discovery over a JPEG container.
//!
//! Detection schemes are probed in a fixed priority: ISO 21496-1 metadata
//! (gated on the base image carrying a supported version box), then the
//! Adobe and Apple XMP schemas over each MPF-listed candidate image, then
//! the Google container directory as a fallback location. Every scheme is
//! independently fallible; discovery only gives up on total exhaustion.

use bytes::Bytes;

use crate::jpeg::icc::assemble_icc;
use crate::jpeg::source::{ImageSource, MemorySource};
use crate::jpeg::{markers, markers_from_jpeg, signatures, MarkerList};
use crate::metadata::iso21496;
use crate::metadata::mpf::{self, MultiPictureParams};
use crate::metadata::xmp::Xmp;
use crate::types::{Error, GainmapInfo, Result};

/// Gain map metadata decoder for one image.
///
/// Built from the image's extracted marker records (or raw bytes); finding
/// the auxiliary image's bytes additionally needs an [`ImageSource`] over
/// the full stream.
#[derive(Debug)]
pub struct GainmapDecoder {
    markers: MarkerList,
    xmp: Option<Xmp>,
}

impl GainmapDecoder {
    /// Build a decoder from already-extracted marker records.
    pub fn new(markers: MarkerList) -> Self {
        let xmp = Xmp::from_markers(&markers);
        Self { markers, xmp }
    }

    /// Build a decoder by scanning an encoded image.
    pub fn from_bytes(data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        Ok(Self::new(markers_from_jpeg(&data)?))
    }

    /// The marker records the decoder was built from.
    pub fn markers(&self) -> &MarkerList {
        &self.markers
    }

    /// The image's XMP documents, when present.
    pub fn xmp(&self) -> Option<&Xmp> {
        self.xmp.as_ref()
    }

    /// Whether the image declares the Adobe `hdrgm` schema in its XMP.
    pub fn base_declares_hdrgm(&self) -> bool {
        self.xmp.as_ref().map(Xmp::has_hdrgm).unwrap_or(false)
    }

    /// Whether the image carries an ISO 21496-1 box with a supported
    /// version.
    pub fn base_declares_iso(&self) -> bool {
        self.iso_payload()
            .map(|payload| iso21496::is_supported_version(&payload))
            .unwrap_or(false)
    }

    /// The ISO 21496-1 box payload, from APP2 or the legacy APP15 box.
    fn iso_payload(&self) -> Option<Bytes> {
        if let Some(marker) = self.markers.iter().find(|m| m.is_iso_gainmap()) {
            return marker.payload_after(signatures::ISO21496);
        }
        self.markers
            .iter()
            .find(|m| m.is_legacy_gainmap())
            .and_then(|m| m.payload_after(signatures::LEGACY_GAINMAP))
    }

    /// Full ISO 21496-1 gain map parameters, when this image carries them.
    fn iso_metadata(&self) -> Option<GainmapInfo> {
        let payload = self.iso_payload()?;
        if !iso21496::is_supported_version(&payload) {
            return None;
        }
        match iso21496::parse(&payload) {
            Ok(mut info) => {
                if !info.use_base_color_space {
                    info.alternate_color_icc = assemble_icc(&self.markers);
                }
                Some(info)
            }
            Err(err) => {
                log::warn!("discarding corrupt ISO gain map metadata: {}", err);
                None
            }
        }
    }

    /// Locate the gain map image and its parameters.
    ///
    /// `exif_hdr_headroom` is the HDR headroom the caller parsed from the
    /// base image's EXIF maker note, if any; the Apple scheme is only
    /// applicable when it is present and positive.
    ///
    /// Returns `Ok(None)` when every detection scheme comes up empty, and
    /// [`Error::InconsistentGainmapLocation`] when the MPF directory and
    /// the XMP container directory both resolve a gain map but disagree on
    /// where it lives.
    pub fn find_gainmap<S: ImageSource>(
        &self,
        source: &mut S,
        exif_hdr_headroom: Option<f32>,
    ) -> Result<Option<(Bytes, GainmapInfo)>> {
        let headroom = exif_hdr_headroom.filter(|h| h.is_finite() && *h > 0.0);
        let base_has_hdrgm = self.base_declares_hdrgm();
        let base_has_iso = self.base_declares_iso();

        let mut mpf_located: Option<(usize, usize, GainmapInfo)> = None;
        if let Some((params, segment_offset)) = find_mpf(source)? {
            for (index, image) in params.images.iter().enumerate().skip(1) {
                let offset = mpf::absolute_offset(image.data_offset, segment_offset);
                let size = image.size as usize;
                if size == 0 || offset.saturating_add(size) > source.len() {
                    log::warn!(
                        "MPF image {} at [{}, {}) lies outside the {} byte stream",
                        index,
                        offset,
                        offset.saturating_add(size),
                        source.len()
                    );
                    continue;
                }
                let bytes = source.subset(offset, size)?;
                if let Some(info) = extract_candidate(&bytes, base_has_iso, base_has_hdrgm, headroom)
                {
                    mpf_located = Some((offset, size, info));
                    break;
                }
            }
        }

        // Container directory offsets are relative to the end of the
        // primary image.
        let container_located = match (
            self.xmp.as_ref().and_then(Xmp::container_gainmap_location),
            primary_end(source)?,
        ) {
            (Some((relative, size)), Some(end)) => Some((end + relative, size)),
            _ => None,
        };

        if let Some((mpf_offset, mpf_size, info)) = mpf_located {
            if let Some((container_offset, container_size)) = container_located {
                if (mpf_offset, mpf_size) != (container_offset, container_size) {
                    return Err(Error::InconsistentGainmapLocation {
                        mpf_offset,
                        mpf_size,
                        container_offset,
                        container_size,
                    });
                }
            }
            let bytes = source.subset(mpf_offset, mpf_size)?;
            return Ok(Some((bytes, info)));
        }

        if let Some((offset, size)) = container_located {
            if size > 0 && offset.saturating_add(size) <= source.len() {
                let bytes = source.subset(offset, size)?;
                // The fallback location is re-validated with the XMP
                // schemes only.
                if let Some(info) = extract_candidate(&bytes, false, base_has_hdrgm, headroom) {
                    return Ok(Some((bytes, info)));
                }
            } else {
                log::warn!(
                    "container directory gain map at [{}, {}) lies outside the {} byte stream",
                    offset,
                    offset.saturating_add(size),
                    source.len()
                );
            }
        }

        Ok(None)
    }
}

/// Discover a gain map in a fully-buffered container.
pub fn find_gainmap_in_bytes(
    data: impl Into<Bytes>,
    exif_hdr_headroom: Option<f32>,
) -> Result<Option<(Bytes, GainmapInfo)>> {
    let data = data.into();
    let decoder = GainmapDecoder::from_bytes(data.clone())?;
    let mut source = MemorySource::new(data);
    decoder.find_gainmap(&mut source, exif_hdr_headroom)
}

/// Find and parse the primary image's MPF directory.
///
/// A segment that claims to be MPF but fails to parse is logged and
/// treated as absent; the remaining schemes still run.
fn find_mpf<S: ImageSource>(source: &mut S) -> Result<Option<(MultiPictureParams, usize)>> {
    let segments = source.segments()?.to_vec();
    for segment in segments {
        if segment.marker != markers::APP2 {
            continue;
        }
        let range = match segment.parameter_range() {
            Some(range) => range,
            None => continue,
        };
        if range.end > source.len() {
            continue;
        }
        let payload = source.subset(range.start, range.end - range.start)?;
        match MultiPictureParams::parse(&payload) {
            Ok(Some(params)) => return Ok(Some((params, segment.offset))),
            Ok(None) => continue,
            Err(err) => {
                log::warn!("ignoring corrupt MPF directory: {}", err);
                return Ok(None);
            }
        }
    }
    Ok(None)
}

/// Offset one past the primary image's EOI.
fn primary_end<S: ImageSource>(source: &mut S) -> Result<Option<usize>> {
    let segments = source.segments()?;
    Ok(segments
        .iter()
        .find(|s| s.marker == markers::EOI)
        .map(|s| s.offset + markers::MARKER_CODE_SIZE))
}

/// Test a candidate image's bytes against the applicable schemes, in
/// priority order. Each gate reflects what the *base* image declared.
fn extract_candidate(
    bytes: &Bytes,
    try_iso: bool,
    try_hdrgm: bool,
    headroom: Option<f32>,
) -> Option<GainmapInfo> {
    let candidate = match GainmapDecoder::from_bytes(bytes.clone()) {
        Ok(candidate) => candidate,
        Err(err) => {
            log::debug!("candidate image did not scan: {}", err);
            return None;
        }
    };

    if try_iso {
        if let Some(info) = candidate.iso_metadata() {
            log::debug!("gain map validated by ISO 21496-1 metadata");
            return Some(info);
        }
    }
    if try_hdrgm {
        if let Some(info) = candidate.xmp().and_then(Xmp::gainmap_info_hdrgm) {
            log::debug!("gain map validated by hdrgm XMP");
            return Some(info);
        }
    }
    if let Some(headroom) = headroom {
        if let Some(info) = candidate
            .xmp()
            .and_then(|xmp| xmp.gainmap_info_apple(headroom))
        {
            log::debug!("gain map validated by Apple HDRGainMap XMP");
            return Some(info);
        }
    }
    None
}
