//! ICC profile chunking for JPEG APP2 segments.
//!
//! Profiles larger than one segment are split across multiple APP2 markers,
//! each carrying a 1-based chunk index and the total chunk count after the
//! `ICC_PROFILE\0` signature.

use bytes::Bytes;

use crate::jpeg::{markers, signatures, wrap_segment, Marker, MarkerList};
use crate::types::Result;

/// Split ICC profile data into complete APP2 marker segments.
pub fn icc_segments(icc_data: &[u8]) -> Result<Vec<Vec<u8>>> {
    let max_chunk = markers::MAX_PARAMETER_BYTES - signatures::ICC.len() - 2;

    let chunks: Vec<&[u8]> = icc_data.chunks(max_chunk).collect();
    let total = chunks.len() as u8;

    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let mut payload = Vec::with_capacity(signatures::ICC.len() + 2 + chunk.len());
            payload.extend_from_slice(signatures::ICC);
            payload.push((i + 1) as u8);
            payload.push(total);
            payload.extend_from_slice(chunk);
            wrap_segment(markers::APP2, &payload)
        })
        .collect()
}

/// Reassemble an ICC profile from a marker list.
///
/// Chunks are ordered by their declared index; returns `None` when no ICC
/// markers are present.
pub fn assemble_icc(marker_list: &MarkerList) -> Option<Bytes> {
    let mut chunks: Vec<(u8, &Marker)> = marker_list
        .iter()
        .filter(|m| m.is_icc())
        .filter(|m| m.data.len() > signatures::ICC.len() + 2)
        .map(|m| (m.data[signatures::ICC.len()], m))
        .collect();

    if chunks.is_empty() {
        return None;
    }
    chunks.sort_by_key(|(index, _)| *index);

    let mut profile = Vec::new();
    for (_, marker) in chunks {
        profile.extend_from_slice(&marker.data[signatures::ICC.len() + 2..]);
    }
    Some(Bytes::from(profile))
}
