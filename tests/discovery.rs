//! End-to-end gain map discovery scenarios.

mod common;

use std::io::Cursor;

use common::{apple_document, container_document, hdrgm_document, iso_segment, jpeg_with_segments, tiny_jpeg, xmp_segment};
use jpeg_gainmap::jpeg::source::{ImageSource, MemorySource, StreamSource};
use jpeg_gainmap::metadata::iso21496;
use jpeg_gainmap::{
    encode_gainmap_container, find_gainmap_in_bytes, splice_with_mpf, Error, GainmapDecoder,
    GainmapInfo,
};

#[test]
fn test_encode_then_discover_roundtrip() {
    let e = core::f32::consts::E;
    let info = GainmapInfo {
        ratio_max: [e; 3],
        display_ratio_hdr: 4.0,
        ..Default::default()
    };

    let container = encode_gainmap_container(&tiny_jpeg(), &tiny_jpeg(), &info).unwrap();
    let (gainmap_bytes, found) = find_gainmap_in_bytes(container.clone(), None)
        .unwrap()
        .expect("gain map must be discovered");

    // The extracted range is the appended gain map image verbatim.
    assert_eq!(&gainmap_bytes[..], &container[container.len() - gainmap_bytes.len()..]);
    assert_eq!(&gainmap_bytes[..2], &[0xFF, 0xD8]);

    assert!(
        (found.ratio_max[0] - e).abs() / e < 0.01,
        "ratio_max {} != e",
        found.ratio_max[0]
    );
    assert!((found.display_ratio_hdr - 4.0).abs() < 0.05);
}

#[test]
fn test_scheme_priority_iso_wins_over_adobe() {
    // The gain map candidate carries ISO metadata saying ratio 4 and hdrgm
    // XMP saying ratio 2; the base declares both schemes. ISO must win.
    let iso_info = GainmapInfo {
        ratio_max: [4.0; 3],
        display_ratio_hdr: 4.0,
        ..Default::default()
    };
    let gainmap = jpeg_with_segments(&[
        xmp_segment(&hdrgm_document(1.0)), // ratio 2
        iso_segment(&iso21496::serialize(&iso_info)),
    ]);
    let base = jpeg_with_segments(&[
        xmp_segment(&container_document(gainmap.len())),
        iso_segment(&iso21496::serialize_version()),
    ]);
    let container = splice_with_mpf(&base, &gainmap).unwrap();

    let (_, found) = find_gainmap_in_bytes(container, None).unwrap().unwrap();
    assert!(
        (found.ratio_max[0] - 4.0).abs() < 0.05,
        "expected the ISO ratio 4.0, got {}",
        found.ratio_max[0]
    );
}

#[test]
fn test_adobe_scheme_without_iso() {
    // No ISO boxes anywhere; the Adobe scheme applies because the base
    // declares hdrgm.
    let gainmap = jpeg_with_segments(&[xmp_segment(&hdrgm_document(1.0))]);
    let base = jpeg_with_segments(&[xmp_segment(&container_document(gainmap.len()))]);
    let container = splice_with_mpf(&base, &gainmap).unwrap();

    let (_, found) = find_gainmap_in_bytes(container, None).unwrap().unwrap();
    assert!((found.ratio_max[0] - 2.0).abs() < 0.01);
}

#[test]
fn test_adobe_scheme_gated_on_base_declaration() {
    // The candidate carries hdrgm XMP, but the base declares nothing, so
    // no scheme is applicable.
    let gainmap = jpeg_with_segments(&[xmp_segment(&hdrgm_document(1.0))]);
    let base = tiny_jpeg();
    let container = splice_with_mpf(&base, &gainmap).unwrap();

    assert!(find_gainmap_in_bytes(container, None).unwrap().is_none());
}

#[test]
fn test_apple_scheme_requires_headroom() {
    let gainmap = jpeg_with_segments(&[xmp_segment(&apple_document())]);
    let base = tiny_jpeg();
    let container = splice_with_mpf(&base, &gainmap).unwrap();

    // Without EXIF HDR headroom the Apple scheme is not applicable.
    assert!(find_gainmap_in_bytes(container.clone(), None)
        .unwrap()
        .is_none());

    let (_, found) = find_gainmap_in_bytes(container, Some(1.5)).unwrap().unwrap();
    assert!((found.ratio_max[0] - 1.5f32.exp()).abs() < 1e-3);
    assert!((found.display_ratio_hdr - 1.5f32.exp()).abs() < 1e-3);
}

#[test]
fn test_container_directory_fallback_without_mpf() {
    // No MPF directory at all: the gain map is found through the XMP
    // container directory's offset and length.
    let gainmap = jpeg_with_segments(&[xmp_segment(&hdrgm_document(2.0))]);
    let base = jpeg_with_segments(&[xmp_segment(&container_document(gainmap.len()))]);

    let mut container = base.clone();
    container.extend_from_slice(&gainmap);

    let (bytes, found) = find_gainmap_in_bytes(container, None).unwrap().unwrap();
    assert_eq!(&bytes[..], &gainmap[..]);
    assert!((found.ratio_max[0] - 4.0).abs() < 0.05);
}

#[test]
fn test_corrupt_mpf_falls_back_to_container() {
    // Damaging the MPF directory must not abort discovery; the container
    // directory still resolves the gain map.
    let gainmap = jpeg_with_segments(&[xmp_segment(&hdrgm_document(1.0))]);
    let base = jpeg_with_segments(&[xmp_segment(&container_document(gainmap.len()))]);
    let mut container = splice_with_mpf(&base, &gainmap).unwrap();

    // Corrupt the first MPF tag id (unknown tags are a hard parse error).
    let sig_pos = container
        .windows(4)
        .position(|w| w == b"MPF\0")
        .expect("MPF signature present");
    let tag_pos = sig_pos + 4 + 8 + 2;
    container[tag_pos] = 0xAA;

    let (bytes, _) = find_gainmap_in_bytes(container, None).unwrap().unwrap();
    assert_eq!(&bytes[..], &gainmap[..]);
}

#[test]
fn test_inconsistent_locations_reported() {
    // The container directory's declared length disagrees with the MPF
    // entry; discovery must surface the inconsistency instead of picking
    // one silently.
    let gainmap = jpeg_with_segments(&[xmp_segment(&hdrgm_document(1.0))]);
    let base = jpeg_with_segments(&[xmp_segment(&container_document(gainmap.len() + 7))]);
    let container = splice_with_mpf(&base, &gainmap).unwrap();

    match find_gainmap_in_bytes(container, None) {
        Err(Error::InconsistentGainmapLocation {
            mpf_size,
            container_size,
            ..
        }) => {
            assert_eq!(mpf_size, gainmap.len());
            assert_eq!(container_size, gainmap.len() + 7);
        }
        other => panic!("expected an inconsistency error, got {:?}", other.map(|r| r.is_some())),
    }
}

#[test]
fn test_stream_source_matches_memory_source() {
    let info = GainmapInfo {
        ratio_max: [4.0; 3],
        display_ratio_hdr: 4.0,
        ..Default::default()
    };
    let container = encode_gainmap_container(&tiny_jpeg(), &tiny_jpeg(), &info).unwrap();

    let decoder = GainmapDecoder::from_bytes(container.clone()).unwrap();

    let mut memory = MemorySource::new(container.clone());
    let from_memory = decoder.find_gainmap(&mut memory, None).unwrap().unwrap();

    let mut stream = StreamSource::new(Cursor::new(container)).unwrap();
    let from_stream = decoder.find_gainmap(&mut stream, None).unwrap().unwrap();

    assert_eq!(from_memory.0, from_stream.0);
    assert_eq!(from_memory.1, from_stream.1);
}

#[test]
fn test_sources_agree_on_segments() {
    let container =
        encode_gainmap_container(&tiny_jpeg(), &tiny_jpeg(), &GainmapInfo::default()).unwrap();

    let mut memory = MemorySource::new(container.clone());
    let mut stream = StreamSource::new(Cursor::new(container)).unwrap();
    assert_eq!(memory.segments().unwrap(), stream.segments().unwrap());
}
