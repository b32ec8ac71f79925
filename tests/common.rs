//! Common test utilities for synthetic container generation.
//!
//! These helpers build structurally valid JPEG byte streams
//! programmatically, avoiding binary test files in the repository. The
//! entropy-coded data is garbage; only the marker structure matters to the
//! metadata subsystem.

#![allow(dead_code)]

use jpeg_gainmap::jpeg::{insert_after_soi, markers, signatures, wrap_segment};

/// A minimal structurally-valid JPEG: SOI, DQT, SOS, entropy data
/// (including a stuffed 0xFF 0x00 pair), EOI.
pub fn tiny_jpeg() -> Vec<u8> {
    let mut data = vec![0xFF, 0xD8];
    data.extend_from_slice(&[0xFF, 0xDB, 0x00, 0x04, 0x00, 0x01]);
    data.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x03, 0x01]);
    data.extend_from_slice(&[0x12, 0x34, 0xFF, 0x00, 0x56, 0x78]);
    data.extend_from_slice(&[0xFF, 0xD9]);
    data
}

/// An APP1 segment carrying a standard XMP packet.
pub fn xmp_segment(document: &str) -> Vec<u8> {
    let mut payload = signatures::XMP_STANDARD.to_vec();
    payload.extend_from_slice(document.as_bytes());
    wrap_segment(markers::APP1, &payload).unwrap()
}

/// An APP2 segment carrying an ISO 21496-1 box.
pub fn iso_segment(box_bytes: &[u8]) -> Vec<u8> {
    let mut payload = signatures::ISO21496.to_vec();
    payload.extend_from_slice(box_bytes);
    wrap_segment(markers::APP2, &payload).unwrap()
}

/// An APP15 segment carrying a legacy gain map box.
pub fn legacy_gainmap_segment(box_bytes: &[u8]) -> Vec<u8> {
    let mut payload = signatures::LEGACY_GAINMAP.to_vec();
    payload.extend_from_slice(box_bytes);
    wrap_segment(markers::APP15, &payload).unwrap()
}

/// A JPEG with extra segments spliced in after SOI.
pub fn jpeg_with_segments(segments: &[Vec<u8>]) -> Vec<u8> {
    insert_after_soi(&tiny_jpeg(), segments).unwrap()
}

/// An XMP document declaring the Adobe hdrgm schema with the given
/// log2-encoded maximum ratio.
pub fn hdrgm_document(gain_map_max_log2: f32) -> String {
    format!(
        r#"<x:xmpmeta xmlns:x="adobe:ns:meta/">
  <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
    <rdf:Description rdf:about=""
        xmlns:hdrgm="http://ns.adobe.com/hdr-gain-map/1.0/"
        hdrgm:Version="1.0"
        hdrgm:GainMapMax="{gain_map_max_log2:.6}"
        hdrgm:HDRCapacityMax="{gain_map_max_log2:.6}"/>
  </rdf:RDF>
</x:xmpmeta>"#
    )
}

/// An XMP document declaring the Apple HDRGainMap schema.
pub fn apple_document() -> String {
    r#"<x:xmpmeta xmlns:x="adobe:ns:meta/">
  <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
    <rdf:Description rdf:about=""
        xmlns:apdi="http://ns.apple.com/pixeldatainfo/1.0/"
        xmlns:HDRGainMap="http://ns.apple.com/HDRGainMap/1.0/"
        apdi:AuxiliaryImageType="urn:com:apple:photo:2020:aux:hdrgainmap"
        HDRGainMap:HDRGainMapVersion="65536"/>
  </rdf:RDF>
</x:xmpmeta>"#
        .to_string()
}

/// An XMP document combining a container directory (gain map at the given
/// length, directly after the primary image) with an hdrgm declaration.
pub fn container_document(gainmap_length: usize) -> String {
    format!(
        r#"<x:xmpmeta xmlns:x="adobe:ns:meta/">
  <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
    <rdf:Description rdf:about=""
        xmlns:hdrgm="http://ns.adobe.com/hdr-gain-map/1.0/"
        xmlns:Container="http://ns.google.com/photos/1.0/container/"
        xmlns:Item="http://ns.google.com/photos/1.0/container/item/"
        hdrgm:Version="1.0">
      <Container:Directory>
        <rdf:Seq>
          <rdf:li rdf:parseType="Resource">
            <Container:Item Item:Semantic="Primary" Item:Mime="image/jpeg"/>
          </rdf:li>
          <rdf:li rdf:parseType="Resource">
            <Container:Item Item:Semantic="GainMap" Item:Mime="image/jpeg"
                Item:Length="{gainmap_length}"/>
          </rdf:li>
        </rdf:Seq>
      </Container:Directory>
    </rdf:Description>
  </rdf:RDF>
</x:xmpmeta>"#
    )
}
