//! XMP/RDF gain map metadata.
//!
//! A container may carry two XMP documents: the *standard* packet from the
//! first matching APP1 segment, and an *extended* document reassembled from
//! GUID-keyed APP1 chunks. XMP Part 3 calls for recomposing the two into
//! one logical tree; this implementation deliberately keeps them separate
//! and probes them in [`XmpSource`] order, standard first.
//!
//! Three vendor schemas are read through one namespace-matching lookup
//! primitive: Adobe `hdrgm`, Apple `HDRGainMap`, and the Google container
//! directory.

use std::fmt::Write as _;

use md5::{Digest, Md5};
use roxmltree::{Document, Node};

use crate::jpeg::{signatures, MarkerList};
use crate::limits;
use crate::types::{BaseImageType, GainmapInfo};

/// `x:` namespace of the `xmpmeta` root element.
pub const NS_X: &str = "adobe:ns:meta/";
/// `rdf:` namespace.
pub const NS_RDF: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
/// `xmpNote:` namespace carrying the extended XMP GUID reference.
pub const NS_XMP_NOTE: &str = "http://ns.adobe.com/xmp/note/";
/// Adobe HDR gain map namespace.
pub const NS_HDRGM: &str = "http://ns.adobe.com/hdr-gain-map/1.0/";
/// Apple auxiliary image description namespace.
pub const NS_APPLE_PIXEL_DATA: &str = "http://ns.apple.com/pixeldatainfo/1.0/";
/// Apple HDR gain map namespace.
pub const NS_APPLE_HDRGAINMAP: &str = "http://ns.apple.com/HDRGainMap/1.0/";
/// Google container directory namespace.
pub const NS_CONTAINER: &str = "http://ns.google.com/photos/1.0/container/";
/// Google container item namespace.
pub const NS_ITEM: &str = "http://ns.google.com/photos/1.0/container/item/";

const APPLE_AUX_IMAGE_TYPE: &str = "urn:com:apple:photo:2020:aux:hdrgainmap";
const APPLE_HDRGAINMAP_VERSION: u32 = 65536;

const LN_2: f32 = core::f32::consts::LN_2;

/// Size of an extended XMP chunk header: 32 hex GUID characters, a 4-byte
/// full length and a 4-byte chunk offset.
const EXTENDED_HEADER_LEN: usize = 32 + 4 + 4;

/// Which of the two XMP documents a lookup may match.
///
/// Lookups always probe [`XmpSource::Standard`] first, then
/// [`XmpSource::Extended`]; the documents are never merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmpSource {
    /// The packet from the first APP1 segment with the standard signature.
    Standard,
    /// The document reassembled from extended-XMP chunks.
    Extended,
}

/// The XMP documents of one image.
#[derive(Debug, Clone)]
pub struct Xmp {
    standard: String,
    extended: Option<String>,
}

impl Xmp {
    /// Build the XMP documents from an image's marker list.
    ///
    /// Returns `None` when no standard XMP packet is present or its root
    /// element is not `x:xmpmeta`. A damaged extended document (bad GUID,
    /// non-contiguous chunks, failed digest) is discarded while the
    /// standard document stays usable.
    pub fn from_markers(markers: &MarkerList) -> Option<Self> {
        let standard_bytes = markers
            .iter()
            .find(|m| m.is_xmp_standard())
            .and_then(|m| m.payload_after(signatures::XMP_STANDARD))?;
        if standard_bytes.len() > limits::MAX_XMP_LENGTH {
            log::warn!(
                "standard XMP of {} bytes exceeds the {} byte limit",
                standard_bytes.len(),
                limits::MAX_XMP_LENGTH
            );
            return None;
        }
        let standard = String::from_utf8(standard_bytes.to_vec()).ok()?;

        let guid = {
            let doc = match Document::parse(&standard) {
                Ok(doc) => doc,
                Err(_) => return None,
            };
            if !doc.root_element().has_tag_name((NS_X, "xmpmeta")) {
                return None;
            }
            extended_guid(&doc)
        };
        let extended = guid.and_then(|guid| assemble_extended(markers, &guid));

        Some(Self { standard, extended })
    }

    /// The raw text of one of the documents.
    pub fn document_text(&self, source: XmpSource) -> Option<&str> {
        match source {
            XmpSource::Standard => Some(&self.standard),
            XmpSource::Extended => self.extended.as_deref(),
        }
    }

    /// Run a lookup over the documents in probe order.
    fn with_documents<T>(&self, f: impl Fn(&Document) -> Option<T>) -> Option<T> {
        for source in [XmpSource::Standard, XmpSource::Extended] {
            let text = match self.document_text(source) {
                Some(text) => text,
                None => continue,
            };
            let doc = match Document::parse(text) {
                Ok(doc) => doc,
                Err(_) => continue,
            };
            if let Some(value) = f(&doc) {
                return Some(value);
            }
        }
        None
    }

    /// Whether either document declares the Adobe `hdrgm` schema.
    pub fn has_hdrgm(&self) -> bool {
        self.with_documents(|doc| {
            let node = find_description(doc, &[NS_HDRGM])?;
            node_value(node, NS_HDRGM, "Version").map(|_| ())
        })
        .is_some()
    }

    /// Read gain map parameters from the Adobe `hdrgm` schema.
    ///
    /// Ratios and display capacities are log2-encoded in the XMP and are
    /// converted to linear scale; the stored gamma is the reciprocal of the
    /// applied gamma.
    pub fn gainmap_info_hdrgm(&self) -> Option<GainmapInfo> {
        self.with_documents(|doc| {
            let node = find_description(doc, &[NS_HDRGM])?;
            let version = node_value(node, NS_HDRGM, "Version")?;
            if version.trim() != "1.0" {
                return None;
            }

            let gain_map_min = node_vec3(node, NS_HDRGM, "GainMapMin").unwrap_or([0.0; 3]);
            let gain_map_max = node_vec3(node, NS_HDRGM, "GainMapMax").unwrap_or([1.0; 3]);
            let gamma = node_vec3(node, NS_HDRGM, "Gamma").unwrap_or([1.0; 3]);
            let offset_sdr = node_vec3(node, NS_HDRGM, "OffsetSDR").unwrap_or([1.0 / 64.0; 3]);
            let offset_hdr = node_vec3(node, NS_HDRGM, "OffsetHDR").unwrap_or([1.0 / 64.0; 3]);
            let capacity_min = node_f32(node, NS_HDRGM, "HDRCapacityMin").unwrap_or(0.0);
            let capacity_max = node_f32(node, NS_HDRGM, "HDRCapacityMax").unwrap_or_else(|| {
                gain_map_max[0].max(gain_map_max[1]).max(gain_map_max[2])
            });
            let base_is_hdr = node_value(node, NS_HDRGM, "BaseRenditionIsHDR")
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(false);

            let mut info = GainmapInfo::default();
            for i in 0..3 {
                if gamma[i] <= 0.0 {
                    return None;
                }
                info.ratio_min[i] = (gain_map_min[i] * LN_2).exp();
                info.ratio_max[i] = (gain_map_max[i] * LN_2).exp();
                info.gamma[i] = 1.0 / gamma[i];
                info.epsilon_sdr[i] = offset_sdr[i];
                info.epsilon_hdr[i] = offset_hdr[i];
            }
            info.display_ratio_sdr = (capacity_min * LN_2).exp();
            info.display_ratio_hdr = (capacity_max * LN_2).exp();
            info.base_image_type = if base_is_hdr {
                BaseImageType::Hdr
            } else {
                BaseImageType::Sdr
            };
            Some(info)
        })
    }

    /// Read gain map parameters from the Apple `HDRGainMap` schema.
    ///
    /// The schema carries no ratios of its own; the record is built from
    /// fixed defaults scaled by the caller-supplied EXIF HDR headroom
    /// (falling back to `exp(1)` when none is usable).
    pub fn gainmap_info_apple(&self, exif_hdr_headroom: f32) -> Option<GainmapInfo> {
        self.with_documents(|doc| {
            let node = find_description(doc, &[NS_APPLE_PIXEL_DATA, NS_APPLE_HDRGAINMAP])?;
            let aux_type = node_value(node, NS_APPLE_PIXEL_DATA, "AuxiliaryImageType")?;
            if aux_type.trim() != APPLE_AUX_IMAGE_TYPE {
                return None;
            }
            let target = typed_child(node, NS_APPLE_HDRGAINMAP, "HDRGainMap").unwrap_or(node);
            let version: u32 = node_value(target, NS_APPLE_HDRGAINMAP, "HDRGainMapVersion")?
                .trim()
                .parse()
                .ok()?;
            if version != APPLE_HDRGAINMAP_VERSION {
                return None;
            }

            let boost = if exif_hdr_headroom > 0.0 {
                exif_hdr_headroom.exp()
            } else {
                core::f32::consts::E
            };
            Some(GainmapInfo {
                ratio_max: [boost; 3],
                epsilon_sdr: [0.01; 3],
                epsilon_hdr: [0.001; 3],
                display_ratio_hdr: boost,
                ..Default::default()
            })
        })
    }

    /// Walk the Google container directory for the gain map item.
    ///
    /// Returns the gain map's byte offset relative to the end of the
    /// primary image, and its length.
    pub fn container_gainmap_location(&self) -> Option<(usize, usize)> {
        self.with_documents(|doc| {
            let node = find_description(doc, &[NS_CONTAINER, NS_ITEM])?;
            let directory = node
                .children()
                .find(|c| c.has_tag_name((NS_CONTAINER, "Directory")))?;
            let seq = directory
                .children()
                .find(|c| c.has_tag_name((NS_RDF, "Seq")))?;

            let mut offset = 0usize;
            let mut first = true;
            for li in seq.children().filter(|c| c.has_tag_name((NS_RDF, "li"))) {
                let item = li
                    .children()
                    .find(|c| c.has_tag_name((NS_CONTAINER, "Item")))
                    .unwrap_or(li);
                let semantic = node_value(item, NS_ITEM, "Semantic")?;
                let mime = node_value(item, NS_ITEM, "Mime")?;
                if first {
                    first = false;
                    if semantic != "Primary" || mime != "image/jpeg" {
                        return None;
                    }
                    if let Some(padding) = node_value(item, NS_ITEM, "Padding") {
                        let padding: i64 = padding.trim().parse().ok()?;
                        if padding < 0 {
                            return None;
                        }
                        offset += padding as usize;
                    }
                } else {
                    let length: usize = node_value(item, NS_ITEM, "Length")?.trim().parse().ok()?;
                    if semantic == "GainMap" && mime == "image/jpeg" {
                        return Some((offset, length));
                    }
                    offset += length;
                }
            }
            None
        })
    }
}

/// Find the `rdf:Description` node that declares every required namespace.
///
/// The root element must be `x:xmpmeta`; the search covers the
/// `rdf:Description` children of its `rdf:RDF` child.
fn find_description<'a, 'input>(
    doc: &'a Document<'input>,
    uris: &[&str],
) -> Option<Node<'a, 'input>> {
    let root = doc.root_element();
    if !root.has_tag_name((NS_X, "xmpmeta")) {
        return None;
    }
    let rdf = root.children().find(|n| n.has_tag_name((NS_RDF, "RDF")))?;
    rdf.children()
        .filter(|n| n.has_tag_name((NS_RDF, "Description")))
        .find(|n| {
            uris.iter()
                .all(|uri| n.namespaces().any(|ns| ns.uri() == *uri))
        })
}

/// Read a value in either of its two valid encodings: an XML attribute on
/// the node, or a sole child element whose only content is text.
fn node_value(node: Node, uri: &str, name: &str) -> Option<String> {
    if let Some(value) = node.attribute((uri, name)) {
        return Some(value.to_string());
    }

    let mut matches = node.children().filter(|c| c.has_tag_name((uri, name)));
    let child = matches.next()?;
    if matches.next().is_some() {
        return None;
    }
    if child.children().any(|c| c.is_element()) {
        return None;
    }
    child.text().map(|t| t.trim().to_string())
}

/// Read a scalar number.
fn node_f32(node: Node, uri: &str, name: &str) -> Option<f32> {
    node_value(node, uri, name)?.trim().parse().ok()
}

/// Read a per-channel vector: a 3-element `rdf:Seq` of `rdf:li` values is
/// preferred; a scalar broadcasts to all channels.
fn node_vec3(node: Node, uri: &str, name: &str) -> Option<[f32; 3]> {
    let mut elements = node.children().filter(|c| c.has_tag_name((uri, name)));
    let child = elements.next();
    if elements.next().is_some() {
        return None;
    }
    if let Some(child) = child {
        if let Some(seq) = child.children().find(|c| c.has_tag_name((NS_RDF, "Seq"))) {
            let mut values = Vec::with_capacity(3);
            for li in seq.children().filter(|c| c.has_tag_name((NS_RDF, "li"))) {
                values.push(li.text()?.trim().parse::<f32>().ok()?);
            }
            if values.len() == 3 {
                return Some([values[0], values[1], values[2]]);
            }
            return None;
        }
    }

    let value: f32 = node_value(node, uri, name)?.trim().parse().ok()?;
    Some([value; 3])
}

/// Find a typed child node: either an element named `prefix:type`, or the
/// RDF typed-node alternate form of an `rdf:type` child whose
/// `rdf:resource` names the type, paired with a sibling
/// `rdf:value rdf:parseType="Resource"`.
fn typed_child<'a, 'input>(
    node: Node<'a, 'input>,
    uri: &str,
    type_name: &str,
) -> Option<Node<'a, 'input>> {
    if let Some(child) = node.children().find(|c| c.has_tag_name((uri, type_name))) {
        return Some(child);
    }

    let type_node = node.children().find(|c| c.has_tag_name((NS_RDF, "type")))?;
    let resource = type_node.attribute((NS_RDF, "resource"))?;
    if resource != format!("{}{}", uri, type_name) {
        return None;
    }
    let value = node.children().find(|c| c.has_tag_name((NS_RDF, "value")))?;
    if value.attribute((NS_RDF, "parseType")) != Some("Resource") {
        return None;
    }
    Some(value)
}

/// The GUID naming the extended document, declared by the standard
/// document as an `xmpNote:HasExtendedXMP` value.
fn extended_guid(doc: &Document) -> Option<String> {
    let node = find_description(doc, &[NS_XMP_NOTE])?;
    let guid = node_value(node, NS_XMP_NOTE, "HasExtendedXMP")?;
    if guid.len() == 32 && guid.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(guid)
    } else {
        None
    }
}

/// Reassemble the extended document from its APP1 chunks.
///
/// Chunks carrying the expected GUID are sorted by offset and must be
/// contiguous from zero, stay within the declared full length, and hash
/// (MD5) back to the GUID. Any violation discards the whole document.
fn assemble_extended(markers: &MarkerList, guid: &str) -> Option<String> {
    struct Chunk {
        offset: u32,
        full_length: u32,
        data: bytes::Bytes,
    }

    let mut chunks: Vec<Chunk> = Vec::new();
    for marker in markers {
        if !marker.is_xmp_extended() {
            continue;
        }
        let payload = match marker.payload_after(signatures::XMP_EXTENDED) {
            Some(payload) => payload,
            None => continue,
        };
        if payload.len() < EXTENDED_HEADER_LEN {
            log::warn!("extended XMP chunk of {} bytes is truncated", payload.len());
            return None;
        }
        if !payload[..32].eq_ignore_ascii_case(guid.as_bytes()) {
            continue;
        }
        let full_length = u32::from_be_bytes([payload[32], payload[33], payload[34], payload[35]]);
        let offset = u32::from_be_bytes([payload[36], payload[37], payload[38], payload[39]]);
        chunks.push(Chunk {
            offset,
            full_length,
            data: payload.slice(EXTENDED_HEADER_LEN..),
        });
    }
    if chunks.is_empty() {
        return None;
    }

    chunks.sort_by_key(|c| c.offset);
    let full_length = chunks[0].full_length;
    if full_length as usize > limits::MAX_XMP_LENGTH {
        log::warn!(
            "extended XMP declares {} bytes, limit is {}",
            full_length,
            limits::MAX_XMP_LENGTH
        );
        return None;
    }

    let mut assembled = Vec::with_capacity(full_length as usize);
    for chunk in &chunks {
        if chunk.full_length != full_length {
            log::warn!("extended XMP chunks disagree on the full length");
            return None;
        }
        if chunk.offset as usize != assembled.len() {
            log::warn!(
                "extended XMP chunk at offset {} is not contiguous with the {} bytes so far",
                chunk.offset,
                assembled.len()
            );
            return None;
        }
        assembled.extend_from_slice(&chunk.data);
    }
    if assembled.len() > full_length as usize {
        log::warn!(
            "extended XMP reassembled to {} bytes, more than the declared {}",
            assembled.len(),
            full_length
        );
        return None;
    }

    let digest = hex_digest(Md5::digest(&assembled).as_slice());
    if !digest.as_bytes().eq_ignore_ascii_case(guid.as_bytes()) {
        log::warn!("extended XMP digest {} does not match GUID {}", digest, guid);
        return None;
    }

    let text = String::from_utf8(assembled).ok()?;
    {
        let doc = Document::parse(&text).ok()?;
        if !doc.root_element().has_tag_name((NS_X, "xmpmeta")) {
            return None;
        }
    }
    Some(text)
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{:02X}", byte);
    }
    out
}

// ============================================================================
// Writers
// ============================================================================

/// Generate the Adobe `hdrgm` XMP packet for a gain map image.
///
/// Per-channel fields whose channels agree are written in the scalar
/// attribute form; only differing fields get the 3-element `rdf:Seq` child
/// form. Ratios and capacities are written back as log2 values, gamma as
/// its reciprocal.
pub fn generate_hdrgm_xmp(info: &GainmapInfo) -> String {
    let mut attributes = String::new();
    let mut children = String::new();

    let log2 = |v: [f32; 3]| [v[0].log2(), v[1].log2(), v[2].log2()];
    let recip = |v: [f32; 3]| [1.0 / v[0], 1.0 / v[1], 1.0 / v[2]];

    vec_field(&mut attributes, &mut children, "GainMapMin", log2(info.ratio_min));
    vec_field(&mut attributes, &mut children, "GainMapMax", log2(info.ratio_max));
    vec_field(&mut attributes, &mut children, "Gamma", recip(info.gamma));
    vec_field(&mut attributes, &mut children, "OffsetSDR", info.epsilon_sdr);
    vec_field(&mut attributes, &mut children, "OffsetHDR", info.epsilon_hdr);

    let capacity_min = info.display_ratio_sdr.log2();
    let capacity_max = info.display_ratio_hdr.log2();
    let base_is_hdr = match info.base_image_type {
        BaseImageType::Hdr => "True",
        BaseImageType::Sdr => "False",
    };

    format!(
        r#"<?xpacket begin="" id="W5M0MpCehiHzreSzNTczkc9d"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/" x:xmptk="Adobe XMP Core">
  <rdf:RDF xmlns:rdf="{NS_RDF}">
    <rdf:Description rdf:about=""
        xmlns:hdrgm="{NS_HDRGM}"
        hdrgm:Version="1.0"{attributes}
        hdrgm:HDRCapacityMin="{capacity_min:.6}"
        hdrgm:HDRCapacityMax="{capacity_max:.6}"
        hdrgm:BaseRenditionIsHDR="{base_is_hdr}">{children}
    </rdf:Description>
  </rdf:RDF>
</x:xmpmeta>
<?xpacket end="w"?>"#
    )
}

/// Append one per-channel field in scalar attribute or `rdf:Seq` form.
fn vec_field(attributes: &mut String, children: &mut String, name: &str, values: [f32; 3]) {
    if values[0] == values[1] && values[1] == values[2] {
        let _ = write!(attributes, "\n        hdrgm:{}=\"{:.6}\"", name, values[0]);
    } else {
        let _ = write!(
            children,
            "\n      <hdrgm:{name}>\n        <rdf:Seq>\n          <rdf:li>{:.6}</rdf:li>\n          <rdf:li>{:.6}</rdf:li>\n          <rdf:li>{:.6}</rdf:li>\n        </rdf:Seq>\n      </hdrgm:{name}>",
            values[0], values[1], values[2]
        );
    }
}

/// Generate the Google container directory XMP packet for a base image.
///
/// The packet also declares `hdrgm:Version`, which is what gates the Adobe
/// scheme when this image's container is later decoded.
pub fn generate_container_xmp(gainmap_length: usize) -> String {
    format!(
        r#"<?xpacket begin="" id="W5M0MpCehiHzreSzNTczkc9d"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/" x:xmptk="Adobe XMP Core">
  <rdf:RDF xmlns:rdf="{NS_RDF}">
    <rdf:Description rdf:about=""
        xmlns:hdrgm="{NS_HDRGM}"
        xmlns:Container="{NS_CONTAINER}"
        xmlns:Item="{NS_ITEM}"
        hdrgm:Version="1.0">
      <Container:Directory>
        <rdf:Seq>
          <rdf:li rdf:parseType="Resource">
            <Container:Item
                Item:Semantic="Primary"
                Item:Mime="image/jpeg"/>
          </rdf:li>
          <rdf:li rdf:parseType="Resource">
            <Container:Item
                Item:Semantic="GainMap"
                Item:Mime="image/jpeg"
                Item:Length="{gainmap_length}"/>
          </rdf:li>
        </rdf:Seq>
      </Container:Directory>
    </rdf:Description>
  </rdf:RDF>
</x:xmpmeta>
<?xpacket end="w"?>"#
    )
}
