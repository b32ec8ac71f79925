//! Multi-Picture Format (CIPA DC-007) Index IFD parsing and serialization.
//!
//! The MPF directory lives in an APP2 segment and lists every image bundled
//! in the stream: the primary image plus auxiliaries such as gain maps.
//! Offsets of non-primary images are relative to the MPF endian field, not
//! the start of the file; [`absolute_offset`] translates them.

use crate::jpeg::{markers, signatures};
use crate::limits;
use crate::types::{Error, Result};

// MPF Index IFD tag IDs.
const TAG_VERSION: u16 = 0xB000;
const TAG_NUMBER_OF_IMAGES: u16 = 0xB001;
const TAG_MP_ENTRY: u16 = 0xB002;
const TAG_IMAGE_UID_LIST: u16 = 0xB003;
const TAG_TOTAL_CAPTURED_FRAMES: u16 = 0xB004;

// IFD field types.
const TYPE_LONG: u16 = 4;
const TYPE_UNDEFINED: u16 = 7;

const MPF_VERSION: &[u8; 4] = b"0100";
const ENDIAN_LITTLE: [u8; 4] = [0x49, 0x49, 0x2A, 0x00]; // "II*\0"
const ENDIAN_BIG: [u8; 4] = [0x4D, 0x4D, 0x00, 0x2A]; // "MM\0*"

// MP entry attribute bits 26-24 hold the image data format; 0 is JPEG.
const FORMAT_JPEG: u32 = 0;
const ATTRIBUTE_PRIMARY: u32 = 0x03_0000;
const ATTRIBUTE_DEPENDENT: u32 = 0x00_0000;

/// The tags the parser understands, in required ascending-id order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MpfTag {
    Version,
    NumberOfImages,
    MpEntry,
    ImageUidList,
    TotalCapturedFrames,
}

impl MpfTag {
    fn from_id(id: u16) -> Option<Self> {
        match id {
            TAG_VERSION => Some(Self::Version),
            TAG_NUMBER_OF_IMAGES => Some(Self::NumberOfImages),
            TAG_MP_ENTRY => Some(Self::MpEntry),
            TAG_IMAGE_UID_LIST => Some(Self::ImageUidList),
            TAG_TOTAL_CAPTURED_FRAMES => Some(Self::TotalCapturedFrames),
            _ => None,
        }
    }
}

/// One image listed in the MPF directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpfImage {
    /// Image size in bytes.
    pub size: u32,
    /// Offset relative to the MPF endian field; 0 for the primary image.
    pub data_offset: u32,
}

/// The parsed MPF directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiPictureParams {
    /// All bundled images in directory order; the primary image is first.
    pub images: Vec<MpfImage>,
}

impl MultiPictureParams {
    /// Parse an APP2 parameter payload as an MPF directory.
    ///
    /// Returns `Ok(None)` when the payload does not carry the MPF
    /// signature, and an error when it does but the directory is corrupt.
    pub fn parse(parameters: &[u8]) -> Result<Option<Self>> {
        let data = match parameters.strip_prefix(signatures::MPF) {
            Some(data) => data,
            None => return Ok(None),
        };

        let mut reader = IfdReader::new(data)?;

        let ifd_offset = reader.read_u32()? as usize;
        reader.seek_to(ifd_offset)?;

        let tag_count = reader.read_u16()?;
        let mut previous_id: Option<u16> = None;
        let mut image_count: Option<u32> = None;
        let mut entry_offset: Option<usize> = None;

        for _ in 0..tag_count {
            let id = reader.read_u16()?;
            let _field_type = reader.read_u16()?;
            let count = reader.read_u32()?;
            let value = reader.read_u32()?;

            if let Some(previous) = previous_id {
                if id <= previous {
                    return Err(Error::MpfParse(format!(
                        "tag {:#06x} does not follow {:#06x} in ascending order",
                        id, previous
                    )));
                }
            }
            previous_id = Some(id);

            let tag = MpfTag::from_id(id)
                .ok_or_else(|| Error::MpfParse(format!("unknown tag {:#06x}", id)))?;
            match tag {
                MpfTag::Version | MpfTag::TotalCapturedFrames => {}
                MpfTag::NumberOfImages => {
                    if value == 0 {
                        return Err(Error::MpfParse("image count is zero".into()));
                    }
                    if value as usize > limits::MAX_MPF_IMAGES {
                        return Err(Error::LimitExceeded(format!(
                            "MPF declares {} images, limit is {}",
                            value,
                            limits::MAX_MPF_IMAGES
                        )));
                    }
                    image_count = Some(value);
                }
                MpfTag::MpEntry => {
                    let images = image_count.ok_or_else(|| {
                        Error::MpfParse("MP entry tag precedes the image count".into())
                    })?;
                    if count != 16 * images {
                        return Err(Error::MpfParse(format!(
                            "MP entry array of {} bytes does not match {} images",
                            count, images
                        )));
                    }
                    entry_offset = Some(value as usize);
                }
                MpfTag::ImageUidList => {
                    let images = image_count.ok_or_else(|| {
                        Error::MpfParse("image UID list precedes the image count".into())
                    })?;
                    if count != 33 * images {
                        return Err(Error::MpfParse(format!(
                            "image UID list of {} bytes does not match {} images",
                            count, images
                        )));
                    }
                    // Validated but otherwise unused.
                }
            }
        }

        // The attribute IFD offset follows the tag table; it is not parsed
        // further, but a non-zero value may not point backward.
        let attribute_ifd_offset = reader.read_u32()? as usize;
        if attribute_ifd_offset != 0 && attribute_ifd_offset < reader.position() {
            return Err(Error::MpfParse(format!(
                "attribute IFD offset {} points backward",
                attribute_ifd_offset
            )));
        }

        let image_count =
            image_count.ok_or_else(|| Error::MpfParse("missing image count tag".into()))?;
        let entry_offset =
            entry_offset.ok_or_else(|| Error::MpfParse("missing MP entry tag".into()))?;
        reader.seek_to(entry_offset)?;

        let mut images = Vec::with_capacity(image_count as usize);
        for index in 0..image_count {
            let attribute = reader.read_u32()?;
            let size = reader.read_u32()?;
            let data_offset = reader.read_u32()?;
            let _dependent1 = reader.read_u16()?;
            let _dependent2 = reader.read_u16()?;

            if (attribute >> 24) & 0x7 != FORMAT_JPEG {
                log::warn!(
                    "MPF image {} declares non-JPEG data format (attribute {:#010x})",
                    index,
                    attribute
                );
            }
            if index == 0 && data_offset != 0 {
                return Err(Error::MpfParse(format!(
                    "primary image has non-zero data offset {}",
                    data_offset
                )));
            }
            images.push(MpfImage { size, data_offset });
        }

        Ok(Some(Self { images }))
    }

    /// Serialize the directory into an APP2 parameter payload (signature
    /// included), big-endian, carrying exactly the tags [`Self::parse`]
    /// reads back.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let image_count = self.images.len();
        if image_count == 0 {
            return Err(Error::MpfParse("cannot serialize zero images".into()));
        }
        if image_count > limits::MAX_MPF_IMAGES {
            return Err(Error::LimitExceeded(format!(
                "{} images exceed the {} image limit",
                image_count,
                limits::MAX_MPF_IMAGES
            )));
        }
        if self.images[0].data_offset != 0 {
            return Err(Error::MpfParse(
                "primary image must have data offset zero".into(),
            ));
        }

        let mut out = Vec::with_capacity(serialized_len(image_count));
        out.extend_from_slice(signatures::MPF);
        out.extend_from_slice(&ENDIAN_BIG);
        out.extend_from_slice(&8u32.to_be_bytes()); // Index IFD offset

        out.extend_from_slice(&3u16.to_be_bytes()); // tag count

        // Version, value inline.
        out.extend_from_slice(&TAG_VERSION.to_be_bytes());
        out.extend_from_slice(&TYPE_UNDEFINED.to_be_bytes());
        out.extend_from_slice(&4u32.to_be_bytes());
        out.extend_from_slice(MPF_VERSION);

        // Number of images, value inline.
        out.extend_from_slice(&TAG_NUMBER_OF_IMAGES.to_be_bytes());
        out.extend_from_slice(&TYPE_LONG.to_be_bytes());
        out.extend_from_slice(&1u32.to_be_bytes());
        out.extend_from_slice(&(image_count as u32).to_be_bytes());

        // MP entry array, stored after the IFD.
        let entry_offset = 8 + 2 + 3 * 12 + 4;
        out.extend_from_slice(&TAG_MP_ENTRY.to_be_bytes());
        out.extend_from_slice(&TYPE_UNDEFINED.to_be_bytes());
        out.extend_from_slice(&(16 * image_count as u32).to_be_bytes());
        out.extend_from_slice(&(entry_offset as u32).to_be_bytes());

        out.extend_from_slice(&0u32.to_be_bytes()); // attribute IFD offset

        for (index, image) in self.images.iter().enumerate() {
            let attribute = if index == 0 {
                ATTRIBUTE_PRIMARY
            } else {
                ATTRIBUTE_DEPENDENT
            };
            out.extend_from_slice(&attribute.to_be_bytes());
            out.extend_from_slice(&image.size.to_be_bytes());
            out.extend_from_slice(&image.data_offset.to_be_bytes());
            out.extend_from_slice(&0u16.to_be_bytes());
            out.extend_from_slice(&0u16.to_be_bytes());
        }

        Ok(out)
    }
}

/// Length of [`MultiPictureParams::serialize`] output for `image_count`
/// images. Fixed-width fields make this a closed form, which the encoder
/// relies on to compute offsets before serializing.
pub fn serialized_len(image_count: usize) -> usize {
    signatures::MPF.len() + 4 + 4 + 2 + 3 * 12 + 4 + 16 * image_count
}

/// Translate a non-primary image's MPF-relative data offset into an
/// absolute stream offset, given the stream offset of the MPF segment's
/// marker.
pub fn absolute_offset(data_offset: u32, mpf_segment_offset: usize) -> usize {
    mpf_segment_offset
        + markers::MARKER_CODE_SIZE
        + markers::PARAMETER_LENGTH_SIZE
        + signatures::MPF.len()
        + data_offset as usize
}

/// Cursor over IFD bytes with the endianness declared by the stream.
///
/// Positions are relative to the endian field, matching how MPF offsets are
/// expressed. Seeks may not move backward.
struct IfdReader<'a> {
    data: &'a [u8],
    pos: usize,
    big_endian: bool,
}

impl<'a> IfdReader<'a> {
    fn new(data: &'a [u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::MpfParse("truncated endian field".into()));
        }
        let big_endian = match [data[0], data[1], data[2], data[3]] {
            ENDIAN_BIG => true,
            ENDIAN_LITTLE => false,
            _ => return Err(Error::MpfParse("invalid endian field".into())),
        };
        Ok(Self {
            data,
            pos: 4,
            big_endian,
        })
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn seek_to(&mut self, offset: usize) -> Result<()> {
        if offset < self.pos {
            return Err(Error::MpfParse(format!(
                "offset {} moves backward from position {}",
                offset, self.pos
            )));
        }
        if offset > self.data.len() {
            return Err(Error::MpfParse(format!(
                "offset {} is past the end of the {} byte directory",
                offset,
                self.data.len()
            )));
        }
        self.pos = offset;
        Ok(())
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(count).filter(|&end| end <= self.data.len());
        match end {
            Some(end) => {
                let bytes = &self.data[self.pos..end];
                self.pos = end;
                Ok(bytes)
            }
            None => Err(Error::MpfParse(format!(
                "truncated read of {} bytes at position {}",
                count, self.pos
            ))),
        }
    }

    fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(if self.big_endian {
            u16::from_be_bytes([b[0], b[1]])
        } else {
            u16::from_le_bytes([b[0], b[1]])
        })
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(if self.big_endian {
            u32::from_be_bytes([b[0], b[1], b[2], b[3]])
        } else {
            u32::from_le_bytes([b[0], b[1], b[2], b[3]])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(images: &[(u32, u32)]) -> MultiPictureParams {
        MultiPictureParams {
            images: images
                .iter()
                .map(|&(size, data_offset)| MpfImage { size, data_offset })
                .collect(),
        }
    }

    /// Hand-build a directory in either endianness for invariance tests.
    fn build_directory(big_endian: bool, images: &[(u32, u32)]) -> Vec<u8> {
        let u16b = |v: u16| {
            if big_endian {
                v.to_be_bytes()
            } else {
                v.to_le_bytes()
            }
        };
        let u32b = |v: u32| {
            if big_endian {
                v.to_be_bytes()
            } else {
                v.to_le_bytes()
            }
        };

        let mut out = Vec::new();
        out.extend_from_slice(signatures::MPF);
        out.extend_from_slice(if big_endian {
            &ENDIAN_BIG
        } else {
            &ENDIAN_LITTLE
        });
        out.extend_from_slice(&u32b(8));
        out.extend_from_slice(&u16b(3));

        out.extend_from_slice(&u16b(TAG_VERSION));
        out.extend_from_slice(&u16b(TYPE_UNDEFINED));
        out.extend_from_slice(&u32b(4));
        out.extend_from_slice(MPF_VERSION);

        out.extend_from_slice(&u16b(TAG_NUMBER_OF_IMAGES));
        out.extend_from_slice(&u16b(TYPE_LONG));
        out.extend_from_slice(&u32b(1));
        out.extend_from_slice(&u32b(images.len() as u32));

        out.extend_from_slice(&u16b(TAG_MP_ENTRY));
        out.extend_from_slice(&u16b(TYPE_UNDEFINED));
        out.extend_from_slice(&u32b(16 * images.len() as u32));
        out.extend_from_slice(&u32b(50));

        out.extend_from_slice(&u32b(0));

        for (index, &(size, data_offset)) in images.iter().enumerate() {
            let attribute = if index == 0 { 0x03_0000 } else { 0 };
            out.extend_from_slice(&u32b(attribute));
            out.extend_from_slice(&u32b(size));
            out.extend_from_slice(&u32b(data_offset));
            out.extend_from_slice(&u16b(0));
            out.extend_from_slice(&u16b(0));
        }
        out
    }

    #[test]
    fn test_roundtrip_two_images() {
        let original = params(&[(50_000, 0), (10_000, 49_950)]);
        let serialized = original.serialize().unwrap();
        assert_eq!(serialized.len(), serialized_len(2));
        let parsed = MultiPictureParams::parse(&serialized).unwrap().unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_roundtrip_image_counts() {
        for count in [1usize, 2, 3, 17, 255] {
            let images: Vec<(u32, u32)> = (0..count)
                .map(|i| {
                    let i = i as u32;
                    (1000 + i, if i == 0 { 0 } else { 5000 * i })
                })
                .collect();
            let original = params(&images);
            let parsed = MultiPictureParams::parse(&original.serialize().unwrap())
                .unwrap()
                .unwrap();
            assert_eq!(parsed, original, "roundtrip failed for {} images", count);
        }
    }

    #[test]
    fn test_endian_invariance() {
        let images = [(123_456, 0), (7_890, 123_400)];
        let big = MultiPictureParams::parse(&build_directory(true, &images))
            .unwrap()
            .unwrap();
        let little = MultiPictureParams::parse(&build_directory(false, &images))
            .unwrap()
            .unwrap();
        assert_eq!(big, little);
        assert_eq!(big, params(&images));
    }

    #[test]
    fn test_missing_signature_is_not_mpf() {
        assert!(MultiPictureParams::parse(b"ICC_PROFILE\0xx")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_unknown_tag_fails() {
        let mut data = build_directory(true, &[(100, 0)]);
        // Overwrite the version tag id (first tag, offset 4 sig + 4 endian
        // + 4 ifd offset + 2 count) with an id the parser does not know.
        let tag_pos = signatures::MPF.len() + 10;
        data[tag_pos..tag_pos + 2].copy_from_slice(&0xB00Fu16.to_be_bytes());
        assert!(MultiPictureParams::parse(&data).is_err());
    }

    #[test]
    fn test_descending_tag_order_fails() {
        let mut data = build_directory(true, &[(100, 0)]);
        // Swap the ids of the first two tags so order descends.
        let first = signatures::MPF.len() + 10;
        let second = first + 12;
        data[first..first + 2].copy_from_slice(&TAG_NUMBER_OF_IMAGES.to_be_bytes());
        data[second..second + 2].copy_from_slice(&TAG_VERSION.to_be_bytes());
        assert!(MultiPictureParams::parse(&data).is_err());
    }

    #[test]
    fn test_entry_count_mismatch_fails() {
        let mut data = build_directory(true, &[(100, 0), (200, 300)]);
        // Corrupt the MP entry byte count.
        let count_pos = signatures::MPF.len() + 10 + 2 * 12 + 4;
        data[count_pos..count_pos + 4].copy_from_slice(&31u32.to_be_bytes());
        assert!(MultiPictureParams::parse(&data).is_err());
    }

    #[test]
    fn test_backward_ifd_offset_fails() {
        let mut data = build_directory(true, &[(100, 0)]);
        let offset_pos = signatures::MPF.len() + 4;
        data[offset_pos..offset_pos + 4].copy_from_slice(&2u32.to_be_bytes());
        assert!(MultiPictureParams::parse(&data).is_err());
    }

    #[test]
    fn test_nonzero_primary_offset_fails() {
        let data = build_directory(true, &[(100, 44), (200, 300)]);
        assert!(MultiPictureParams::parse(&data).is_err());
    }

    #[test]
    fn test_truncated_entries_fail() {
        let mut data = build_directory(true, &[(100, 0), (200, 300)]);
        data.truncate(data.len() - 10);
        assert!(MultiPictureParams::parse(&data).is_err());
    }

    #[test]
    fn test_absolute_offset() {
        // marker (2) + length (2) + "MPF\0" (4) = 8 bytes before the
        // endian field the offsets are relative to.
        assert_eq!(absolute_offset(100, 20), 128);
        assert_eq!(absolute_offset(0, 0), 8);
    }

    #[test]
    fn test_serialize_rejects_invalid_directories() {
        assert!(params(&[]).serialize().is_err());
        assert!(params(&[(10, 5)]).serialize().is_err());
    }
}
