//! ISO 21496-1 binary gain map metadata.
//!
//! The standardized alternative to XMP. Base images carry a 4-byte
//! version-only box in APP2; the gain map image's box appends the full
//! parameter payload. Ratios and headrooms are stored log2-encoded as
//! signed fractions.

use crate::types::{BaseImageType, Error, Fraction, GainmapInfo, Result};

/// The minimum reader version this implementation understands.
pub const MINIMUM_VERSION: u16 = 0;

/// The writer version stamped into serialized boxes.
pub const WRITER_VERSION: u16 = 0;

/// Flags byte layout:
/// - Bit 0: multi-channel gain map (0 = single channel)
/// - Bit 1: gain map uses the base image color space
/// - Bit 2: backward direction (base image is HDR)
/// - Bits 3-7: reserved
const FLAG_MULTI_CHANNEL: u8 = 0x01;
const FLAG_USE_BASE_COLOR_SPACE: u8 = 0x02;
const FLAG_BACKWARD_DIRECTION: u8 = 0x04;

/// Check the version prefix of an ISO 21496-1 box.
///
/// This is the gate the discovery priority uses: a base image carrying a
/// box with a supported minimum version declares ISO gain map metadata.
pub fn is_supported_version(data: &[u8]) -> bool {
    data.len() >= 4 && u16::from_be_bytes([data[0], data[1]]) == MINIMUM_VERSION
}

/// Serialize the version-only box carried by base images.
pub fn serialize_version() -> Vec<u8> {
    let mut out = Vec::with_capacity(4);
    out.extend_from_slice(&MINIMUM_VERSION.to_be_bytes());
    out.extend_from_slice(&WRITER_VERSION.to_be_bytes());
    out
}

/// Serialize full gain map metadata (version prefix plus payload).
pub fn serialize(info: &GainmapInfo) -> Vec<u8> {
    let single_channel = info.is_single_channel();
    let backward = info.base_image_type == BaseImageType::Hdr;
    let channels = if single_channel { 1 } else { 3 };

    let mut out = Vec::with_capacity(5 + 16 + channels * 40);
    out.extend_from_slice(&serialize_version());

    let mut flags = 0u8;
    if !single_channel {
        flags |= FLAG_MULTI_CHANNEL;
    }
    if info.use_base_color_space {
        flags |= FLAG_USE_BASE_COLOR_SPACE;
    }
    if backward {
        flags |= FLAG_BACKWARD_DIRECTION;
    }
    out.push(flags);

    write_fraction(&mut out, Fraction::from_f32(info.display_ratio_sdr.log2()));
    write_fraction(&mut out, Fraction::from_f32(info.display_ratio_hdr.log2()));

    // The payload stores base/alternate offsets; when the base image is the
    // HDR rendition those are the HDR/SDR epsilons respectively.
    let (base_epsilon, alternate_epsilon) = if backward {
        (&info.epsilon_hdr, &info.epsilon_sdr)
    } else {
        (&info.epsilon_sdr, &info.epsilon_hdr)
    };

    for i in 0..channels {
        write_fraction(&mut out, Fraction::from_f32(info.ratio_min[i].log2()));
        write_fraction(&mut out, Fraction::from_f32(info.ratio_max[i].log2()));
        write_fraction(&mut out, Fraction::from_f32(info.gamma[i]));
        write_fraction(&mut out, Fraction::from_f32(base_epsilon[i]));
        write_fraction(&mut out, Fraction::from_f32(alternate_epsilon[i]));
    }

    out
}

/// Parse full gain map metadata from an ISO 21496-1 box.
pub fn parse(data: &[u8]) -> Result<GainmapInfo> {
    if data.len() < 4 {
        return Err(Error::IsoParse("metadata too short for version".into()));
    }
    let minimum_version = u16::from_be_bytes([data[0], data[1]]);
    if minimum_version > MINIMUM_VERSION {
        return Err(Error::IsoParse(format!(
            "unsupported minimum version {}",
            minimum_version
        )));
    }
    if data.len() < 5 {
        return Err(Error::IsoParse(
            "version-only box carries no metadata payload".into(),
        ));
    }

    let flags = data[4];
    let multi_channel = flags & FLAG_MULTI_CHANNEL != 0;
    let use_base_color_space = flags & FLAG_USE_BASE_COLOR_SPACE != 0;
    let backward = flags & FLAG_BACKWARD_DIRECTION != 0;
    let channels = if multi_channel { 3 } else { 1 };

    let required = 5 + 16 + channels * 40;
    if data.len() < required {
        return Err(Error::IsoParse(format!(
            "payload of {} bytes is below the {} required",
            data.len(),
            required
        )));
    }

    let mut pos = 5;
    let base_headroom = read_fraction(data, &mut pos)?;
    let alternate_headroom = read_fraction(data, &mut pos)?;

    let mut info = GainmapInfo {
        display_ratio_sdr: 2.0f32.powf(base_headroom.to_f32()),
        display_ratio_hdr: 2.0f32.powf(alternate_headroom.to_f32()),
        use_base_color_space,
        base_image_type: if backward {
            BaseImageType::Hdr
        } else {
            BaseImageType::Sdr
        },
        ..Default::default()
    };

    for i in 0..channels {
        let ratio_min = 2.0f32.powf(read_fraction(data, &mut pos)?.to_f32());
        let ratio_max = 2.0f32.powf(read_fraction(data, &mut pos)?.to_f32());
        let gamma = read_fraction(data, &mut pos)?.to_f32();
        let base_epsilon = read_fraction(data, &mut pos)?.to_f32();
        let alternate_epsilon = read_fraction(data, &mut pos)?.to_f32();

        if multi_channel {
            info.ratio_min[i] = ratio_min;
            info.ratio_max[i] = ratio_max;
            info.gamma[i] = gamma;
            info.epsilon_sdr[i] = base_epsilon;
            info.epsilon_hdr[i] = alternate_epsilon;
        } else {
            info.ratio_min = [ratio_min; 3];
            info.ratio_max = [ratio_max; 3];
            info.gamma = [gamma; 3];
            info.epsilon_sdr = [base_epsilon; 3];
            info.epsilon_hdr = [alternate_epsilon; 3];
        }
    }

    if backward {
        core::mem::swap(&mut info.epsilon_sdr, &mut info.epsilon_hdr);
    }

    Ok(info)
}

fn write_fraction(out: &mut Vec<u8>, fraction: Fraction) {
    out.extend_from_slice(&fraction.numerator.to_be_bytes());
    out.extend_from_slice(&fraction.denominator.to_be_bytes());
}

fn read_fraction(data: &[u8], pos: &mut usize) -> Result<Fraction> {
    if *pos + 8 > data.len() {
        return Err(Error::IsoParse("unexpected end of metadata".into()));
    }
    let numerator = i32::from_be_bytes([data[*pos], data[*pos + 1], data[*pos + 2], data[*pos + 3]]);
    let denominator = u32::from_be_bytes([
        data[*pos + 4],
        data[*pos + 5],
        data[*pos + 6],
        data[*pos + 7],
    ]);
    *pos += 8;
    Ok(Fraction::new(numerator, denominator))
}
