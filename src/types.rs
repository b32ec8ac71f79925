//! Core types for gain map container metadata.

use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur while reading or writing gain map containers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error from the underlying byte source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The marker segment structure of the stream is invalid.
    #[error("segment scan error: {0}")]
    SegmentScan(String),

    /// Multi-Picture Format parsing failed.
    #[error("MPF parsing error: {0}")]
    MpfParse(String),

    /// XMP metadata parsing failed.
    #[error("XMP parsing error: {0}")]
    XmpParse(String),

    /// ISO 21496-1 metadata parsing failed.
    #[error("ISO 21496-1 parsing error: {0}")]
    IsoParse(String),

    /// Gain map metadata is invalid or malformed.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// Container synthesis failed.
    #[error("encoding error: {0}")]
    Encode(String),

    /// Input exceeds safety limits.
    #[error("input exceeds safety limit: {0}")]
    LimitExceeded(String),

    /// The MPF directory and the XMP container directory both located a
    /// gain map image, but at different positions in the stream.
    #[error(
        "gain map locations disagree: MPF reports offset {mpf_offset} size {mpf_size}, \
         container directory reports offset {container_offset} size {container_size}"
    )]
    InconsistentGainmapLocation {
        /// Absolute offset of the gain map according to the MPF directory.
        mpf_offset: usize,
        /// Size of the gain map according to the MPF directory.
        mpf_size: usize,
        /// Absolute offset according to the XMP container directory.
        container_offset: usize,
        /// Size according to the XMP container directory.
        container_size: usize,
    },
}

/// Result type for gain map container operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Dynamic range of the primary (base) image in the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BaseImageType {
    /// The base image is the SDR rendition; the gain map brightens it.
    #[default]
    Sdr,
    /// The base image is the HDR rendition; the gain map darkens it.
    Hdr,
}

/// Normalized gain map parameters.
///
/// This is the record handed to the rendering layer together with the gain
/// map's encoded bytes. All three detection schemes (ISO 21496-1, Adobe
/// `hdrgm` XMP, Apple `HDRGainMap` XMP) normalize into this shape.
#[derive(Debug, Clone, PartialEq)]
pub struct GainmapInfo {
    /// Minimum HDR/SDR luminance ratio per channel, linear scale.
    pub ratio_min: [f32; 3],
    /// Maximum HDR/SDR luminance ratio per channel, linear scale.
    pub ratio_max: [f32; 3],
    /// Gamma to apply when sampling the stored gain map values.
    pub gamma: [f32; 3],
    /// Offset added to SDR pixel values before computing the ratio.
    pub epsilon_sdr: [f32; 3],
    /// Offset added to HDR pixel values before computing the ratio.
    pub epsilon_hdr: [f32; 3],
    /// Display boost below which the gain map is not applied at all.
    pub display_ratio_sdr: f32,
    /// Display boost at which the gain map is applied completely.
    pub display_ratio_hdr: f32,
    /// Which rendition the base image stores.
    pub base_image_type: BaseImageType,
    /// Whether the gain map is encoded in the base image's color space.
    pub use_base_color_space: bool,
    /// ICC profile of the alternate color space, when one is carried.
    pub alternate_color_icc: Option<Bytes>,
}

impl Default for GainmapInfo {
    fn default() -> Self {
        Self {
            ratio_min: [1.0; 3],
            ratio_max: [1.0; 3],
            gamma: [1.0; 3],
            epsilon_sdr: [1.0 / 64.0; 3],
            epsilon_hdr: [1.0 / 64.0; 3],
            display_ratio_sdr: 1.0,
            display_ratio_hdr: 1.0,
            base_image_type: BaseImageType::Sdr,
            use_base_color_space: true,
            alternate_color_icc: None,
        }
    }
}

impl GainmapInfo {
    /// Check if all channels carry the same parameters.
    ///
    /// Single-channel metadata serializes to the scalar XMP attribute form
    /// and the single-channel ISO payload.
    pub fn is_single_channel(&self) -> bool {
        self.ratio_min[0] == self.ratio_min[1]
            && self.ratio_min[1] == self.ratio_min[2]
            && self.ratio_max[0] == self.ratio_max[1]
            && self.ratio_max[1] == self.ratio_max[2]
            && self.gamma[0] == self.gamma[1]
            && self.gamma[1] == self.gamma[2]
            && self.epsilon_sdr[0] == self.epsilon_sdr[1]
            && self.epsilon_sdr[1] == self.epsilon_sdr[2]
            && self.epsilon_hdr[0] == self.epsilon_hdr[1]
            && self.epsilon_hdr[1] == self.epsilon_hdr[2]
    }

    /// Validate parameter values are within reasonable bounds.
    pub fn validate(&self) -> Result<()> {
        for i in 0..3 {
            if !self.ratio_max[i].is_finite() || self.ratio_max[i] <= 0.0 {
                return Err(Error::InvalidMetadata(format!(
                    "ratio_max[{}] must be positive finite",
                    i
                )));
            }
            if !self.ratio_min[i].is_finite() || self.ratio_min[i] <= 0.0 {
                return Err(Error::InvalidMetadata(format!(
                    "ratio_min[{}] must be positive finite",
                    i
                )));
            }
            if self.ratio_min[i] > self.ratio_max[i] {
                return Err(Error::InvalidMetadata(format!(
                    "ratio_min[{}] ({}) > ratio_max[{}] ({})",
                    i, self.ratio_min[i], i, self.ratio_max[i]
                )));
            }
            if !self.gamma[i].is_finite() || self.gamma[i] <= 0.0 {
                return Err(Error::InvalidMetadata(format!(
                    "gamma[{}] must be positive finite",
                    i
                )));
            }
            if !self.epsilon_sdr[i].is_finite() {
                return Err(Error::InvalidMetadata(format!(
                    "epsilon_sdr[{}] must be finite",
                    i
                )));
            }
            if !self.epsilon_hdr[i].is_finite() {
                return Err(Error::InvalidMetadata(format!(
                    "epsilon_hdr[{}] must be finite",
                    i
                )));
            }
        }

        if !self.display_ratio_sdr.is_finite() || self.display_ratio_sdr < 0.0 {
            return Err(Error::InvalidMetadata(
                "display_ratio_sdr must be non-negative finite".into(),
            ));
        }
        if !self.display_ratio_hdr.is_finite() || self.display_ratio_hdr < 1.0 {
            return Err(Error::InvalidMetadata(
                "display_ratio_hdr must be >= 1.0".into(),
            ));
        }

        Ok(())
    }
}

/// A fraction for ISO 21496-1 metadata encoding.
///
/// ISO 21496-1 stores gain map parameters as signed fractions to preserve
/// precision without floating-point ambiguity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fraction {
    /// The numerator of the fraction.
    pub numerator: i32,
    /// The denominator of the fraction (must be non-zero for valid fractions).
    pub denominator: u32,
}

impl Fraction {
    /// Create a new fraction with the given numerator and denominator.
    pub fn new(numerator: i32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Convert a floating-point value to a fraction.
    ///
    /// Uses a fixed denominator of 1,000,000 for reasonable precision.
    pub fn from_f32(value: f32) -> Self {
        let denominator = 1_000_000u32;
        let numerator = (value * denominator as f32).round() as i32;
        Self {
            numerator,
            denominator,
        }
    }

    /// Convert the fraction to a floating-point value.
    ///
    /// Returns 0.0 if the denominator is zero.
    pub fn to_f32(self) -> f32 {
        if self.denominator == 0 {
            0.0
        } else {
            self.numerator as f32 / self.denominator as f32
        }
    }
}
