//! Gain map metadata formats.
//!
//! Three independent micro-formats describe where a gain map lives and how
//! to apply it: the binary MPF image directory, XMP/RDF vendor schemas,
//! and the ISO 21496-1 binary box.

pub mod iso21496;
pub mod mpf;
pub mod xmp;
