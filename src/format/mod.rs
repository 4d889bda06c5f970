//! PCM sample helpers.
//!
//! Sources hand connectors raw bytes; these helpers turn device samples into
//! the 16-bit little-endian layout every built-in source produces.

mod convert;

pub use convert::{f32_to_i16, i16_to_le_bytes, le_bytes_to_i16};
