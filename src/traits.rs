use std::fs;
use std::path::Path;

use crate::types::{Result, Density, DecodeOptions, Dpi};

/// Reads and rewrites the resolution stored in one container format.
///
/// Implementations work on complete in-memory files. Decoding returns `Ok(None)` when the
/// file is well-formed but carries no usable density; encoding always returns a fresh buffer
/// and never modifies its input.
pub trait DpiCodec {
    /// MIME type of the container this codec handles.
    fn mime_type() -> &'static str;

    fn decode_with(data: &[u8], options: &DecodeOptions) -> Result<Option<Density>>;

    fn encode(data: &[u8], target: Dpi) -> Result<Vec<u8>>;

    #[inline]
    fn decode(data: &[u8]) -> Result<Option<Density>> {
        Self::decode_with(data, &DecodeOptions::default())
    }

    #[inline]
    fn decode_file<P: AsRef<Path>>(path: P) -> Result<Option<Density>> {
        let data = fs::read(path)?;
        Self::decode(&data)
    }
}
