use std::fmt;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::formats::jpeg::{self, Jpeg};
use crate::formats::png::{self, Png};
use crate::traits::DpiCodec;
use crate::types::{Decoded, DecodeOptions, Dpi, Error, Result};

/// Container format recognized from the leading bytes of a buffer.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Format {
    Jpeg,
    Png,
    Unknown,
}

impl Format {
    pub fn mime_type(&self) -> Option<&'static str> {
        match *self {
            Format::Jpeg => Some(Jpeg::mime_type()),
            Format::Png => Some(Png::mime_type()),
            Format::Unknown => None,
        }
    }

    pub fn extension(&self) -> Option<&'static str> {
        match *self {
            Format::Jpeg => Some("jpg"),
            Format::Png => Some("png"),
            Format::Unknown => None,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            Format::Jpeg => "JPEG",
            Format::Png => "PNG",
            Format::Unknown => "unknown",
        })
    }
}

/// Buffers shorter than this are never decoded.
pub const MIN_DECODABLE_LEN: usize = 8;

/// Identifies the container by its signature. Short buffers are `Unknown`.
pub fn identify(data: &[u8]) -> Format {
    if data.starts_with(png::SIGNATURE) {
        Format::Png
    } else if data.starts_with(&jpeg::SOI_MARKER) {
        Format::Jpeg
    } else {
        Format::Unknown
    }
}

/// Reads the resolution stored in a JPEG or PNG buffer.
///
/// Never fails: structurally broken metadata is reported as `NotFound`, anything which is
/// neither JPEG nor PNG (including buffers shorter than eight bytes) as `Unsupported`.
#[inline]
pub fn decode_dpi(data: &[u8]) -> Decoded {
    decode_dpi_with(data, &DecodeOptions::default())
}

pub fn decode_dpi_with(data: &[u8], options: &DecodeOptions) -> Decoded {
    if data.len() < MIN_DECODABLE_LEN {
        debug!(len = data.len(), "buffer too short to identify");
        return Decoded::Unsupported;
    }

    let result = match identify(data) {
        Format::Jpeg => Jpeg::decode_with(data, options),
        Format::Png => Png::decode_with(data, options),
        Format::Unknown => return Decoded::Unsupported,
    };

    match result {
        Ok(Some(density)) => Decoded::Found(density),
        Ok(None) => Decoded::NotFound,
        Err(e) => {
            debug!(error = %e, "treating unreadable density metadata as absent");
            Decoded::NotFound
        }
    }
}

/// Returns a copy of `data` carrying `target` as its resolution.
///
/// The target is checked before anything else, so an out-of-range value is reported as
/// `ValueOutOfRange` whatever the input is.
pub fn encode_dpi(data: &[u8], target: Dpi) -> Result<Vec<u8>> {
    target.validate()?;
    match identify(data) {
        Format::Jpeg => Jpeg::encode(data, target),
        Format::Png => Png::encode(data, target),
        Format::Unknown => Err(Error::Unsupported),
    }
}

/// Reads a whole file and decodes its resolution. Only I/O failures are errors.
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Decoded> {
    let data = fs::read(path)?;
    Ok(decode_dpi(&data))
}
