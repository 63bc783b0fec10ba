//! Reads and rewrites the resolution (DPI) metadata of JPEG and PNG images.
//!
//! Only the density fields are touched: the JFIF APP0 segment of a JPEG file and the `pHYs`
//! chunk of a PNG file. Everything else, pixel data included, is copied byte for byte.
//!
//! ```no_run
//! use dpimeta::{Dpi, Decoded};
//!
//! let data = std::fs::read("photo.jpg").unwrap();
//! let current = dpimeta::decode_dpi(&data).dpi_or_fallback();
//! println!("stored resolution: {}", current);
//!
//! let rewritten = dpimeta::encode_dpi(&data, Dpi::uniform(300).unwrap()).unwrap();
//! assert!(matches!(dpimeta::decode_dpi(&rewritten), Decoded::Found(_)));
//! ```

pub use crate::generic::*;
pub use crate::traits::*;
pub use crate::types::{
    Decoded, DecodeOptions, Density, DensityUnit, Dpi, Error, Result, Source, SourceKind,
    DISPLAY_FALLBACK_DPI, MAX_DPI,
};
pub use crate::utils::ByteBuffer;

#[macro_use]
mod macros;
mod generic;
mod traits;
mod types;
mod utils;

pub mod formats;
