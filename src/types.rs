use std::borrow::Cow;
use std::fmt;
use std::io;
use std::result;

use num::ToPrimitive;
use thiserror::Error;

/// The largest density either container can carry for a single axis.
///
/// JFIF stores densities as unsigned 16-bit integers, and the same ceiling is applied to PNG
/// so that both formats accept the same set of targets.
pub const MAX_DPI: u32 = 65535;

/// Resolution callers should assume for display when a file carries no density metadata.
///
/// This is presentation policy only; nothing in this crate ever writes it into a file.
pub const DISPLAY_FALLBACK_DPI: u32 = 72;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported image format")]
    Unsupported,
    #[error("malformed input: {0}")]
    MalformedInput(Cow<'static, str>),
    #[error("value out of range: {value} (allowed 1..={max})")]
    ValueOutOfRange { value: u64, max: u64 },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = result::Result<T, Error>;

/// Horizontal and vertical resolution in pixels per inch.
///
/// `Dpi::new` and the decoders only produce components of at least 1. The fields are public,
/// so the encoders check a target with `validate` before writing it.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Dpi {
    pub horizontal: u32,
    pub vertical: u32,
}

impl Dpi {
    /// Returns `None` if either component is zero.
    #[inline]
    pub fn new(horizontal: u32, vertical: u32) -> Option<Dpi> {
        if horizontal == 0 || vertical == 0 {
            None
        } else {
            Some(Dpi { horizontal, vertical })
        }
    }

    /// Same resolution on both axes, as set by a single "output DPI" value.
    ///
    /// Returns `None` for zero.
    #[inline]
    pub fn uniform(dpi: u32) -> Option<Dpi> {
        Dpi::new(dpi, dpi)
    }

    /// Builds a `Dpi` out of any pair of numbers, e.g. rounded results of unit conversions.
    ///
    /// Returns `None` if a component is negative, zero, or does not fit into `u32`.
    pub fn from_pair<T: ToPrimitive, U: ToPrimitive>(horizontal: T, vertical: U) -> Option<Dpi> {
        Dpi::new(horizontal.to_u32()?, vertical.to_u32()?)
    }

    /// Checks that both components fit into the range accepted by the encoders.
    pub fn validate(&self) -> Result<()> {
        for &value in &[self.horizontal, self.vertical] {
            if value == 0 || value > MAX_DPI {
                return Err(Error::ValueOutOfRange { value: value as u64, max: MAX_DPI as u64 });
            }
        }
        Ok(())
    }

    #[inline]
    pub fn is_uniform(&self) -> bool {
        self.horizontal == self.vertical
    }
}

impl fmt::Display for Dpi {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_uniform() {
            write!(f, "{} DPI", self.horizontal)
        } else {
            write!(f, "{}x{} DPI", self.horizontal, self.vertical)
        }
    }
}

/// Unit the density was stored in before conversion to pixels per inch.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum DensityUnit {
    PixelsPerInch,
    PixelsPerCentimeter,
    PixelsPerMeter,
}

impl fmt::Display for DensityUnit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            DensityUnit::PixelsPerInch => "pixels per inch",
            DensityUnit::PixelsPerCentimeter => "pixels per centimeter",
            DensityUnit::PixelsPerMeter => "pixels per meter",
        })
    }
}

/// Which container structure supplied a density.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SourceKind {
    /// JPEG APP0 segment with the `JFIF\0` identifier.
    JfifApp0,
    /// PNG `pHYs` chunk.
    PngPhys,
}

/// Provenance of a decoded density.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Source {
    pub kind: SourceKind,
    /// Offset of the segment marker or chunk length field within the buffer.
    pub offset: usize,
    pub unit: DensityUnit,
    /// Densities exactly as stored, in `unit`.
    pub raw_x: u32,
    pub raw_y: u32,
}

/// A resolution read from a file together with where it came from.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Density {
    pub dpi: Dpi,
    pub source: Source,
}

/// Outcome of decoding the resolution of an arbitrary buffer.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Decoded {
    Found(Density),
    /// The format is supported but carries no usable density.
    NotFound,
    /// Neither JPEG nor PNG.
    Unsupported,
}

impl Decoded {
    #[inline]
    pub fn density(&self) -> Option<&Density> {
        match *self {
            Decoded::Found(ref d) => Some(d),
            _ => None,
        }
    }

    #[inline]
    pub fn dpi(&self) -> Option<Dpi> {
        self.density().map(|d| d.dpi)
    }

    /// The decoded resolution, or `DISPLAY_FALLBACK_DPI` on both axes.
    pub fn dpi_or_fallback(&self) -> Dpi {
        self.dpi().unwrap_or(Dpi {
            horizontal: DISPLAY_FALLBACK_DPI,
            vertical: DISPLAY_FALLBACK_DPI,
        })
    }
}

/// Options controlling how strictly containers are checked while decoding.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct DecodeOptions {
    /// Reject a `pHYs` chunk whose stored CRC does not match its contents.
    ///
    /// Off by default: a density with a damaged checksum is still reported.
    pub verify_crc: bool,
}

impl DecodeOptions {
    #[inline]
    pub fn strict() -> DecodeOptions {
        DecodeOptions { verify_crc: true }
    }
}
