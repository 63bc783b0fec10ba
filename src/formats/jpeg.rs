//! Resolution stored in the JFIF APP0 segment of JPEG files.
//!
//! A JPEG file is a sequence of marker segments. Every marker is `0xFF` followed by a code
//! byte; most markers are followed by a big-endian 16-bit length which counts itself but not
//! the marker. The density lives in the APP0 segment whose payload starts with `JFIF\0`:
//!
//! ```text
//! offset  size  field
//!      0     5  identifier "JFIF\0"
//!      5     2  version (major, minor)
//!      7     1  density units: 0 = aspect ratio only, 1 = per inch, 2 = per centimeter
//!      8     2  horizontal density
//!     10     2  vertical density
//!     12     2  thumbnail width and height
//! ```

use arrayvec::ArrayVec;
use byteorder::{BigEndian, ByteOrder};
use tracing::{debug, trace};

use crate::traits::DpiCodec;
use crate::types::{
    DecodeOptions, Density, DensityUnit, Dpi, Error, Result, Source, SourceKind, MAX_DPI,
};
use crate::utils::{splice, ByteBuffer};

pub const SOI_MARKER: [u8; 2] = [0xFF, SOI];

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const APP0: u8 = 0xE0;
const TEM: u8 = 0x01;
const RST0: u8 = 0xD0;
const RST7: u8 = 0xD7;

const JFIF_IDENTIFIER: &[u8] = b"JFIF\0";
const UNITS_OFFSET: usize = 7;
const X_DENSITY_OFFSET: usize = 8;
const Y_DENSITY_OFFSET: usize = 10;
/// Payload bytes needed to reach the end of the vertical density.
const JFIF_DENSITY_END: usize = 12;

const UNITS_NONE: u8 = 0;
const UNITS_INCH: u8 = 1;
const UNITS_CENTIMETER: u8 = 2;

/// Marker, length field and the canonical 14-byte JFIF 1.01 payload without thumbnail.
pub const JFIF_SEGMENT_LEN: usize = 18;

const CM_PER_INCH: f64 = 2.54;

/// Human-readable name of a marker code.
pub fn marker_name(marker: u8) -> &'static str {
    match marker {
        TEM => "TEM",
        0xC0 => "SOF0",
        0xC1 => "SOF1",
        0xC2 => "SOF2",
        0xC4 => "DHT",
        0xCC => "DAC",
        RST0..=RST7 => "RST",
        SOI => "SOI",
        EOI => "EOI",
        SOS => "SOS",
        0xDB => "DQT",
        0xDD => "DRI",
        APP0 => "APP0",
        0xE1 => "APP1",
        0xE2 => "APP2",
        0xED => "APP13",
        0xEE => "APP14",
        0xE3..=0xEF => "APPn",
        0xFE => "COM",
        _ => "OTHER",
    }
}

/// Markers which are not followed by a length field.
#[inline]
fn is_standalone(marker: u8) -> bool {
    matches!(marker, TEM | RST0..=RST7 | SOI | EOI)
}

/// A marker segment found while walking the stream.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Segment {
    /// Marker code, the byte following `0xFF`.
    pub marker: u8,
    /// Offset of the `0xFF` byte directly preceding the code.
    pub offset: usize,
    /// Value of the length field; 0 for standalone markers.
    pub length: usize,
    pub payload_offset: usize,
}

impl Segment {
    #[inline]
    pub fn has_length(&self) -> bool {
        !is_standalone(self.marker)
    }

    #[inline]
    pub fn payload_len(&self) -> usize {
        self.length.saturating_sub(2)
    }

    /// Offset of the first byte after this segment.
    #[inline]
    pub fn end(&self) -> usize {
        self.payload_offset + self.payload_len()
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        marker_name(self.marker)
    }

    /// Payload bytes of this segment; empty if `data` is not the buffer it was read from.
    pub fn payload<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        ByteBuffer::new(data)
            .slice(self.payload_offset, self.payload_len())
            .unwrap_or(&[])
    }

    fn is_jfif(&self, data: &[u8]) -> bool {
        self.marker == APP0 && self.payload(data).starts_with(JFIF_IDENTIFIER)
    }
}

/// Iterator over the marker segments preceding the entropy-coded image data.
///
/// Iteration ends after the SOS segment or after a standalone marker, since neither can be
/// skipped without decoding the scan, and also when the buffer ends exactly on a segment
/// boundary. A truncated or invalid segment header is reported once as an error.
pub struct Segments<'a> {
    buf: ByteBuffer<'a>,
    pos: usize,
    done: bool,
    terminator: Option<u8>,
}

/// Starts walking the segments of `data`, which must begin with SOI.
pub fn segments(data: &[u8]) -> Result<Segments<'_>> {
    if !data.starts_with(&SOI_MARKER) {
        return Err(malformed!("missing JPEG start-of-image marker"));
    }
    Ok(Segments {
        buf: ByteBuffer::new(data),
        pos: SOI_MARKER.len(),
        done: false,
        terminator: None,
    })
}

impl<'a> Segments<'a> {
    /// The SOS or standalone marker that ended the walk, if any.
    #[inline]
    pub fn terminator(&self) -> Option<u8> {
        self.terminator
    }

    fn read_segment(&mut self) -> Result<Option<Segment>> {
        let mut pos = self.pos;
        let lead = match self.buf.u8_at(pos) {
            Some(b) => b,
            None => return Ok(None),
        };
        if lead != 0xFF {
            return Err(malformed!("expected a marker at offset {}, found 0x{:02x}", pos, lead));
        }

        let mut marker = try_if_eof!(self.buf.u8_at(pos + 1), "when reading marker at offset {}", pos);
        // any number of 0xFF fill bytes may precede the marker code
        while marker == 0xFF {
            pos += 1;
            marker = try_if_eof!(self.buf.u8_at(pos + 1), "when reading marker at offset {}", pos);
        }
        if marker == 0x00 {
            return Err(malformed!("invalid marker 0xff00 at offset {}", pos));
        }

        if is_standalone(marker) {
            return Ok(Some(Segment { marker, offset: pos, length: 0, payload_offset: pos + 2 }));
        }

        let length = try_if_eof!(
            self.buf.u16_at(pos + 2),
            "when reading length of {} segment at offset {}", marker_name(marker), pos
        ) as usize;
        if length < 2 {
            return Err(malformed!(
                "invalid length {} of {} segment at offset {}", length, marker_name(marker), pos
            ));
        }
        if !self.buf.has(pos + 2, length) {
            return Err(unexpected_eof!(
                "when reading {} segment at offset {} ({} bytes declared)",
                marker_name(marker), pos, length
            ));
        }

        Ok(Some(Segment { marker, offset: pos, length, payload_offset: pos + 4 }))
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = Result<Segment>;

    fn next(&mut self) -> Option<Result<Segment>> {
        if self.done {
            return None;
        }
        match self.read_segment() {
            Ok(Some(segment)) => {
                trace!(
                    marker = segment.name(),
                    offset = segment.offset,
                    length = segment.length,
                    "JPEG segment"
                );
                if segment.marker == SOS || !segment.has_length() {
                    self.done = true;
                    self.terminator = Some(segment.marker);
                }
                self.pos = segment.end();
                Some(Ok(segment))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Walks to the first JFIF APP0 segment, also returning the marker which ended the walk
/// when there is none.
fn scan(data: &[u8]) -> Result<(Option<Segment>, Option<u8>)> {
    let mut walk = segments(data)?;
    for segment in &mut walk {
        let segment = segment?;
        if segment.is_jfif(data) {
            if segment.payload_len() < JFIF_DENSITY_END {
                return Err(malformed!(
                    "JFIF segment at offset {} is too short: {} bytes",
                    segment.offset, segment.payload_len()
                ));
            }
            return Ok((Some(segment), None));
        }
        if segment.marker == APP0 {
            debug!(offset = segment.offset, "skipping non-JFIF APP0 segment");
        }
    }
    Ok((None, walk.terminator()))
}

/// Finds the first JFIF APP0 segment before the image data.
///
/// A JFIF segment too short to hold both densities is an error; APP0 segments with other
/// identifiers are skipped.
pub fn find_jfif(data: &[u8]) -> Result<Option<Segment>> {
    scan(data).map(|(segment, _)| segment)
}

fn density_field(value: u32) -> Result<u16> {
    u16::try_from(value)
        .map_err(|_| Error::ValueOutOfRange { value: value as u64, max: MAX_DPI as u64 })
}

/// Builds a complete APP0 segment carrying `target` in pixels per inch.
pub fn jfif_segment(target: Dpi) -> Result<ArrayVec<u8, JFIF_SEGMENT_LEN>> {
    Ok(build_jfif_segment(density_field(target.horizontal)?, density_field(target.vertical)?))
}

fn build_jfif_segment(x: u16, y: u16) -> ArrayVec<u8, JFIF_SEGMENT_LEN> {
    let mut segment = ArrayVec::new();
    segment.extend([0xFF, APP0]);
    segment.extend((JFIF_SEGMENT_LEN as u16 - 2).to_be_bytes());
    segment.extend(JFIF_IDENTIFIER.iter().copied());
    segment.extend([1, 1, UNITS_INCH]);
    segment.extend(x.to_be_bytes());
    segment.extend(y.to_be_bytes());
    segment.extend([0, 0]);
    segment
}

/// JPEG/JFIF codec.
#[derive(Copy, Clone, Debug)]
pub struct Jpeg;

impl DpiCodec for Jpeg {
    #[inline]
    fn mime_type() -> &'static str { "image/jpeg" }

    fn decode_with(data: &[u8], _options: &DecodeOptions) -> Result<Option<Density>> {
        let segment = match find_jfif(data)? {
            Some(s) => s,
            None => {
                debug!("no JFIF segment before image data");
                return Ok(None);
            }
        };

        let payload = ByteBuffer::new(segment.payload(data));
        let units = try_if_eof!(payload.u8_at(UNITS_OFFSET), "when reading JFIF density units");
        let x = try_if_eof!(payload.u16_at(X_DENSITY_OFFSET), "when reading JFIF horizontal density");
        let y = try_if_eof!(payload.u16_at(Y_DENSITY_OFFSET), "when reading JFIF vertical density");

        let (dpi, unit) = match units {
            UNITS_INCH => (Dpi::new(x as u32, y as u32), DensityUnit::PixelsPerInch),
            UNITS_CENTIMETER => (
                Dpi::from_pair((x as f64 * CM_PER_INCH).round(), (y as f64 * CM_PER_INCH).round()),
                DensityUnit::PixelsPerCentimeter,
            ),
            UNITS_NONE => {
                debug!(x, y, "JFIF density is an aspect ratio only");
                return Ok(None);
            }
            other => {
                debug!(units = other, "unknown JFIF density units");
                return Ok(None);
            }
        };

        let dpi = match dpi {
            Some(dpi) => dpi,
            None => {
                debug!(x, y, "JFIF density has a zero component");
                return Ok(None);
            }
        };

        debug!(%dpi, offset = segment.offset, "found JFIF density");
        Ok(Some(Density {
            dpi,
            source: Source {
                kind: SourceKind::JfifApp0,
                offset: segment.offset,
                unit,
                raw_x: x as u32,
                raw_y: y as u32,
            },
        }))
    }

    fn encode(data: &[u8], target: Dpi) -> Result<Vec<u8>> {
        // rejects zero components; the upper bound is the u16 conversion below
        target.validate()?;
        let (x, y) = (density_field(target.horizontal)?, density_field(target.vertical)?);

        let (jfif, terminator) = scan(data)?;

        match jfif {
            Some(segment) => {
                debug!(offset = segment.offset, %target, "updating JFIF density in place");
                let mut out = data.to_vec();
                let p = segment.payload_offset;
                out[p + UNITS_OFFSET] = UNITS_INCH;
                BigEndian::write_u16(&mut out[p + X_DENSITY_OFFSET..p + X_DENSITY_OFFSET + 2], x);
                BigEndian::write_u16(&mut out[p + Y_DENSITY_OFFSET..p + Y_DENSITY_OFFSET + 2], y);
                Ok(out)
            }
            None => {
                if terminator.is_none() {
                    return Err(malformed!("JPEG stream ends before any image data"));
                }
                debug!(%target, "inserting JFIF segment after SOI");
                Ok(splice(data, SOI_MARKER.len(), &build_jfif_segment(x, y)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_segment_layout() {
        let segment = jfif_segment(Dpi::new(300, 150).unwrap()).unwrap();
        assert_eq!(
            &segment[..],
            &[
                0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0x01, 0x01,
                0x01, 0x2C, 0x00, 0x96, 0x00, 0x00,
            ][..]
        );
    }

    #[test]
    fn test_canonical_segment_rejects_wide_density() {
        match jfif_segment(Dpi::new(70000, 72).unwrap()) {
            Err(Error::ValueOutOfRange { value: 70000, max: 65535 }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(&jfif_segment(Dpi::uniform(65535).unwrap()).unwrap()[12..16], &[0xFF; 4]);
    }

    #[test]
    fn test_standalone_markers() {
        assert!(is_standalone(0xD8));
        assert!(is_standalone(0xD3));
        assert!(is_standalone(0x01));
        assert!(!is_standalone(0xDA));
        assert!(!is_standalone(0xE0));
    }

    #[test]
    fn test_walk_skips_fill_bytes() {
        let data = [0xFF, 0xD8, 0xFF, 0xFF, 0xFE, 0x00, 0x03, 0x41, 0xFF, 0xD9];
        let found: Vec<_> = segments(&data).unwrap().map(|s| s.unwrap()).collect();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0], Segment { marker: 0xFE, offset: 3, length: 3, payload_offset: 7 });
        assert_eq!(found[1].marker, EOI);
    }

    #[test]
    fn test_walk_reports_garbage_once() {
        let data = [0xFF, 0xD8, 0x12, 0x34];
        let mut walk = segments(&data).unwrap();
        assert!(walk.next().unwrap().is_err());
        assert!(walk.next().is_none());
    }
}
