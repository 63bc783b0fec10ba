//! Resolution stored in the `pHYs` chunk of PNG files.

use std::str;

use arrayvec::ArrayVec;
use byteorder::{BigEndian, ByteOrder};
use crc32fast::Hasher;
use num::ToPrimitive;
use tracing::{debug, trace};

use crate::traits::DpiCodec;
use crate::types::{
    DecodeOptions, Density, DensityUnit, Dpi, Error, Result, Source, SourceKind, MAX_DPI,
};
use crate::utils::{splice, ByteBuffer};

pub const SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

const IHDR: &[u8; 4] = b"IHDR";
const PHYS: &[u8; 4] = b"pHYs";
const IDAT: &[u8; 4] = b"IDAT";
const IEND: &[u8; 4] = b"IEND";

/// Length field, type and CRC surrounding every chunk payload.
const CHUNK_OVERHEAD: usize = 12;
const MAX_CHUNK_LEN: u32 = PNG_U31_MAX;
/// PNG four-byte unsigned integers are limited to 2^31 - 1.
const PNG_U31_MAX: u32 = 0x7fff_ffff;

const PHYS_PAYLOAD_LEN: usize = 9;
pub const PHYS_CHUNK_LEN: usize = PHYS_PAYLOAD_LEN + CHUNK_OVERHEAD;

const UNIT_UNKNOWN: u8 = 0;
const UNIT_METER: u8 = 1;

const INCHES_PER_METER: f64 = 39.3701;

/// A chunk found while walking the stream.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Chunk {
    pub chunk_type: [u8; 4],
    /// Offset of the length field.
    pub offset: usize,
    /// Payload length, not counting the length, type and CRC fields.
    pub length: usize,
    pub payload_offset: usize,
    pub stored_crc: u32,
}

impl Chunk {
    #[inline]
    pub fn is(&self, chunk_type: &[u8; 4]) -> bool {
        &self.chunk_type == chunk_type
    }

    #[inline]
    pub fn type_str(&self) -> Option<&str> {
        str::from_utf8(&self.chunk_type).ok()
    }

    /// Offset of the first byte after this chunk's CRC.
    #[inline]
    pub fn end(&self) -> usize {
        self.offset + CHUNK_OVERHEAD + self.length
    }

    /// Payload bytes of this chunk; empty if `data` is not the buffer it was read from.
    pub fn payload<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        ByteBuffer::new(data)
            .slice(self.payload_offset, self.length)
            .unwrap_or(&[])
    }

    /// CRC-32 of the chunk type and payload as found in `data`.
    pub fn computed_crc(&self, data: &[u8]) -> u32 {
        crc(&self.chunk_type, self.payload(data))
    }

    #[inline]
    pub fn crc_ok(&self, data: &[u8]) -> bool {
        self.computed_crc(data) == self.stored_crc
    }
}

fn crc(chunk_type: &[u8], payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(chunk_type);
    hasher.update(payload);
    hasher.finalize()
}

/// Iterator over the chunks of a PNG stream.
///
/// Iteration ends after IEND or when the buffer ends exactly on a chunk boundary; trailing
/// bytes after IEND are ignored. A chunk running past the end of the buffer is reported once
/// as an error.
pub struct Chunks<'a> {
    buf: ByteBuffer<'a>,
    pos: usize,
    done: bool,
}

/// Starts walking the chunks of `data`, which must begin with the PNG signature.
pub fn chunks(data: &[u8]) -> Result<Chunks<'_>> {
    if !data.starts_with(SIGNATURE) {
        return Err(malformed!("invalid PNG signature"));
    }
    Ok(Chunks { buf: ByteBuffer::new(data), pos: SIGNATURE.len(), done: false })
}

impl<'a> Chunks<'a> {
    fn read_chunk(&mut self) -> Result<Option<Chunk>> {
        let pos = self.pos;
        if pos >= self.buf.len() {
            return Ok(None);
        }

        let length = try_if_eof!(self.buf.u32_at(pos), "when reading chunk length at offset {}", pos);
        if length > MAX_CHUNK_LEN {
            return Err(malformed!("chunk length {} at offset {} is too large", length, pos));
        }
        let length = length as usize;

        let mut chunk_type = [0u8; 4];
        chunk_type.copy_from_slice(try_if_eof!(
            self.buf.slice(pos + 4, 4),
            "when reading chunk type at offset {}", pos
        ));

        let crc_offset = pos + 8 + length;
        let stored_crc = try_if_eof!(
            self.buf.u32_at(crc_offset),
            "when reading {:?} chunk at offset {} ({} bytes declared)",
            String::from_utf8_lossy(&chunk_type), pos, length
        );

        Ok(Some(Chunk { chunk_type, offset: pos, length, payload_offset: pos + 8, stored_crc }))
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Result<Chunk>> {
        if self.done {
            return None;
        }
        match self.read_chunk() {
            Ok(Some(chunk)) => {
                trace!(
                    chunk_type = chunk.type_str().unwrap_or("?"),
                    offset = chunk.offset,
                    length = chunk.length,
                    "PNG chunk"
                );
                if chunk.is(IEND) {
                    self.done = true;
                }
                self.pos = chunk.end();
                Some(Ok(chunk))
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

/// Converts pixels per meter to pixels per inch, `None` if the result is not positive.
pub fn ppm_to_dpi(ppm: u32) -> Option<u32> {
    (ppm as f64 / INCHES_PER_METER).round().to_u32().filter(|&dpi| dpi > 0)
}

/// Converts pixels per inch to the pixels per meter stored in `pHYs`.
pub fn dpi_to_ppm(dpi: u32) -> Result<u32> {
    (dpi as f64 * INCHES_PER_METER)
        .round()
        .to_u32()
        .filter(|&ppm| ppm <= PNG_U31_MAX)
        .ok_or(Error::ValueOutOfRange { value: dpi as u64, max: MAX_DPI as u64 })
}

/// Builds a complete `pHYs` chunk carrying `target` in pixels per meter.
pub fn phys_chunk(target: Dpi) -> Result<ArrayVec<u8, PHYS_CHUNK_LEN>> {
    let mut payload = [0u8; PHYS_PAYLOAD_LEN];
    write_phys_payload(&mut payload, target)?;

    let mut chunk = ArrayVec::new();
    chunk.extend((PHYS_PAYLOAD_LEN as u32).to_be_bytes());
    chunk.extend(PHYS.iter().copied());
    chunk.extend(payload);
    chunk.extend(crc(PHYS, &payload).to_be_bytes());
    Ok(chunk)
}

fn write_phys_payload(payload: &mut [u8], target: Dpi) -> Result<()> {
    let x = dpi_to_ppm(target.horizontal)?;
    let y = dpi_to_ppm(target.vertical)?;
    BigEndian::write_u32(&mut payload[0..4], x);
    BigEndian::write_u32(&mut payload[4..8], y);
    payload[8] = UNIT_METER;
    Ok(())
}

/// Finds the `pHYs` chunk preceding the image data.
pub fn find_phys(data: &[u8]) -> Result<Option<Chunk>> {
    for chunk in chunks(data)? {
        let chunk = chunk?;
        if chunk.is(IDAT) {
            return Ok(None);
        }
        if chunk.is(PHYS) {
            if chunk.length != PHYS_PAYLOAD_LEN {
                return Err(malformed!(
                    "pHYs chunk at offset {} has length {}, expected {}",
                    chunk.offset, chunk.length, PHYS_PAYLOAD_LEN
                ));
            }
            return Ok(Some(chunk));
        }
    }
    Ok(None)
}

/// Checks the CRC of the first `pHYs` chunk in a buffer produced by `Png::encode`.
fn verify_output(out: &[u8]) -> Result<()> {
    match find_phys(out)? {
        Some(chunk) if chunk.crc_ok(out) => Ok(()),
        Some(chunk) => Err(malformed!("CRC mismatch in written pHYs chunk at offset {}", chunk.offset)),
        None => Err(malformed!("written pHYs chunk is missing")),
    }
}

/// PNG codec.
#[derive(Copy, Clone, Debug)]
pub struct Png;

impl DpiCodec for Png {
    #[inline]
    fn mime_type() -> &'static str { "image/png" }

    fn decode_with(data: &[u8], options: &DecodeOptions) -> Result<Option<Density>> {
        let chunk = match find_phys(data)? {
            Some(c) => c,
            None => {
                debug!("no pHYs chunk before image data");
                return Ok(None);
            }
        };

        if options.verify_crc && !chunk.crc_ok(data) {
            return Err(malformed!(
                "CRC mismatch in pHYs chunk at offset {}: stored {:08x}, computed {:08x}",
                chunk.offset, chunk.stored_crc, chunk.computed_crc(data)
            ));
        }

        let payload = ByteBuffer::new(chunk.payload(data));
        let x = try_if_eof!(payload.u32_at(0), "when reading pHYs horizontal density");
        let y = try_if_eof!(payload.u32_at(4), "when reading pHYs vertical density");
        let unit = try_if_eof!(payload.u8_at(8), "when reading pHYs unit");

        match unit {
            UNIT_METER => {}
            UNIT_UNKNOWN => {
                debug!(x, y, "pHYs density is an aspect ratio only");
                return Ok(None);
            }
            other => {
                debug!(unit = other, "unknown pHYs unit");
                return Ok(None);
            }
        }

        let dpi = match (ppm_to_dpi(x), ppm_to_dpi(y)) {
            (Some(h), Some(v)) => Dpi { horizontal: h, vertical: v },
            _ => {
                debug!(x, y, "pHYs density rounds to zero");
                return Ok(None);
            }
        };

        debug!(%dpi, offset = chunk.offset, "found pHYs density");
        Ok(Some(Density {
            dpi,
            source: Source {
                kind: SourceKind::PngPhys,
                offset: chunk.offset,
                unit: DensityUnit::PixelsPerMeter,
                raw_x: x,
                raw_y: y,
            },
        }))
    }

    fn encode(data: &[u8], target: Dpi) -> Result<Vec<u8>> {
        target.validate()?;

        let mut walk = chunks(data)?;
        let ihdr = match walk.next() {
            Some(chunk) => chunk?,
            None => return Err(malformed!("PNG stream has no chunks")),
        };
        if !ihdr.is(IHDR) {
            return Err(malformed!(
                "first chunk is {:?}, expected IHDR", String::from_utf8_lossy(&ihdr.chunk_type)
            ));
        }

        // walk to IEND; a pHYs after IDAT or a second pHYs is refused
        let mut phys = None;
        let mut reached_image_data = false;
        for chunk in walk {
            let chunk = chunk?;
            if chunk.is(IDAT) || chunk.is(IEND) {
                reached_image_data = true;
            }
            if !chunk.is(PHYS) {
                continue;
            }
            if reached_image_data {
                return Err(malformed!("pHYs chunk after image data at offset {}", chunk.offset));
            }
            if phys.is_some() {
                return Err(malformed!("duplicate pHYs chunk at offset {}", chunk.offset));
            }
            if chunk.length != PHYS_PAYLOAD_LEN {
                return Err(malformed!(
                    "pHYs chunk at offset {} has length {}, expected {}",
                    chunk.offset, chunk.length, PHYS_PAYLOAD_LEN
                ));
            }
            phys = Some(chunk);
        }

        let out = match phys {
            Some(chunk) => {
                debug!(offset = chunk.offset, %target, "updating pHYs chunk in place");
                let mut out = data.to_vec();
                let p = chunk.payload_offset;
                write_phys_payload(&mut out[p..p + PHYS_PAYLOAD_LEN], target)?;
                let checksum = crc(PHYS, &out[p..p + PHYS_PAYLOAD_LEN]);
                BigEndian::write_u32(&mut out[p + PHYS_PAYLOAD_LEN..chunk.end()], checksum);
                out
            }
            None => {
                if !reached_image_data {
                    return Err(malformed!("PNG stream ends before any image data"));
                }
                debug!(%target, "inserting pHYs chunk after IHDR");
                let chunk = phys_chunk(target)?;
                splice(data, ihdr.end(), &chunk)
            }
        };

        verify_output(&out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_conversions() {
        assert_eq!(ppm_to_dpi(2835), Some(72));
        assert_eq!(ppm_to_dpi(3780), Some(96));
        assert_eq!(ppm_to_dpi(19), None);
        assert_eq!(dpi_to_ppm(72).unwrap(), 2835);
        assert_eq!(dpi_to_ppm(300).unwrap(), 11811);
        assert_eq!(dpi_to_ppm(MAX_DPI).unwrap(), 2_580_120);
    }

    #[test]
    fn test_ppm_limit_is_png_u31() {
        // 2^31 - 1 pixels per meter is about 54.5 million pixels per inch
        assert!(dpi_to_ppm(54_000_000).unwrap() <= PNG_U31_MAX);
        match dpi_to_ppm(55_000_000) {
            Err(Error::ValueOutOfRange { value: 55_000_000, .. }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_phys_chunk_layout() {
        let chunk = phys_chunk(Dpi::uniform(72).unwrap()).unwrap();
        assert_eq!(chunk.len(), PHYS_CHUNK_LEN);
        assert_eq!(&chunk[..8], b"\x00\x00\x00\x09pHYs");
        assert_eq!(&chunk[8..17], &[0, 0, 0x0b, 0x13, 0, 0, 0x0b, 0x13, 1]);
        assert_eq!(BigEndian::read_u32(&chunk[17..]), crc(b"pHYs", &chunk[8..17]));
    }

    #[test]
    fn test_crc_matches_known_iend() {
        // every PNG ends with the same IEND chunk: 00000000 49454E44 AE426082
        assert_eq!(crc(IEND, &[]), 0xAE42_6082);
    }
}
