//! Builders for small but structurally valid JPEG and PNG files.
#![allow(dead_code)]

use crc32fast::Hasher;

/// Entropy-coded bytes, including a stuffed 0xFF00 and a restart marker.
pub const SCAN_DATA: &[u8] = &[0x12, 0xFF, 0x00, 0x34, 0xFF, 0xD0, 0x56, 0x78];

/// Stand-in for compressed pixel data.
pub const IDAT_DATA: &[u8] = &[0x78, 0x9c, 0x63, 0x60, 0x00, 0x00, 0x00, 0x02, 0x00, 0x01];

pub fn segment(marker: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0xFF, marker];
    out.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn jfif_payload(units: u8, x: u16, y: u16) -> Vec<u8> {
    let mut out = b"JFIF\0".to_vec();
    out.extend_from_slice(&[1, 2, units]);
    out.extend_from_slice(&x.to_be_bytes());
    out.extend_from_slice(&y.to_be_bytes());
    out.extend_from_slice(&[0, 0]);
    out
}

pub fn jfif(units: u8, x: u16, y: u16) -> Vec<u8> {
    segment(0xE0, &jfif_payload(units, x, y))
}

pub fn exif() -> Vec<u8> {
    segment(0xE1, b"Exif\0\0MM\0\x2a\0\0\0\x08\0\0")
}

pub fn dqt() -> Vec<u8> {
    let mut payload = vec![0u8];
    payload.extend((1..=64).map(|i| i as u8));
    segment(0xDB, &payload)
}

/// SOI, the given segments, a quantization table, SOS, scan data and EOI.
pub fn jpeg(segments: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![0xFF, 0xD8];
    for s in segments {
        out.extend_from_slice(s);
    }
    out.extend_from_slice(&dqt());
    out.extend_from_slice(&segment(0xDA, &[1, 1, 0, 0, 63, 0]));
    out.extend_from_slice(SCAN_DATA);
    out.extend_from_slice(&[0xFF, 0xD9]);
    out
}

pub fn jpeg_with_jfif(units: u8, x: u16, y: u16) -> Vec<u8> {
    jpeg(&[jfif(units, x, y)])
}

pub fn chunk(chunk_type: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = (payload.len() as u32).to_be_bytes().to_vec();
    out.extend_from_slice(chunk_type);
    out.extend_from_slice(payload);
    let mut hasher = Hasher::new();
    hasher.update(chunk_type);
    hasher.update(payload);
    out.extend_from_slice(&hasher.finalize().to_be_bytes());
    out
}

pub fn phys(x: u32, y: u32, unit: u8) -> Vec<u8> {
    let mut payload = x.to_be_bytes().to_vec();
    payload.extend_from_slice(&y.to_be_bytes());
    payload.push(unit);
    chunk(b"pHYs", &payload)
}

pub fn ihdr() -> Vec<u8> {
    let mut payload = 1u32.to_be_bytes().to_vec();
    payload.extend_from_slice(&1u32.to_be_bytes());
    payload.extend_from_slice(&[8, 2, 0, 0, 0]);
    chunk(b"IHDR", &payload)
}

/// Offset of the first byte after IHDR in files built by `png`.
pub const AFTER_IHDR: usize = 8 + 12 + 13;

/// Signature, IHDR, the given chunks, one IDAT and IEND.
pub fn png(chunks: &[Vec<u8>]) -> Vec<u8> {
    let mut out = b"\x89PNG\r\n\x1a\n".to_vec();
    out.extend_from_slice(&ihdr());
    for c in chunks {
        out.extend_from_slice(c);
    }
    out.extend_from_slice(&chunk(b"IDAT", IDAT_DATA));
    out.extend_from_slice(&chunk(b"IEND", &[]));
    out
}

pub fn png_with_phys(x: u32, y: u32, unit: u8) -> Vec<u8> {
    png(&[chunk(b"tEXt", b"Software\0test"), phys(x, y, unit)])
}

/// Offsets at which two equally long buffers differ.
pub fn diff(a: &[u8], b: &[u8]) -> Vec<usize> {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b).enumerate().filter(|(_, (x, y))| x != y).map(|(i, _)| i).collect()
}
