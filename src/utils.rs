use byteorder::{BigEndian, ByteOrder};

/// Read-only view over a complete file with bounds-checked big-endian accessors.
///
/// Every accessor returns `None` instead of panicking when the requested range does not
/// lie entirely inside the buffer, so parsers can turn a short read into an error with
/// `try_if_eof!`.
#[derive(Copy, Clone, Debug)]
pub struct ByteBuffer<'a> {
    data: &'a [u8],
}

impl<'a> ByteBuffer<'a> {
    #[inline]
    pub fn new(data: &'a [u8]) -> ByteBuffer<'a> {
        ByteBuffer { data }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether `len` bytes starting at `offset` are all available.
    #[inline]
    pub fn has(&self, offset: usize, len: usize) -> bool {
        self.slice(offset, len).is_some()
    }

    pub fn slice(&self, offset: usize, len: usize) -> Option<&'a [u8]> {
        let end = offset.checked_add(len)?;
        self.data.get(offset..end)
    }

    #[inline]
    pub fn u8_at(&self, offset: usize) -> Option<u8> {
        self.data.get(offset).copied()
    }

    #[inline]
    pub fn u16_at(&self, offset: usize) -> Option<u16> {
        self.slice(offset, 2).map(BigEndian::read_u16)
    }

    #[inline]
    pub fn u32_at(&self, offset: usize) -> Option<u32> {
        self.slice(offset, 4).map(BigEndian::read_u32)
    }
}

/// Copies `src` into a new buffer with `insert` spliced in at `at`.
pub fn splice(src: &[u8], at: usize, insert: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len() + insert.len());
    out.extend_from_slice(&src[..at]);
    out.extend_from_slice(insert);
    out.extend_from_slice(&src[at..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_in_bounds() {
        let b = ByteBuffer::new(&[0x12, 0x34, 0x56, 0x78, 0x9a]);
        assert_eq!(b.u8_at(4), Some(0x9a));
        assert_eq!(b.u16_at(0), Some(0x1234));
        assert_eq!(b.u32_at(1), Some(0x3456789a));
        assert_eq!(b.slice(2, 3), Some(&[0x56, 0x78, 0x9a][..]));
    }

    #[test]
    fn test_reads_out_of_bounds() {
        let b = ByteBuffer::new(&[0x12, 0x34, 0x56]);
        assert_eq!(b.u8_at(3), None);
        assert_eq!(b.u16_at(2), None);
        assert_eq!(b.u32_at(0), None);
        assert_eq!(b.slice(usize::MAX, 2), None);
        assert!(!b.has(1, 3));
        assert!(b.has(3, 0));
    }

    #[test]
    fn test_splice() {
        assert_eq!(splice(&[1, 2, 5], 2, &[3, 4]), vec![1, 2, 3, 4, 5]);
        assert_eq!(splice(&[1], 1, &[2]), vec![1, 2]);
    }
}
