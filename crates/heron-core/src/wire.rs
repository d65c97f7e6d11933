//! Big-endian framing shared by the snapshot formats.

use crate::Error;

pub fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Write `bytes` prefixed with their length as a `u32`.
pub fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> error_stack::Result<(), Error> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| error_stack::report!(Error::TooLarge(bytes.len())))?;
    put_u32(out, len);
    out.extend_from_slice(bytes);
    Ok(())
}

/// Reads big-endian values from a byte slice, tracking the position.
#[derive(Debug)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    /// Create a reader positioned at `position`.
    pub fn at(bytes: &'a [u8], position: usize) -> error_stack::Result<Self, Error> {
        error_stack::ensure!(
            position <= bytes.len(),
            Error::Truncated {
                position,
                needed: 0,
                len: bytes.len(),
            }
        );
        Ok(Self { bytes, position })
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn take(&mut self, needed: usize) -> error_stack::Result<&'a [u8], Error> {
        error_stack::ensure!(
            needed <= self.remaining(),
            Error::Truncated {
                position: self.position,
                needed,
                len: self.bytes.len(),
            }
        );
        let bytes = self.bytes;
        let slice = &bytes[self.position..self.position + needed];
        self.position += needed;
        Ok(slice)
    }

    pub fn u16(&mut self) -> error_stack::Result<u16, Error> {
        let mut buf = [0u8; 2];
        buf.copy_from_slice(self.take(2)?);
        Ok(u16::from_be_bytes(buf))
    }

    pub fn u32(&mut self) -> error_stack::Result<u32, Error> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(buf))
    }

    /// Read bytes prefixed with their length, as written by [put_bytes].
    pub fn bytes(&mut self) -> error_stack::Result<&'a [u8], Error> {
        let len = self.u32()? as usize;
        self.take(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_back() {
        let mut out = Vec::new();
        put_u16(&mut out, 0xBEEF);
        put_u32(&mut out, 7);
        put_bytes(&mut out, b"abc").unwrap();
        assert_eq!(&out[..2], &[0xBE, 0xEF]);

        let mut reader = ByteReader::new(&out);
        assert_eq!(reader.u16().unwrap(), 0xBEEF);
        assert_eq!(reader.u32().unwrap(), 7);
        assert_eq!(reader.bytes().unwrap(), b"abc");
        assert!(reader.is_empty());
    }

    #[test]
    fn test_truncated() {
        let mut out = Vec::new();
        put_u32(&mut out, 10);
        out.extend_from_slice(b"short");

        let mut reader = ByteReader::new(&out);
        let err = reader.bytes().unwrap_err();
        assert!(matches!(
            err.current_context(),
            Error::Truncated {
                position: 4,
                needed: 10,
                len: 9
            }
        ));

        assert!(ByteReader::at(&out, 10).is_err());
        assert_eq!(ByteReader::at(&out, 9).unwrap().remaining(), 0);
    }
}
