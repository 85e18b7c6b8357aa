//! Fixed-width byte encoding and a cursor-based reader for packet payloads
//!
//! Integers are little-endian; strings are UTF-8 followed by a single
//! terminator byte (`\0` unless a packet type overrides it). Both peers must
//! use the same conventions, so everything here is the single source of
//! truth for field-level wire layout.

use thiserror::Error;

/// Terminator byte appended after string fields unless a caller overrides it.
pub const STRING_TERMINATOR: u8 = 0;

/// Errors produced while decoding payload fields.
///
/// Decoding failures are soft: the packet registry converts them into the
/// empty-packet sentinel rather than propagating them to I/O code.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("read of {wanted} byte(s) at index {index} past end of buffer (len {len})")]
    OutOfBounds {
        index: usize,
        wanted: usize,
        len: usize,
    },
    #[error("no terminator byte {terminator:#04x} before end of buffer")]
    MissingTerminator { terminator: u8 },
    #[error("string field is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("packet type \"{0}\" is not registered")]
    UnknownType(String),
}

/// Appends a bool as a single `0`/`1` byte.
pub fn put_bool(out: &mut Vec<u8>, value: bool) {
    out.push(u8::from(value));
}

/// Appends an i32 as 4 little-endian bytes.
pub fn put_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Appends a string as UTF-8 bytes plus the default terminator.
pub fn put_str(out: &mut Vec<u8>, value: &str) {
    put_str_with(out, value, STRING_TERMINATOR);
}

/// Appends a string as UTF-8 bytes plus a custom terminator byte.
pub fn put_str_with(out: &mut Vec<u8>, value: &str, terminator: u8) {
    out.extend_from_slice(value.as_bytes());
    out.push(terminator);
}

/// Cursor over a byte buffer that advances past each decoded field.
#[derive(Debug)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    index: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, index: 0 }
    }

    /// Current cursor position.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Bytes left between the cursor and the end of the buffer.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.index)
    }

    fn take(&mut self, wanted: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < wanted {
            return Err(CodecError::OutOfBounds {
                index: self.index,
                wanted,
                len: self.buf.len(),
            });
        }
        let slice = &self.buf[self.index..self.index + wanted];
        self.index += wanted;
        Ok(slice)
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.take(1)?[0] != 0)
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads a string terminated by the default terminator byte.
    pub fn read_str(&mut self) -> Result<String, CodecError> {
        self.read_str_with(STRING_TERMINATOR)
    }

    /// Reads a string up to (not including) `terminator`, consuming the
    /// terminator as well. Fails if the buffer ends before one is found.
    pub fn read_str_with(&mut self, terminator: u8) -> Result<String, CodecError> {
        let rest = &self.buf[self.index..];
        let end = rest
            .iter()
            .position(|&b| b == terminator)
            .ok_or(CodecError::MissingTerminator { terminator })?;
        let text = String::from_utf8(rest[..end].to_vec())?;
        self.index += end + 1;
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_roundtrip() {
        let mut buf = Vec::new();
        put_bool(&mut buf, true);
        put_bool(&mut buf, false);
        assert_eq!(buf, vec![1, 0]);

        let mut reader = ByteReader::new(&buf);
        assert!(reader.read_bool().unwrap());
        assert!(!reader.read_bool().unwrap());
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_i32_little_endian_layout() {
        let mut buf = Vec::new();
        put_i32(&mut buf, 0x0403_0201);
        assert_eq!(buf, vec![0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_i32_boundary_values() {
        for value in [0, 1, -1, i32::MIN, i32::MAX] {
            let mut buf = Vec::new();
            put_i32(&mut buf, value);
            let mut reader = ByteReader::new(&buf);
            assert_eq!(reader.read_i32().unwrap(), value);
        }
    }

    #[test]
    fn test_string_roundtrip() {
        let mut buf = Vec::new();
        put_str(&mut buf, "hello");
        put_str(&mut buf, "");
        put_str(&mut buf, "world");

        let mut reader = ByteReader::new(&buf);
        assert_eq!(reader.read_str().unwrap(), "hello");
        assert_eq!(reader.read_str().unwrap(), "");
        assert_eq!(reader.read_str().unwrap(), "world");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_custom_terminator() {
        let mut buf = Vec::new();
        put_str_with(&mut buf, "a|b", b'\n');

        let mut reader = ByteReader::new(&buf);
        assert_eq!(reader.read_str_with(b'\n').unwrap(), "a|b");
    }

    #[test]
    fn test_terminator_not_included_in_string() {
        let mut buf = Vec::new();
        put_str(&mut buf, "abc");
        assert_eq!(buf.len(), 4);

        let mut reader = ByteReader::new(&buf);
        let text = reader.read_str().unwrap();
        assert_eq!(text, "abc");
        // Cursor advanced past the terminator too.
        assert_eq!(reader.index(), 4);
    }

    #[test]
    fn test_missing_terminator_errors() {
        let buf = b"no terminator here".to_vec();
        let mut reader = ByteReader::new(&buf);
        assert!(matches!(
            reader.read_str(),
            Err(CodecError::MissingTerminator { terminator: 0 })
        ));
    }

    #[test]
    fn test_out_of_bounds_read() {
        let buf = vec![1, 2];
        let mut reader = ByteReader::new(&buf);
        assert!(matches!(
            reader.read_i32(),
            Err(CodecError::OutOfBounds { wanted: 4, .. })
        ));
        // A failed read does not advance the cursor.
        assert_eq!(reader.index(), 0);
    }

    #[test]
    fn test_invalid_utf8_errors() {
        let buf = vec![0xFF, 0xFE, 0x00];
        let mut reader = ByteReader::new(&buf);
        assert!(matches!(reader.read_str(), Err(CodecError::InvalidUtf8(_))));
    }

    #[test]
    fn test_mixed_field_sequence() {
        let mut buf = Vec::new();
        put_i32(&mut buf, 42);
        put_str(&mut buf, "name");
        put_bool(&mut buf, true);

        let mut reader = ByteReader::new(&buf);
        assert_eq!(reader.read_i32().unwrap(), 42);
        assert_eq!(reader.read_str().unwrap(), "name");
        assert!(reader.read_bool().unwrap());
        assert_eq!(reader.remaining(), 0);
    }
}
