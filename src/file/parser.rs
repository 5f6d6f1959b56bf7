//! Cursor-based byte stream parser.
//!
//! [`Parser`] keeps a position within a borrowed byte slice and offers bounds-checked, typed
//! reads. The instruction decoder uses it to walk CIL code.
//!
//! # Examples
//!
//! ```rust,no_run
//! use cilhook::Parser;
//!
//! let data = [0x03, 0x00, b'a', b'b', b'c', 0x2A];
//! let mut parser = Parser::new(&data);
//! assert_eq!(parser.read_prefixed_string_utf8()?, "abc");
//! assert_eq!(parser.read_le::<u8>()?, 0x2A);
//! assert!(!parser.has_more_data());
//! # Ok::<(), cilhook::Error>(())
//! ```

use crate::{
    file::io::{read_le_at, CilIO},
    Error::OutOfBounds,
    Result,
};

/// A generic binary data parser for reading CIL bytecode.
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new Parser from a byte slice.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Returns the length of the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the underlying data is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check if there is more data to parse.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Move the current position to the specified index.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if position is beyond the data length.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(OutOfBounds);
        }

        self.position = pos;
        Ok(())
    }

    /// Move the position forward by the specified number of bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if advancing by step would exceed the data length.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        let end = self.calc_end_position(step)?;
        self.position = end;
        Ok(())
    }

    /// Get the current position of the parser within the data buffer.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Get the full underlying data slice.
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Peek at the next byte without advancing the position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if at the end of the data.
    pub fn peek_byte(&self) -> Result<u8> {
        self.data.get(self.position).copied().ok_or(OutOfBounds)
    }

    /// Align the position to the next multiple of `alignment`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the aligned position would exceed the data length.
    pub fn align(&mut self, alignment: usize) -> Result<()> {
        let aligned = (self.position + alignment - 1) & !(alignment - 1);
        self.seek(aligned)
    }

    /// Read a type `T` from the current position in little-endian format and advance the position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading would exceed the data length.
    pub fn read_le<T: CilIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Read a UTF-8 string prefixed with its byte length as a little-endian `u16`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the string exceeds the data, or
    /// [`crate::Error::Malformed`] if it is not valid UTF-8.
    pub fn read_prefixed_string_utf8(&mut self) -> Result<String> {
        let length = self.read_le::<u16>()?;
        let bytes = self.read_bytes(usize::from(length))?;
        match std::str::from_utf8(bytes) {
            Ok(value) => Ok(value.to_string()),
            Err(_) => Err(malformed_error!(
                "Invalid UTF-8 string at offset {}",
                self.position - bytes.len()
            )),
        }
    }

    /// Get the number of remaining bytes from the current position.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Calculates the end position for reading `length` bytes from the current position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on overflow or when it would exceed the data length.
    pub fn calc_end_position(&self, length: usize) -> Result<usize> {
        let end = self.position.checked_add(length).ok_or(OutOfBounds)?;
        if end > self.data.len() {
            return Err(OutOfBounds);
        }
        Ok(end)
    }

    /// Read `length` raw bytes and advance the position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading would exceed the data length.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self.calc_end_position(length)?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seek_and_advance() {
        let data = [0u8; 8];
        let mut parser = Parser::new(&data);

        parser.seek(3).unwrap();
        assert_eq!(parser.pos(), 3);
        parser.advance_by(5).unwrap();
        assert_eq!(parser.pos(), 8);
        assert!(!parser.has_more_data());

        assert!(parser.advance_by(1).is_err());
        assert!(parser.seek(9).is_err());
    }

    #[test]
    fn align_rounds_up() {
        let data = [0u8; 16];
        let mut parser = Parser::new(&data);

        parser.seek(5).unwrap();
        parser.align(4).unwrap();
        assert_eq!(parser.pos(), 8);

        parser.align(4).unwrap();
        assert_eq!(parser.pos(), 8);

        parser.seek(15).unwrap();
        assert!(parser.align(8).is_err());
    }

    #[test]
    fn prefixed_strings() {
        let data = [
            0x05, 0x00, b'A', b'w', b'a', b'k', b'e', 0x00, 0x00, 0x02, 0x00, 0xC3,
        ];
        let mut parser = Parser::new(&data);

        assert_eq!(parser.read_prefixed_string_utf8().unwrap(), "Awake");
        assert_eq!(parser.read_prefixed_string_utf8().unwrap(), "");
        assert!(parser.read_prefixed_string_utf8().is_err());
    }

    #[test]
    fn invalid_utf8() {
        let data = [0x02, 0x00, 0xC3, 0x28];
        let mut parser = Parser::new(&data);

        match parser.read_prefixed_string_utf8() {
            Err(crate::Error::Malformed { .. }) => {}
            other => panic!("Expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn read_bytes_bounds() {
        let data = [1, 2, 3];
        let mut parser = Parser::new(&data);

        assert_eq!(parser.read_bytes(2).unwrap(), &[1, 2]);
        assert_eq!(parser.remaining(), 1);
        assert!(parser.read_bytes(2).is_err());
        assert_eq!(parser.peek_byte().unwrap(), 3);
    }
}
