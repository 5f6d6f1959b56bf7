//! Exception handling clauses of a method body.
//!
//! Regions are stored as instruction indices with exclusive ends, so an end index equal to the
//! instruction count means "until the end of the code". They are converted from and to byte
//! offsets when the body is parsed or written.

use bitflags::bitflags;

use crate::{disassembler::CodeLayout, metadata::token::Token, Result};

bitflags! {
    /// Exception handler flags defining the type of exception handling clause.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed exception clause; `class_token` names the caught type.
        const EXCEPTION = 0x0000;
        /// An exception filter and handler clause.
        const FILTER = 0x0001;
        /// A finally clause.
        const FINALLY = 0x0002;
        /// A fault clause (finally that executes only on exception).
        const FAULT = 0x0004;
    }
}

/// Exception handler defining a protected region and its handler.
///
/// # References
/// - ECMA-335 6th Edition, Partition II, Section 25.4.6 - Exception Handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Flags describing the type of exception handler (catch, filter, finally, fault).
    pub flags: ExceptionHandlerFlags,
    /// Index of the first protected instruction
    pub try_start: usize,
    /// Index one past the last protected instruction
    pub try_end: usize,
    /// Index of the first handler instruction
    pub handler_start: usize,
    /// Index one past the last handler instruction
    pub handler_end: usize,
    /// Index of the first filter instruction, for `FILTER` clauses
    pub filter_start: Option<usize>,
    /// Caught type for `EXCEPTION` clauses, null otherwise
    pub class_token: Token,
}

/// An exception clause as stored in the method body, with byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawClause {
    pub flags: u32,
    pub try_offset: u32,
    pub try_length: u32,
    pub handler_offset: u32,
    pub handler_length: u32,
    pub class_token_or_filter: u32,
}

fn index_of(layout: &CodeLayout, offset: u32, what: &str) -> Result<usize> {
    layout.index_at(offset).ok_or_else(|| {
        malformed_error!(
            "Exception clause {} offset {} is not an instruction boundary",
            what,
            offset
        )
    })
}

fn offset_of(layout: &CodeLayout, index: usize) -> Result<u32> {
    layout
        .offset_of(index)
        .ok_or_else(|| malformed_error!("Exception clause references missing instruction {}", index))
}

impl ExceptionHandler {
    pub(crate) fn from_raw(raw: &RawClause, layout: &CodeLayout) -> Result<Self> {
        // Intentionally truncating u32 to u16, the upper bits are unused
        #[allow(clippy::cast_possible_truncation)]
        let flags = ExceptionHandlerFlags::from_bits_truncate(raw.flags as u16);

        let try_end = raw
            .try_offset
            .checked_add(raw.try_length)
            .ok_or(crate::Error::OutOfBounds)?;
        let handler_end = raw
            .handler_offset
            .checked_add(raw.handler_length)
            .ok_or(crate::Error::OutOfBounds)?;

        let (filter_start, class_token) = if flags.contains(ExceptionHandlerFlags::FILTER) {
            (
                Some(index_of(layout, raw.class_token_or_filter, "filter")?),
                Token::new(0),
            )
        } else if flags.is_empty() {
            (None, Token::new(raw.class_token_or_filter))
        } else {
            (None, Token::new(0))
        };

        Ok(ExceptionHandler {
            flags,
            try_start: index_of(layout, raw.try_offset, "try start")?,
            try_end: index_of(layout, try_end, "try end")?,
            handler_start: index_of(layout, raw.handler_offset, "handler start")?,
            handler_end: index_of(layout, handler_end, "handler end")?,
            filter_start,
            class_token,
        })
    }

    pub(crate) fn to_raw(&self, layout: &CodeLayout) -> Result<RawClause> {
        let try_offset = offset_of(layout, self.try_start)?;
        let try_end = offset_of(layout, self.try_end)?;
        let handler_offset = offset_of(layout, self.handler_start)?;
        let handler_end = offset_of(layout, self.handler_end)?;
        if try_end < try_offset || handler_end < handler_offset {
            return Err(malformed_error!("Exception clause ends before it starts"));
        }

        let class_token_or_filter = match self.filter_start {
            Some(filter) if self.flags.contains(ExceptionHandlerFlags::FILTER) => {
                offset_of(layout, filter)?
            }
            _ => self.class_token.value(),
        };

        Ok(RawClause {
            flags: u32::from(self.flags.bits()),
            try_offset,
            try_length: try_end - try_offset,
            handler_offset,
            handler_length: handler_end - handler_offset,
            class_token_or_filter,
        })
    }

    /// Renumber the clause after an instruction was inserted at `position + 1`.
    pub fn shift_after(&mut self, position: usize) {
        for index in [
            &mut self.try_start,
            &mut self.try_end,
            &mut self.handler_start,
            &mut self.handler_end,
        ] {
            if *index > position {
                *index += 1;
            }
        }
        if let Some(filter) = self.filter_start.as_mut() {
            if *filter > position {
                *filter += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> CodeLayout {
        // Four instructions: 0, 1, 3, 8 -> size 9
        CodeLayout::new(vec![0, 1, 3, 8], 9)
    }

    #[test]
    fn raw_roundtrip() {
        let raw = RawClause {
            flags: 0,
            try_offset: 1,
            try_length: 2,
            handler_offset: 3,
            handler_length: 6,
            class_token_or_filter: 0x0100_0003,
        };
        let handler = ExceptionHandler::from_raw(&raw, &layout()).unwrap();
        assert_eq!(handler.try_start, 1);
        assert_eq!(handler.try_end, 2);
        assert_eq!(handler.handler_start, 2);
        assert_eq!(handler.handler_end, 4);
        assert_eq!(handler.class_token, Token::new(0x0100_0003));
        assert_eq!(handler.to_raw(&layout()).unwrap(), raw);
    }

    #[test]
    fn filter_clause() {
        let raw = RawClause {
            flags: 1,
            try_offset: 0,
            try_length: 1,
            handler_offset: 8,
            handler_length: 1,
            class_token_or_filter: 3,
        };
        let handler = ExceptionHandler::from_raw(&raw, &layout()).unwrap();
        assert_eq!(handler.filter_start, Some(2));
        assert!(handler.class_token.is_null());
    }

    #[test]
    fn misaligned_offset() {
        let raw = RawClause {
            flags: 2,
            try_offset: 2,
            try_length: 1,
            handler_offset: 3,
            handler_length: 1,
            class_token_or_filter: 0,
        };
        assert!(ExceptionHandler::from_raw(&raw, &layout()).is_err());
    }

    #[test]
    fn shift() {
        let mut handler = ExceptionHandler {
            flags: ExceptionHandlerFlags::FILTER,
            try_start: 0,
            try_end: 2,
            handler_start: 3,
            handler_end: 5,
            filter_start: Some(2),
            class_token: Token::new(0),
        };
        handler.shift_after(1);
        assert_eq!(handler.try_start, 0);
        assert_eq!(handler.try_end, 3);
        assert_eq!(handler.filter_start, Some(3));
        assert_eq!(handler.handler_start, 4);
        assert_eq!(handler.handler_end, 6);
    }
}
