//! Parsing and writing of CIL method bodies.
//!
//! A [`MethodBody`] holds the decoded instruction list of a method together with its header
//! fields and exception clauses. Branch targets and exception regions are instruction indices,
//! so instructions can be inserted without tracking byte offsets; [`MethodBody::to_bytes`]
//! recomputes the layout and picks the smallest header that can represent the body.
//!
//! # Examples
//!
//! ```rust,no_run
//! use cilhook::disassembler::Instruction;
//! use cilhook::metadata::{method::MethodBody, token::Token};
//!
//! // Tiny header (code size 1), ret
//! let mut body = MethodBody::from(&[0x06, 0x2A])?;
//! body.insert_after(0, Instruction::call(Token::new(0x0A00_0001)))?;
//! assert_eq!(body.instructions.len(), 2);
//! let bytes = body.to_bytes()?;
//! assert_eq!(bytes[0], (6 << 2) | 0x2);
//! # Ok::<(), cilhook::Error>(())
//! ```
//!
//! # References
//! - ECMA-335 6th Edition, Partition II, Section 25.4 - Method Header Format

use crate::{
    disassembler::{decode_stream, encode_stream, CodeLayout, Instruction},
    file::io::{push_le, read_le, read_le_at},
    metadata::{
        method::{exceptions::RawClause, ExceptionHandler, MethodBodyFlags, SectionFlags},
        token::Token,
    },
    Error::OutOfBounds,
    Result,
};

/// Max stack implied by a tiny header
pub const TINY_MAX_STACK: u16 = 8;
/// Largest code size a tiny header can describe
pub const TINY_MAX_CODE_SIZE: usize = 63;

const FAT_HEADER_SIZE: usize = 12;
const FAT_CLAUSE_SIZE: usize = 24;
const SMALL_CLAUSE_SIZE: usize = 12;

/// A method body as a list of instructions.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodBody {
    /// Maximum number of items on the operand stack
    pub max_stack: u16,
    /// Zero-initialize locals on entry
    pub init_locals: bool,
    /// `StandAloneSig` token describing the locals, null if the method has none
    pub local_var_sig_token: Token,
    /// The method's code
    pub instructions: Vec<Instruction>,
    /// Exception clauses
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl MethodBody {
    /// Create an empty-header body from a list of instructions.
    #[must_use]
    pub fn new(instructions: Vec<Instruction>) -> Self {
        MethodBody {
            max_stack: TINY_MAX_STACK,
            init_locals: false,
            local_var_sig_token: Token::new(0),
            instructions,
            exception_handlers: Vec::new(),
        }
    }

    /// Parse a method body: header, code and exception sections.
    ///
    /// # Arguments
    /// * `data` - Bytes starting at the method header
    ///
    /// # Errors
    /// Returns an error if the data is empty, truncated, or the code cannot be decoded.
    pub fn from(data: &[u8]) -> Result<MethodBody> {
        if data.is_empty() {
            return Err(malformed_error!("Provided data for body parsing is empty"));
        }

        let first_byte = read_le::<u8>(data)?;
        match MethodBodyFlags::from_bits_truncate(u16::from(first_byte & 0b_00000011_u8)) {
            MethodBodyFlags::TINY_FORMAT => {
                let size_code = (first_byte >> 2) as usize;
                if size_code + 1 > data.len() {
                    return Err(OutOfBounds);
                }

                let (instructions, _) = decode_stream(&data[1..=size_code])?;
                Ok(MethodBody::new(instructions))
            }
            MethodBodyFlags::FAT_FORMAT => {
                if data.len() < FAT_HEADER_SIZE {
                    return Err(OutOfBounds);
                }

                let first_duo = read_le::<u16>(data)?;
                let size_header = usize::from(first_duo >> 12) * 4;
                if size_header < FAT_HEADER_SIZE {
                    return Err(malformed_error!("Fat header size {} too small", size_header));
                }
                let size_code = read_le::<u32>(&data[4..])? as usize;
                let code_end = size_header
                    .checked_add(size_code)
                    .filter(|end| *end <= data.len())
                    .ok_or(OutOfBounds)?;

                let flags_header =
                    MethodBodyFlags::from_bits_truncate(first_duo & 0b_0000111111111111_u16);
                let max_stack = read_le::<u16>(&data[2..])?;
                let local_var_sig_token = Token::new(read_le::<u32>(&data[8..])?);

                let (instructions, layout) = decode_stream(&data[size_header..code_end])?;

                let raw_clauses = if flags_header.contains(MethodBodyFlags::MORE_SECTS) {
                    read_sections(data, code_end)?
                } else {
                    Vec::new()
                };
                let exception_handlers = raw_clauses
                    .iter()
                    .map(|raw| ExceptionHandler::from_raw(raw, &layout))
                    .collect::<Result<Vec<_>>>()?;

                Ok(MethodBody {
                    max_stack,
                    init_locals: flags_header.contains(MethodBodyFlags::INIT_LOCALS),
                    local_var_sig_token,
                    instructions,
                    exception_handlers,
                })
            }
            _ => Err(malformed_error!(
                "MethodHeader is neither FAT nor TINY - {}",
                first_byte
            )),
        }
    }

    /// Byte layout of the body's code as it would be written.
    ///
    /// # Errors
    /// Returns an error if a branch target is out of range.
    pub fn layout(&self) -> Result<CodeLayout> {
        Ok(encode_stream(&self.instructions)?.layout)
    }

    /// True if the body would be written with a tiny header.
    #[must_use]
    pub fn fits_tiny(&self, code_size: usize) -> bool {
        code_size <= TINY_MAX_CODE_SIZE
            && self.max_stack <= TINY_MAX_STACK
            && self.local_var_sig_token.is_null()
            && self.exception_handlers.is_empty()
            && !self.init_locals
    }

    /// Encode the body: header, code, and a fat exception section if there are clauses.
    ///
    /// # Errors
    /// Returns an error if a branch or exception clause references a missing instruction.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let encoded = encode_stream(&self.instructions)?;
        let code_size = encoded.bytes.len();

        if self.fits_tiny(code_size) {
            let mut out = Vec::with_capacity(code_size + 1);
            // Tiny header: upper 6 bits carry the code size
            #[allow(clippy::cast_possible_truncation)]
            out.push(((code_size as u8) << 2) | 0x2);
            out.extend_from_slice(&encoded.bytes);
            return Ok(out);
        }

        let mut flags = MethodBodyFlags::FAT_FORMAT;
        if self.init_locals {
            flags |= MethodBodyFlags::INIT_LOCALS;
        }
        if !self.exception_handlers.is_empty() {
            flags |= MethodBodyFlags::MORE_SECTS;
        }

        let mut out = Vec::with_capacity(FAT_HEADER_SIZE + code_size);
        push_le(&mut out, flags.bits() | (3 << 12));
        push_le(&mut out, self.max_stack);
        push_le(
            &mut out,
            u32::try_from(code_size).map_err(|_| malformed_error!("Code exceeds 4 GiB"))?,
        );
        push_le(&mut out, self.local_var_sig_token.value());
        out.extend_from_slice(&encoded.bytes);

        if !self.exception_handlers.is_empty() {
            while out.len() % 4 != 0 {
                out.push(0);
            }

            let section_size = 4 + FAT_CLAUSE_SIZE * self.exception_handlers.len();
            if section_size > 0x00FF_FFFF {
                return Err(malformed_error!(
                    "Too many exception clauses: {}",
                    self.exception_handlers.len()
                ));
            }
            out.push((SectionFlags::EHTABLE | SectionFlags::FAT_FORMAT).bits());
            // 24-bit little-endian section size
            #[allow(clippy::cast_possible_truncation)]
            out.extend_from_slice(&(section_size as u32).to_le_bytes()[..3]);

            for handler in &self.exception_handlers {
                let raw = handler.to_raw(&encoded.layout)?;
                push_le(&mut out, raw.flags);
                push_le(&mut out, raw.try_offset);
                push_le(&mut out, raw.try_length);
                push_le(&mut out, raw.handler_offset);
                push_le(&mut out, raw.handler_length);
                push_le(&mut out, raw.class_token_or_filter);
            }
        }

        Ok(out)
    }

    /// Insert `instruction` directly after the instruction at `position`.
    ///
    /// Branch targets and exception regions that referred to an instruction after `position` are
    /// renumbered so they keep referring to the same instruction.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `position` is not an instruction index.
    pub fn insert_after(&mut self, position: usize, instruction: Instruction) -> Result<()> {
        if position >= self.instructions.len() {
            return Err(OutOfBounds);
        }

        for existing in &mut self.instructions {
            existing.shift_targets(position);
        }
        for handler in &mut self.exception_handlers {
            handler.shift_after(position);
        }

        self.instructions.insert(position + 1, instruction);
        Ok(())
    }

    /// Indices and callee tokens of all `call`/`callvirt` instructions
    pub fn calls(&self) -> impl Iterator<Item = (usize, Token)> + '_ {
        self.instructions
            .iter()
            .enumerate()
            .filter(|(_, instruction)| instruction.is_call())
            .filter_map(|(index, instruction)| instruction.token().map(|token| (index, token)))
    }
}

/// Exception Handling -> II.25.4.6
/// The extra sections currently can only contain exception handling data
fn read_sections(data: &[u8], code_end: usize) -> Result<Vec<RawClause>> {
    let mut clauses = Vec::new();
    let mut cursor = (code_end + 3) & !3;

    while data.len() >= cursor + 4 {
        let section_flags = SectionFlags::from_bits_truncate(read_le::<u8>(&data[cursor..])?);
        if !section_flags.contains(SectionFlags::EHTABLE) {
            break;
        }

        if section_flags.contains(SectionFlags::FAT_FORMAT) {
            let section_size = (read_le::<u32>(&data[cursor..])? >> 8) as usize;
            if section_size < 4 || data.len() < cursor + section_size {
                return Err(OutOfBounds);
            }

            let mut clause_cursor = cursor + 4;
            for _ in 0..(section_size - 4) / FAT_CLAUSE_SIZE {
                clauses.push(RawClause {
                    flags: read_le_at::<u32>(data, &mut clause_cursor)?,
                    try_offset: read_le_at::<u32>(data, &mut clause_cursor)?,
                    try_length: read_le_at::<u32>(data, &mut clause_cursor)?,
                    handler_offset: read_le_at::<u32>(data, &mut clause_cursor)?,
                    handler_length: read_le_at::<u32>(data, &mut clause_cursor)?,
                    class_token_or_filter: read_le_at::<u32>(data, &mut clause_cursor)?,
                });
            }
            cursor += section_size;
        } else {
            let section_size = usize::from(read_le::<u8>(&data[cursor + 1..])?);
            if section_size < 4 || data.len() < cursor + section_size {
                return Err(OutOfBounds);
            }

            let mut clause_cursor = cursor + 4;
            for _ in 0..(section_size - 4) / SMALL_CLAUSE_SIZE {
                clauses.push(RawClause {
                    flags: u32::from(read_le_at::<u16>(data, &mut clause_cursor)?),
                    try_offset: u32::from(read_le_at::<u16>(data, &mut clause_cursor)?),
                    try_length: u32::from(read_le_at::<u8>(data, &mut clause_cursor)?),
                    handler_offset: u32::from(read_le_at::<u16>(data, &mut clause_cursor)?),
                    handler_length: u32::from(read_le_at::<u8>(data, &mut clause_cursor)?),
                    class_token_or_filter: read_le_at::<u32>(data, &mut clause_cursor)?,
                });
            }
            cursor += section_size;
        }

        if !section_flags.contains(SectionFlags::MORE_SECTS) {
            break;
        }
        cursor = (cursor + 3) & !3;
    }

    Ok(clauses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        disassembler::{opcodes, Operand},
        metadata::method::ExceptionHandlerFlags,
    };

    /// Fat body: max_stack 2, locals token, init_locals, one try/finally
    ///   0: nop          (offset 0)
    ///   1: leave.s 4    (offset 1)
    ///   2: nop          (offset 3)
    ///   3: endfinally   (offset 4)
    ///   4: ret          (offset 5)
    fn fat_with_finally() -> Vec<u8> {
        let mut data = vec![
            0x1B, 0x30, // FAT | MORE_SECTS | INIT_LOCALS, header size 3
            0x02, 0x00, // max stack
            0x06, 0x00, 0x00, 0x00, // code size
            0x01, 0x00, 0x00, 0x11, // local var sig
            0x00, 0xDE, 0x02, 0x00, 0xDC, 0x2A,
            0x00, 0x00, // pad to 4
        ];
        // small EH section, one clause
        data.extend_from_slice(&[0x01, 0x10, 0x00, 0x00]);
        data.extend_from_slice(&[
            0x02, 0x00, // finally
            0x00, 0x00, 0x03, // try 0..3
            0x03, 0x00, 0x02, // handler 3..5
            0x00, 0x00, 0x00, 0x00,
        ]);
        data
    }

    #[test]
    fn tiny() {
        // ldarg.0, call 0x0A000001, ret
        let data = [0x1E, 0x02, 0x28, 0x01, 0x00, 0x00, 0x0A, 0x2A];
        let body = MethodBody::from(&data).unwrap();

        assert_eq!(body.max_stack, TINY_MAX_STACK);
        assert!(!body.init_locals);
        assert!(body.local_var_sig_token.is_null());
        assert_eq!(body.instructions.len(), 3);
        assert_eq!(body.calls().collect::<Vec<_>>(), vec![(1, Token::new(0x0A00_0001))]);
        assert_eq!(body.to_bytes().unwrap(), data.to_vec());
    }

    #[test]
    fn tiny_truncated() {
        assert!(matches!(MethodBody::from(&[0x1E, 0x02]), Err(OutOfBounds)));
        assert!(MethodBody::from(&[]).is_err());
        assert!(MethodBody::from(&[0x01]).is_err());
    }

    #[test]
    fn fat_with_exceptions() {
        let body = MethodBody::from(&fat_with_finally()).unwrap();

        assert_eq!(body.max_stack, 2);
        assert!(body.init_locals);
        assert_eq!(body.local_var_sig_token, Token::new(0x1100_0001));
        assert_eq!(body.instructions.len(), 5);
        assert_eq!(body.instructions[1].operand, Operand::Target(4));

        let handler = &body.exception_handlers[0];
        assert_eq!(handler.flags, ExceptionHandlerFlags::FINALLY);
        assert_eq!((handler.try_start, handler.try_end), (0, 2));
        assert_eq!((handler.handler_start, handler.handler_end), (2, 4));
    }

    #[test]
    fn fat_rewrites_fat_section() {
        let body = MethodBody::from(&fat_with_finally()).unwrap();
        let bytes = body.to_bytes().unwrap();

        // 12 header + 6 code + 2 pad, then a fat section with one clause
        assert_eq!(bytes.len(), 20 + 4 + 24);
        assert_eq!(bytes[20], 0x41);
        assert_eq!(&bytes[21..24], &[28, 0, 0]);

        let reparsed = MethodBody::from(&bytes).unwrap();
        assert_eq!(reparsed, body);
    }

    #[test]
    fn insert_shifts_branches_and_handlers() {
        let mut body = MethodBody::from(&fat_with_finally()).unwrap();
        body.insert_after(0, Instruction::call(Token::new(0x0A00_0002)))
            .unwrap();

        assert_eq!(body.instructions.len(), 6);
        assert!(body.instructions[1].is_call());
        assert_eq!(body.instructions[2].operand, Operand::Target(5));

        let handler = &body.exception_handlers[0];
        assert_eq!((handler.try_start, handler.try_end), (0, 3));
        assert_eq!((handler.handler_start, handler.handler_end), (3, 5));

        let reparsed = MethodBody::from(&body.to_bytes().unwrap()).unwrap();
        assert_eq!(reparsed, body);
    }

    #[test]
    fn insert_out_of_bounds() {
        let mut body = MethodBody::new(vec![Instruction::simple(0, opcodes::RET).unwrap()]);
        assert!(matches!(
            body.insert_after(1, Instruction::simple(0, opcodes::NOP).unwrap()),
            Err(OutOfBounds)
        ));
        assert!(body.insert_after(0, Instruction::simple(0, opcodes::NOP).unwrap()).is_ok());
    }

    #[test]
    fn growth_switches_to_fat_header() {
        let mut instructions: Vec<Instruction> = (0..62)
            .map(|_| Instruction::simple(0, opcodes::NOP).unwrap())
            .collect();
        instructions.push(Instruction::simple(0, opcodes::RET).unwrap());
        let mut body = MethodBody::new(instructions);
        assert_eq!(body.to_bytes().unwrap().len(), 64);

        body.insert_after(0, Instruction::call(Token::new(0x0A00_0001)))
            .unwrap();
        let bytes = body.to_bytes().unwrap();
        assert_eq!(bytes[0] & 0x3, 0x3);
        assert_eq!(bytes.len(), FAT_HEADER_SIZE + 68);
        assert_eq!(MethodBody::from(&bytes).unwrap(), body);
    }
}
