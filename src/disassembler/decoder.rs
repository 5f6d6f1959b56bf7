//! CIL instruction decoding.
//!
//! [`decode_instruction`] reads a single instruction and reports branch targets as byte offsets.
//! [`decode_stream`] decodes a whole method's code and rewrites every branch target into the
//! index of the instruction it lands on.
//!
//! # Example: Decoding a Stream of Instructions
//!
//! ```rust,no_run
//! use cilhook::disassembler::{decode_stream, Operand};
//!
//! // br.s +1, nop, ret
//! let (instructions, layout) = decode_stream(&[0x2B, 0x01, 0x00, 0x2A])?;
//! assert_eq!(instructions.len(), 3);
//! assert_eq!(instructions[0].operand, Operand::Target(2));
//! assert_eq!(layout.offset_of(2), Some(3));
//! # Ok::<(), cilhook::Error>(())
//! ```

use crate::{
    disassembler::{
        instruction::{CodeLayout, Immediate, Instruction, OperandType},
        instructions::opcode_info,
        opcodes::FE_PREFIX,
        Operand,
    },
    file::parser::Parser,
    metadata::token::Token,
    Result,
};

/// A single decoded instruction whose branch targets are still byte offsets.
#[derive(Debug, Clone)]
pub struct RawInstruction {
    /// Byte offset of the instruction
    pub offset: u32,
    /// Size of the instruction in bytes
    pub size: u32,
    /// The instruction; branch operands hold placeholder indices until resolved
    pub instruction: Instruction,
    /// Absolute byte offsets of the branch targets
    pub branch_targets: Vec<i64>,
}

/// Decode a single instruction at the parser's position.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for a reserved opcode and [`crate::Error::OutOfBounds`]
/// for a truncated operand.
pub fn decode_instruction(parser: &mut Parser) -> Result<RawInstruction> {
    let start = parser.pos();
    let first_byte = parser.read_le::<u8>()?;

    let (prefix, opcode) = match first_byte {
        FE_PREFIX => (FE_PREFIX, parser.read_le::<u8>()?),
        _ => (0, first_byte),
    };

    let Some(info) = opcode_info(prefix, opcode) else {
        return Err(malformed_error!(
            "Invalid opcode {:02X} {:02X} at offset {}",
            prefix,
            opcode,
            start
        ));
    };

    let mut relative_targets = Vec::new();
    let operand = match info.operand {
        OperandType::None => Operand::None,
        OperandType::Int8 => Operand::Immediate(Immediate::Int8(parser.read_le::<i8>()?)),
        OperandType::UInt8 => Operand::Immediate(Immediate::UInt8(parser.read_le::<u8>()?)),
        OperandType::UInt16 => Operand::Immediate(Immediate::UInt16(parser.read_le::<u16>()?)),
        OperandType::Int32 => Operand::Immediate(Immediate::Int32(parser.read_le::<i32>()?)),
        OperandType::Int64 => Operand::Immediate(Immediate::Int64(parser.read_le::<i64>()?)),
        OperandType::Float32 => Operand::Immediate(Immediate::Float32(parser.read_le::<f32>()?)),
        OperandType::Float64 => Operand::Immediate(Immediate::Float64(parser.read_le::<f64>()?)),
        OperandType::Token => Operand::Token(Token::new(parser.read_le::<u32>()?)),
        OperandType::ShortTarget => {
            relative_targets.push(i64::from(parser.read_le::<i8>()?));
            Operand::Target(0)
        }
        OperandType::Target => {
            relative_targets.push(i64::from(parser.read_le::<i32>()?));
            Operand::Target(0)
        }
        OperandType::Switch => {
            let case_count = parser.read_le::<u32>()? as usize;
            if case_count.saturating_mul(4) > parser.remaining() {
                return Err(crate::Error::OutOfBounds);
            }

            for _ in 0..case_count {
                relative_targets.push(i64::from(parser.read_le::<i32>()?));
            }
            Operand::Switch(vec![0; case_count])
        }
    };

    let end = parser.pos();
    let branch_targets = relative_targets
        .into_iter()
        .map(|relative| end as i64 + relative)
        .collect();

    let offset = u32::try_from(start).map_err(|_| crate::Error::OutOfBounds)?;
    let size = u32::try_from(end - start).map_err(|_| crate::Error::OutOfBounds)?;

    Ok(RawInstruction {
        offset,
        size,
        instruction: Instruction {
            prefix,
            opcode,
            mnemonic: info.mnemonic,
            flow_type: info.flow,
            operand_type: info.operand,
            operand,
        },
        branch_targets,
    })
}

/// Decode a complete instruction stream, resolving branch targets to instruction indices.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for invalid opcodes, for a branch that does not land on
/// an instruction boundary and for code larger than 4 GiB.
pub fn decode_stream(code: &[u8]) -> Result<(Vec<Instruction>, CodeLayout)> {
    let Ok(code_size) = u32::try_from(code.len()) else {
        return Err(malformed_error!("Code size {} exceeds u32", code.len()));
    };

    let mut parser = Parser::new(code);
    let mut raw = Vec::new();
    while parser.has_more_data() {
        raw.push(decode_instruction(&mut parser)?);
    }

    let layout = CodeLayout::new(raw.iter().map(|r| r.offset).collect(), code_size);
    let resolve = |target: i64, from: u32| -> Result<usize> {
        let index = u32::try_from(target)
            .ok()
            .and_then(|offset| layout.index_at(offset))
            .filter(|index| *index < layout.len());
        index.ok_or_else(|| {
            malformed_error!(
                "Branch at offset {} targets {} which is not an instruction",
                from,
                target
            )
        })
    };

    let mut instructions = Vec::with_capacity(raw.len());
    for entry in raw {
        let mut instruction = entry.instruction;
        match &mut instruction.operand {
            Operand::Target(target) => {
                *target = resolve(entry.branch_targets[0], entry.offset)?;
            }
            Operand::Switch(targets) => {
                for (slot, &offset) in targets.iter_mut().zip(&entry.branch_targets) {
                    *slot = resolve(offset, entry.offset)?;
                }
            }
            _ => {}
        }
        instructions.push(instruction);
    }

    Ok((instructions, layout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disassembler::FlowType;

    #[test]
    fn decode_instruction_basic() {
        // ldloc.s 10 (0x11, 0x10)
        let mut parser = Parser::new(&[0x11, 0x10]);

        let result = decode_instruction(&mut parser).unwrap();

        assert_eq!(result.offset, 0);
        assert_eq!(result.size, 2);
        assert_eq!(result.instruction.opcode, 0x11);
        assert_eq!(result.instruction.prefix, 0);
        assert_eq!(result.instruction.mnemonic, "ldloc.s");
        assert_eq!(result.instruction.flow_type, FlowType::Sequential);
        match &result.instruction.operand {
            Operand::Immediate(Immediate::UInt8(val)) => assert_eq!(*val, 0x10),
            _ => panic!("Expected Operand::Immediate(Immediate::UInt8)"),
        }
    }

    #[test]
    fn decode_instruction_two_byte() {
        // ceq (0xFE, 0x01)
        let mut parser = Parser::new(&[0xFE, 0x01]);

        let result = decode_instruction(&mut parser).unwrap();

        assert_eq!(result.instruction.opcode, 0x01);
        assert_eq!(result.instruction.prefix, 0xFE);
        assert_eq!(result.instruction.mnemonic, "ceq");
        assert_eq!(result.size, 2);
    }

    #[test]
    fn decode_instruction_branch() {
        // br.s 10 (0x2B, 0x0A)
        let mut parser = Parser::new(&[0x2B, 0x0A]);

        let result = decode_instruction(&mut parser).unwrap();

        assert_eq!(result.instruction.mnemonic, "br.s");
        assert_eq!(result.instruction.flow_type, FlowType::UnconditionalBranch);
        assert_eq!(result.branch_targets, vec![12]);
    }

    #[test]
    fn decode_instruction_backward_branch() {
        // nop, nop, br.s -4
        let mut parser = Parser::new(&[0x00, 0x00, 0x2B, 0xFC]);
        parser.seek(2).unwrap();

        let result = decode_instruction(&mut parser).unwrap();
        assert_eq!(result.branch_targets, vec![0]);
    }

    #[test]
    fn decode_instruction_invalid() {
        let mut parser = Parser::new(&[0x24]);
        assert!(decode_instruction(&mut parser).is_err());

        let mut parser = Parser::new(&[0xFE, 0x08]);
        assert!(decode_instruction(&mut parser).is_err());

        let mut parser = Parser::new(&[0x28, 0x01, 0x00]);
        assert!(matches!(
            decode_instruction(&mut parser),
            Err(crate::Error::OutOfBounds)
        ));
    }

    #[test]
    fn decode_switch_bounds() {
        // switch with a huge case count and no table
        let mut parser = Parser::new(&[0x45, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(matches!(
            decode_instruction(&mut parser),
            Err(crate::Error::OutOfBounds)
        ));
    }

    #[test]
    fn decode_stream_resolves_indices() {
        // 0: ldarg.0
        // 1: brfalse.s +6 -> offset 9
        // 3: call 0x0A000001
        // 8: nop
        // 9: ret
        let code = [
            0x02, 0x2C, 0x06, 0x28, 0x01, 0x00, 0x00, 0x0A, 0x00, 0x2A,
        ];
        let (instructions, layout) = decode_stream(&code).unwrap();

        assert_eq!(instructions.len(), 5);
        assert_eq!(instructions[1].operand, Operand::Target(4));
        assert_eq!(instructions[2].token(), Some(Token::new(0x0A000001)));
        assert_eq!(layout.offset_of(4), Some(9));
        assert_eq!(layout.code_size(), 10);
    }

    #[test]
    fn decode_stream_switch() {
        // 0: switch (2) [+0, +1] -> offsets 13, 14
        // 13: nop
        // 14: ret
        let code = [
            0x45, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00,
            0x2A,
        ];
        let (instructions, _) = decode_stream(&code).unwrap();
        assert_eq!(instructions[0].operand, Operand::Switch(vec![1, 2]));
    }

    #[test]
    fn decode_stream_rejects_mid_instruction_target() {
        // br.s +1 lands inside the call operand
        let code = [0x2B, 0x01, 0x28, 0x01, 0x00, 0x00, 0x0A, 0x2A];
        assert!(matches!(
            decode_stream(&code),
            Err(crate::Error::Malformed { .. })
        ));
    }

    #[test]
    fn decode_stream_rejects_target_past_end() {
        // br.s +0 targets the end of the code
        let code = [0x2B, 0x00];
        assert!(decode_stream(&code).is_err());
    }
}
