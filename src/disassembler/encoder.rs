//! CIL instruction encoding.
//!
//! [`encode_stream`] is the reverse of [`crate::disassembler::decode_stream`]. Branch targets
//! are instruction indices, so byte displacements are computed from a layout pass. A short
//! branch whose displacement no longer fits in a signed byte is promoted to its long form, and
//! the layout is recomputed until no further promotion is needed. Promotion only ever grows the
//! code, so the loop terminates.
//!
//! # Example
//!
//! ```rust,no_run
//! use cilhook::disassembler::{encode_stream, Instruction, Operand, opcodes};
//!
//! let instructions = vec![
//!     Instruction::new(0, opcodes::BR_S, Operand::Target(2))?,
//!     Instruction::simple(0, opcodes::NOP)?,
//!     Instruction::simple(0, opcodes::RET)?,
//! ];
//! let encoded = encode_stream(&instructions)?;
//! assert_eq!(encoded.bytes, vec![0x2B, 0x01, 0x00, 0x2A]);
//! # Ok::<(), cilhook::Error>(())
//! ```

use log::debug;

use crate::{
    disassembler::{
        instruction::{CodeLayout, Immediate, Instruction, Operand, OperandType},
        opcodes,
    },
    file::io::push_le,
    Result,
};

/// Result of encoding an instruction stream.
#[derive(Debug, Clone)]
pub struct EncodedCode {
    /// The encoded CIL bytes
    pub bytes: Vec<u8>,
    /// Byte offset of every instruction
    pub layout: CodeLayout,
    /// Number of short branches promoted to their long form
    pub promoted: usize,
}

fn encoded_size(instruction: &Instruction, promoted: bool) -> usize {
    if promoted {
        // Short branches are single-byte opcodes with a 1-byte operand; the long form has 4.
        return 5;
    }
    instruction.size()
}

fn compute_offsets(instructions: &[Instruction], promoted: &[bool]) -> Result<Vec<u32>> {
    let mut offsets = Vec::with_capacity(instructions.len() + 1);
    let mut offset = 0_usize;
    for (instruction, promoted) in instructions.iter().zip(promoted) {
        offsets.push(u32::try_from(offset).map_err(|_| malformed_error!("Code exceeds 4 GiB"))?);
        offset += encoded_size(instruction, *promoted);
    }
    offsets.push(u32::try_from(offset).map_err(|_| malformed_error!("Code exceeds 4 GiB"))?);
    Ok(offsets)
}

fn displacement(offsets: &[u32], index: usize, target: usize) -> Result<i64> {
    // offsets has one trailing entry for the end of the code; a target must be a real instruction.
    if target + 1 >= offsets.len() {
        return Err(malformed_error!(
            "Instruction {} branches to {} which does not exist",
            index,
            target
        ));
    }
    Ok(i64::from(offsets[target]) - i64::from(offsets[index + 1]))
}

/// Encode an instruction stream into CIL bytes.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if a branch targets an index outside the stream, or if an
/// operand does not match its instruction's operand type.
pub fn encode_stream(instructions: &[Instruction]) -> Result<EncodedCode> {
    let mut promoted = vec![false; instructions.len()];

    let offsets = loop {
        let offsets = compute_offsets(instructions, &promoted)?;

        let mut changed = false;
        for (index, instruction) in instructions.iter().enumerate() {
            if instruction.operand_type != OperandType::ShortTarget || promoted[index] {
                continue;
            }
            let Operand::Target(target) = instruction.operand else {
                return Err(malformed_error!(
                    "'{}' at {} has no branch target",
                    instruction.mnemonic,
                    index
                ));
            };
            let delta = displacement(&offsets, index, target)?;
            if i8::try_from(delta).is_err() {
                debug!(
                    "Promoting '{}' at {} to long form (displacement {})",
                    instruction.mnemonic, index, delta
                );
                promoted[index] = true;
                changed = true;
            }
        }

        if !changed {
            break offsets;
        }
    };

    let code_size = offsets[instructions.len()];
    let mut bytes = Vec::with_capacity(code_size as usize);
    for (index, instruction) in instructions.iter().enumerate() {
        let is_promoted = promoted[index];
        if instruction.prefix != 0 {
            bytes.push(instruction.prefix);
        }
        if is_promoted {
            let Some(long) = opcodes::long_form(instruction.opcode) else {
                return Err(malformed_error!(
                    "'{}' has no long form",
                    instruction.mnemonic
                ));
            };
            bytes.push(long);
        } else {
            bytes.push(instruction.opcode);
        }

        emit_operand(&mut bytes, instruction, index, &offsets, is_promoted)?;
    }

    let mut layout_offsets = offsets;
    layout_offsets.pop();

    Ok(EncodedCode {
        bytes,
        layout: CodeLayout::new(layout_offsets, code_size),
        promoted: promoted.iter().filter(|p| **p).count(),
    })
}

fn emit_operand(
    bytes: &mut Vec<u8>,
    instruction: &Instruction,
    index: usize,
    offsets: &[u32],
    is_promoted: bool,
) -> Result<()> {
    match (&instruction.operand, instruction.operand_type) {
        (Operand::None, OperandType::None) => {}
        (Operand::Immediate(value), _) => match *value {
            Immediate::Int8(v) => push_le(bytes, v),
            Immediate::UInt8(v) => push_le(bytes, v),
            Immediate::UInt16(v) => push_le(bytes, v),
            Immediate::Int32(v) => push_le(bytes, v),
            Immediate::Int64(v) => push_le(bytes, v),
            Immediate::Float32(v) => push_le(bytes, v),
            Immediate::Float64(v) => push_le(bytes, v),
        },
        (Operand::Token(token), OperandType::Token) => push_le(bytes, token.value()),
        (Operand::Target(target), OperandType::ShortTarget) if !is_promoted => {
            let delta = displacement(offsets, index, *target)?;
            let Ok(short) = i8::try_from(delta) else {
                return Err(malformed_error!("Short branch at {} out of range", index));
            };
            push_le(bytes, short);
        }
        (Operand::Target(target), OperandType::ShortTarget | OperandType::Target) => {
            let delta = displacement(offsets, index, *target)?;
            let Ok(long) = i32::try_from(delta) else {
                return Err(malformed_error!("Branch at {} out of range", index));
            };
            push_le(bytes, long);
        }
        (Operand::Switch(targets), OperandType::Switch) => {
            let Ok(count) = u32::try_from(targets.len()) else {
                return Err(malformed_error!("Switch at {} has too many cases", index));
            };
            push_le(bytes, count);
            for target in targets {
                let delta = displacement(offsets, index, *target)?;
                let Ok(long) = i32::try_from(delta) else {
                    return Err(malformed_error!("Switch case at {} out of range", index));
                };
                push_le(bytes, long);
            }
        }
        (operand, expected) => {
            return Err(malformed_error!(
                "Operand {:?} does not match {:?} of '{}'",
                operand,
                expected,
                instruction.mnemonic
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{disassembler::decode_stream, metadata::token::Token};

    fn nops(count: usize) -> Vec<Instruction> {
        (0..count)
            .map(|_| Instruction::simple(0, opcodes::NOP).unwrap())
            .collect()
    }

    #[test]
    fn encode_simple() {
        let instructions = vec![
            Instruction::simple(0, opcodes::LDARG_0).unwrap(),
            Instruction::call(Token::new(0x0A000001)),
            Instruction::simple(0, opcodes::RET).unwrap(),
        ];
        let encoded = encode_stream(&instructions).unwrap();
        assert_eq!(
            encoded.bytes,
            vec![0x02, 0x28, 0x01, 0x00, 0x00, 0x0A, 0x2A]
        );
        assert_eq!(encoded.layout.offset_of(2), Some(6));
        assert_eq!(encoded.promoted, 0);
    }

    #[test]
    fn encode_backward_branch() {
        let instructions = vec![
            Instruction::simple(0, opcodes::NOP).unwrap(),
            Instruction::new(0, opcodes::BR_S, Operand::Target(0)).unwrap(),
        ];
        let encoded = encode_stream(&instructions).unwrap();
        assert_eq!(encoded.bytes, vec![0x00, 0x2B, 0xFD]);
    }

    #[test]
    fn encode_promotes_out_of_range_branch() {
        let mut instructions = vec![Instruction::new(0, opcodes::BRTRUE_S, Operand::Target(201)).unwrap()];
        instructions.extend(nops(200));
        instructions.push(Instruction::simple(0, opcodes::RET).unwrap());

        let encoded = encode_stream(&instructions).unwrap();
        assert_eq!(encoded.promoted, 1);
        assert_eq!(encoded.bytes[0], opcodes::BRTRUE);
        assert_eq!(&encoded.bytes[1..5], &200_i32.to_le_bytes());

        let (decoded, _) = decode_stream(&encoded.bytes).unwrap();
        assert_eq!(decoded[0].mnemonic, "brtrue");
        assert_eq!(decoded[0].operand, Operand::Target(201));
    }

    #[test]
    fn encode_promotion_cascades() {
        // The second branch fits only while the first stays short.
        let mut instructions = vec![
            Instruction::new(0, opcodes::BR_S, Operand::Target(130)).unwrap(),
            Instruction::new(0, opcodes::BR_S, Operand::Target(127)).unwrap(),
        ];
        instructions.extend(nops(128));
        instructions.push(Instruction::simple(0, opcodes::RET).unwrap());

        let encoded = encode_stream(&instructions).unwrap();
        let (decoded, _) = decode_stream(&encoded.bytes).unwrap();
        for (original, roundtrip) in instructions.iter().zip(&decoded) {
            assert_eq!(original.targets(), roundtrip.targets());
        }
        assert_eq!(decoded[0].mnemonic, "br");
    }

    #[test]
    fn encode_switch() {
        let instructions = vec![
            Instruction::new(0, opcodes::SWITCH, Operand::Switch(vec![2, 1])).unwrap(),
            Instruction::simple(0, opcodes::NOP).unwrap(),
            Instruction::simple(0, opcodes::RET).unwrap(),
        ];
        let encoded = encode_stream(&instructions).unwrap();
        assert_eq!(
            encoded.bytes,
            vec![0x45, 0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x2A]
        );
    }

    #[test]
    fn encode_rejects_dangling_target() {
        let instructions = vec![Instruction::new(0, opcodes::BR, Operand::Target(1)).unwrap()];
        assert!(encode_stream(&instructions).is_err());
    }

    #[test]
    fn encode_two_byte() {
        let instructions = vec![Instruction::simple(opcodes::FE_PREFIX, opcodes::FE_CEQ).unwrap()];
        let encoded = encode_stream(&instructions).unwrap();
        assert_eq!(encoded.bytes, vec![0xFE, 0x01]);
    }
}
