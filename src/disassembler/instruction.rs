//! CIL instruction representation, operand types and control flow classification.
//!
//! An [`Instruction`] is an opcode plus a typed [`Operand`]. Branch and switch operands are
//! stored as *instruction indices* into the owning method body rather than byte offsets, so an
//! instruction stream can be edited (see [`crate::metadata::method::MethodBody::insert_after`])
//! without touching every displacement. Byte offsets are recomputed by the encoder.
//!
//! # Examples
//!
//! ```rust,no_run
//! use cilhook::disassembler::{Instruction, Operand, opcodes};
//! use cilhook::metadata::token::Token;
//!
//! let call = Instruction::call(Token::new(0x0A00_0001));
//! assert!(call.is_call());
//! assert_eq!(call.mnemonic, "call");
//!
//! let branch = Instruction::new(0, opcodes::BR_S, Operand::Target(4))?;
//! assert_eq!(branch.targets(), vec![4]);
//! # Ok::<(), cilhook::Error>(())
//! ```

use std::fmt;

use crate::{
    disassembler::{instructions::opcode_info, opcodes},
    metadata::token::Token,
    Result,
};

/// Types of operands for CIL instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand
    None,
    /// Signed 8-bit immediate
    Int8,
    /// Unsigned 8-bit immediate
    UInt8,
    /// Unsigned 16-bit immediate
    UInt16,
    /// Signed 32-bit immediate
    Int32,
    /// Signed 64-bit immediate
    Int64,
    /// 32-bit float immediate
    Float32,
    /// 64-bit float immediate
    Float64,
    /// Metadata token
    Token,
    /// Branch target encoded as a signed 8-bit displacement
    ShortTarget,
    /// Branch target encoded as a signed 32-bit displacement
    Target,
    /// Jump table of signed 32-bit displacements
    Switch,
}

/// Immediate values embedded in an instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Immediate {
    /// Signed 8-bit immediate value
    Int8(i8),
    /// Unsigned 8-bit immediate value
    UInt8(u8),
    /// Unsigned 16-bit immediate value
    UInt16(u16),
    /// Signed 32-bit immediate value
    Int32(i32),
    /// Signed 64-bit immediate value
    Int64(i64),
    /// 32-bit floating point immediate value
    Float32(f32),
    /// 64-bit floating point immediate value
    Float64(f64),
}

impl Immediate {
    fn operand_type(&self) -> OperandType {
        match self {
            Immediate::Int8(_) => OperandType::Int8,
            Immediate::UInt8(_) => OperandType::UInt8,
            Immediate::UInt16(_) => OperandType::UInt16,
            Immediate::Int32(_) => OperandType::Int32,
            Immediate::Int64(_) => OperandType::Int64,
            Immediate::Float32(_) => OperandType::Float32,
            Immediate::Float64(_) => OperandType::Float64,
        }
    }
}

impl fmt::Display for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Immediate::Int8(value) => write!(f, "{value}"),
            Immediate::UInt8(value) => write!(f, "{value}"),
            Immediate::UInt16(value) => write!(f, "{value}"),
            Immediate::Int32(value) => write!(f, "{value}"),
            Immediate::Int64(value) => write!(f, "{value}"),
            Immediate::Float32(value) => write!(f, "{value}"),
            Immediate::Float64(value) => write!(f, "{value}"),
        }
    }
}

/// Decoded operand of an instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand present
    None,
    /// Immediate value
    Immediate(Immediate),
    /// Metadata token reference
    Token(Token),
    /// Index of the branch target instruction
    Target(usize),
    /// Indices of the switch target instructions
    Switch(Vec<usize>),
}

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Falls through to the next instruction
    Sequential,
    /// Branches or falls through
    ConditionalBranch,
    /// Always branches
    UnconditionalBranch,
    /// Calls a method and returns to the next instruction
    Call,
    /// Returns from the method
    Return,
    /// Multi-way branch
    Switch,
    /// Throws an exception
    Throw,
    /// Ends a finally, fault or filter block
    EndFinally,
    /// Leaves a protected region
    Leave,
    /// Prefix modifying the following instruction
    Meta,
}

/// Static description of an opcode, as found in the opcode table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpCodeInfo {
    /// Assembler mnemonic
    pub mnemonic: &'static str,
    /// Operand encoding
    pub operand: OperandType,
    /// Control flow behavior
    pub flow: FlowType,
}

/// A CIL instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Prefix byte (0 if no prefix, `0xFE` for two-byte opcodes)
    pub prefix: u8,
    /// Primary opcode byte
    pub opcode: u8,
    /// Human-readable instruction mnemonic (e.g., "call", "br.s", "ret")
    pub mnemonic: &'static str,
    /// How this instruction affects control flow
    pub flow_type: FlowType,
    /// How the operand is encoded
    pub operand_type: OperandType,
    /// The operand data for this instruction
    pub operand: Operand,
}

impl Instruction {
    /// Build an instruction, checking the operand against the opcode's operand type.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an unknown opcode or a mismatched operand.
    pub fn new(prefix: u8, opcode: u8, operand: Operand) -> Result<Self> {
        let Some(info) = opcode_info(prefix, opcode) else {
            return Err(malformed_error!("Invalid opcode: {:02X} {:02X}", prefix, opcode));
        };

        let fits = match (&operand, info.operand) {
            (Operand::None, OperandType::None)
            | (Operand::Token(_), OperandType::Token)
            | (Operand::Target(_), OperandType::ShortTarget | OperandType::Target)
            | (Operand::Switch(_), OperandType::Switch) => true,
            (Operand::Immediate(value), expected) => value.operand_type() == expected,
            _ => false,
        };
        if !fits {
            return Err(malformed_error!(
                "Operand {:?} does not fit '{}'",
                operand,
                info.mnemonic
            ));
        }

        Ok(Instruction {
            prefix,
            opcode,
            mnemonic: info.mnemonic,
            flow_type: info.flow,
            operand_type: info.operand,
            operand,
        })
    }

    /// Build an instruction without an operand.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the opcode is unknown or requires an operand.
    pub fn simple(prefix: u8, opcode: u8) -> Result<Self> {
        Self::new(prefix, opcode, Operand::None)
    }

    /// Build a `call <token>` instruction.
    #[must_use]
    pub fn call(token: Token) -> Self {
        Instruction {
            prefix: 0,
            opcode: opcodes::CALL,
            mnemonic: "call",
            flow_type: FlowType::Call,
            operand_type: OperandType::Token,
            operand: Operand::Token(token),
        }
    }

    /// True for `call` and `callvirt`
    #[must_use]
    pub fn is_call(&self) -> bool {
        self.prefix == 0 && matches!(self.opcode, opcodes::CALL | opcodes::CALLVIRT)
    }

    /// The token operand, if the instruction has one
    #[must_use]
    pub fn token(&self) -> Option<Token> {
        match self.operand {
            Operand::Token(token) => Some(token),
            _ => None,
        }
    }

    /// Check if this instruction can alter control flow by jumping elsewhere.
    #[must_use]
    pub fn is_branch(&self) -> bool {
        matches!(
            self.flow_type,
            FlowType::ConditionalBranch
                | FlowType::UnconditionalBranch
                | FlowType::Switch
                | FlowType::Leave
        )
    }

    /// Check if this instruction ends a basic block.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.flow_type,
            FlowType::ConditionalBranch
                | FlowType::UnconditionalBranch
                | FlowType::Return
                | FlowType::Switch
                | FlowType::Throw
                | FlowType::Leave
                | FlowType::EndFinally
        )
    }

    /// Indices of the instructions this instruction can jump to
    #[must_use]
    pub fn targets(&self) -> Vec<usize> {
        match &self.operand {
            Operand::Target(target) => vec![*target],
            Operand::Switch(targets) => targets.clone(),
            _ => Vec::new(),
        }
    }

    /// Encoded size in bytes, in the instruction's current form
    #[must_use]
    pub fn size(&self) -> usize {
        let opcode_len = if self.prefix == 0 { 1 } else { 2 };
        let operand_len = match (&self.operand_type, &self.operand) {
            (OperandType::None, _) => 0,
            (OperandType::Int8 | OperandType::UInt8 | OperandType::ShortTarget, _) => 1,
            (OperandType::UInt16, _) => 2,
            (
                OperandType::Int32 | OperandType::Float32 | OperandType::Token | OperandType::Target,
                _,
            ) => 4,
            (OperandType::Int64 | OperandType::Float64, _) => 8,
            (OperandType::Switch, Operand::Switch(targets)) => 4 + 4 * targets.len(),
            (OperandType::Switch, _) => 4,
        };
        opcode_len + operand_len
    }

    /// Renumber branch targets after an instruction was inserted at `position + 1`.
    pub(crate) fn shift_targets(&mut self, position: usize) {
        match &mut self.operand {
            Operand::Target(target) if *target > position => *target += 1,
            Operand::Switch(targets) => {
                for target in targets.iter_mut().filter(|target| **target > position) {
                    *target += 1;
                }
            }
            _ => {}
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.operand {
            Operand::None => write!(f, "{}", self.mnemonic),
            Operand::Immediate(value) => write!(f, "{} {}", self.mnemonic, value),
            Operand::Token(token) => write!(f, "{} {}", self.mnemonic, token),
            Operand::Target(target) => write!(f, "{} IL_#{}", self.mnemonic, target),
            Operand::Switch(targets) => {
                let rendered: Vec<String> = targets.iter().map(|t| format!("IL_#{t}")).collect();
                write!(f, "{} ({})", self.mnemonic, rendered.join(", "))
            }
        }
    }
}

/// Mapping between instruction indices and byte offsets of an encoded instruction stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CodeLayout {
    offsets: Vec<u32>,
    code_size: u32,
}

impl CodeLayout {
    pub(crate) fn new(offsets: Vec<u32>, code_size: u32) -> Self {
        CodeLayout { offsets, code_size }
    }

    /// Byte offset of instruction `index`; `index == len` maps to the end of the code
    #[must_use]
    pub fn offset_of(&self, index: usize) -> Option<u32> {
        if index == self.offsets.len() {
            return Some(self.code_size);
        }
        self.offsets.get(index).copied()
    }

    /// Index of the instruction starting at `offset`; the end of the code maps to `len`
    #[must_use]
    pub fn index_at(&self, offset: u32) -> Option<usize> {
        if offset == self.code_size {
            return Some(self.offsets.len());
        }
        self.offsets.binary_search(&offset).ok()
    }

    /// Size of the encoded code in bytes
    #[must_use]
    pub fn code_size(&self) -> u32 {
        self.code_size
    }

    /// Number of instructions
    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// True if there are no instructions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_checks_operands() {
        assert!(Instruction::new(0, opcodes::RET, Operand::None).is_ok());
        assert!(Instruction::new(0, opcodes::RET, Operand::Target(1)).is_err());
        assert!(Instruction::new(0, opcodes::LDC_I4_S, Operand::Immediate(Immediate::Int8(3))).is_ok());
        assert!(
            Instruction::new(0, opcodes::LDC_I4_S, Operand::Immediate(Immediate::Int32(3))).is_err()
        );
        assert!(Instruction::new(0, 0x24, Operand::None).is_err());
    }

    #[test]
    fn call_matches_table() {
        let built = Instruction::call(Token::new(0x0A000002));
        let looked_up =
            Instruction::new(0, opcodes::CALL, Operand::Token(Token::new(0x0A000002))).unwrap();
        assert_eq!(built, looked_up);
        assert!(built.is_call());
        assert_eq!(built.size(), 5);
    }

    #[test]
    fn sizes() {
        let br_s = Instruction::new(0, opcodes::BR_S, Operand::Target(0)).unwrap();
        assert_eq!(br_s.size(), 2);

        let switch = Instruction::new(0, opcodes::SWITCH, Operand::Switch(vec![0, 1, 2])).unwrap();
        assert_eq!(switch.size(), 17);

        let ceq = Instruction::simple(opcodes::FE_PREFIX, opcodes::FE_CEQ).unwrap();
        assert_eq!(ceq.size(), 2);
    }

    #[test]
    fn shift_targets_only_after_position() {
        let mut branch = Instruction::new(0, opcodes::BR, Operand::Target(3)).unwrap();
        branch.shift_targets(3);
        assert_eq!(branch.targets(), vec![3]);
        branch.shift_targets(2);
        assert_eq!(branch.targets(), vec![4]);

        let mut switch = Instruction::new(0, opcodes::SWITCH, Operand::Switch(vec![1, 5, 2])).unwrap();
        switch.shift_targets(1);
        assert_eq!(switch.targets(), vec![1, 6, 3]);
    }

    #[test]
    fn layout_lookup() {
        let layout = CodeLayout::new(vec![0, 1, 6], 7);
        assert_eq!(layout.index_at(6), Some(2));
        assert_eq!(layout.index_at(7), Some(3));
        assert_eq!(layout.index_at(3), None);
        assert_eq!(layout.offset_of(3), Some(7));
        assert_eq!(layout.offset_of(4), None);
    }

    #[test]
    fn display() {
        let call = Instruction::call(Token::new(0x0A000001));
        assert_eq!(call.to_string(), "call 0x0a000001");
        let br = Instruction::new(0, opcodes::BRTRUE_S, Operand::Target(7)).unwrap();
        assert_eq!(br.to_string(), "brtrue.s IL_#7");
    }
}
