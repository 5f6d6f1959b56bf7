//! CIL instruction decoding and encoding.
//!
//! Method bodies are edited as a list of [`Instruction`]s whose branch operands are indices into
//! that list rather than byte displacements. [`decode_stream`] produces that form from raw CIL
//! bytes, [`encode_stream`] turns it back into bytes, recomputing every displacement and
//! promoting short branches when an edit pushed their target out of range.
//!
//! # Key Types
//! - [`Instruction`] - A decoded CIL instruction
//! - [`Operand`] - Instruction operands (immediates, tokens, targets)
//! - [`FlowType`] - How instructions affect control flow
//! - [`CodeLayout`] - Byte offset of every instruction in an encoded stream
//!
//! # Example
//! ```rust,no_run
//! use cilhook::disassembler::decode_instruction;
//! use cilhook::Parser;
//! let bytecode = &[0x00, 0x2A]; // nop, ret
//! let mut parser = Parser::new(bytecode);
//! let instruction = decode_instruction(&mut parser)?;
//! println!("Mnemonic: {}", instruction.instruction.mnemonic);
//! # Ok::<(), cilhook::Error>(())
//! ```

mod decoder;
mod encoder;
mod instruction;
mod instructions;
pub mod opcodes;

pub use decoder::{decode_instruction, decode_stream, RawInstruction};
pub use encoder::{encode_stream, EncodedCode};
pub use instruction::{
    CodeLayout, FlowType, Immediate, Instruction, OpCodeInfo, Operand, OperandType,
};
pub use instructions::{all_opcodes, opcode_info};
