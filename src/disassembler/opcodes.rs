//! CIL opcode byte constants (ECMA-335), for the opcodes this crate refers to by name.
//!
//! Two-byte opcodes share the [`FE_PREFIX`] first byte; their second byte carries an `FE_`
//! prefix here (e.g. [`FE_CEQ`] = `0x01` for `ceq`, encoded `0xFE 0x01`).
#![allow(missing_docs)]

pub const NOP: u8 = 0x00;
pub const LDARG_0: u8 = 0x02;
pub const LDLOC_0: u8 = 0x06;
pub const STLOC_0: u8 = 0x0A;
pub const LDNULL: u8 = 0x14;
pub const LDC_I4_0: u8 = 0x16;
pub const LDC_I4_1: u8 = 0x17;
pub const LDC_I4_S: u8 = 0x1F;
pub const LDC_I4: u8 = 0x20;
pub const POP: u8 = 0x26;

// Call / return
pub const CALL: u8 = 0x28;
pub const RET: u8 = 0x2A;

// Branch (short form)
pub const BR_S: u8 = 0x2B;
pub const BRFALSE_S: u8 = 0x2C;
pub const BRTRUE_S: u8 = 0x2D;
pub const BLT_UN_S: u8 = 0x37;

// Branch (long form)
pub const BR: u8 = 0x38;
pub const BRFALSE: u8 = 0x39;
pub const BRTRUE: u8 = 0x3A;
pub const BLT_UN: u8 = 0x44;
pub const SWITCH: u8 = 0x45;

pub const CALLVIRT: u8 = 0x6F;
pub const LDSTR: u8 = 0x72;
pub const NEWOBJ: u8 = 0x73;
pub const THROW: u8 = 0x7A;
pub const LDSFLD: u8 = 0x7E;
pub const STSFLD: u8 = 0x80;

// Exception handling
pub const ENDFINALLY: u8 = 0xDC;
pub const LEAVE: u8 = 0xDD;
pub const LEAVE_S: u8 = 0xDE;

// Two-byte opcodes
pub const FE_PREFIX: u8 = 0xFE;
pub const FE_CEQ: u8 = 0x01;
pub const FE_ENDFILTER: u8 = 0x11;
pub const FE_RETHROW: u8 = 0x1A;

/// Long form of a short branch opcode, `None` if `opcode` is not a short branch.
#[must_use]
pub fn long_form(opcode: u8) -> Option<u8> {
    match opcode {
        BR_S..=BLT_UN_S => Some(opcode + (BR - BR_S)),
        LEAVE_S => Some(LEAVE),
        _ => None,
    }
}
