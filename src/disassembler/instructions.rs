//! The CIL opcode table (ECMA-335, Partition III).
//!
//! [`opcode_info`] maps a `(prefix, opcode)` pair to its mnemonic, operand encoding and control
//! flow behavior. Reserved and unassigned opcodes return `None`.

use crate::disassembler::{
    instruction::{FlowType as F, OpCodeInfo, OperandType as O},
    opcodes::FE_PREFIX,
};

const fn op(mnemonic: &'static str, operand: O, flow: F) -> OpCodeInfo {
    OpCodeInfo {
        mnemonic,
        operand,
        flow,
    }
}

const fn seq(mnemonic: &'static str) -> OpCodeInfo {
    op(mnemonic, O::None, F::Sequential)
}

const fn tok(mnemonic: &'static str) -> OpCodeInfo {
    op(mnemonic, O::Token, F::Sequential)
}

/// Look up an opcode. `prefix` is `0` for single-byte opcodes and `0xFE` for two-byte ones.
#[must_use]
pub fn opcode_info(prefix: u8, opcode: u8) -> Option<OpCodeInfo> {
    match prefix {
        0 => single_byte(opcode),
        FE_PREFIX => two_byte(opcode),
        _ => None,
    }
}

/// Iterate over every defined `(prefix, opcode, info)` triple.
pub fn all_opcodes() -> impl Iterator<Item = (u8, u8, OpCodeInfo)> {
    let single = (0..=u8::MAX).filter_map(|code| single_byte(code).map(|info| (0, code, info)));
    let double =
        (0..=u8::MAX).filter_map(|code| two_byte(code).map(|info| (FE_PREFIX, code, info)));
    single.chain(double)
}

#[allow(clippy::too_many_lines)]
fn single_byte(opcode: u8) -> Option<OpCodeInfo> {
    let info = match opcode {
        0x00 => seq("nop"),
        0x01 => seq("break"),
        0x02 => seq("ldarg.0"),
        0x03 => seq("ldarg.1"),
        0x04 => seq("ldarg.2"),
        0x05 => seq("ldarg.3"),
        0x06 => seq("ldloc.0"),
        0x07 => seq("ldloc.1"),
        0x08 => seq("ldloc.2"),
        0x09 => seq("ldloc.3"),
        0x0A => seq("stloc.0"),
        0x0B => seq("stloc.1"),
        0x0C => seq("stloc.2"),
        0x0D => seq("stloc.3"),
        0x0E => op("ldarg.s", O::UInt8, F::Sequential),
        0x0F => op("ldarga.s", O::UInt8, F::Sequential),
        0x10 => op("starg.s", O::UInt8, F::Sequential),
        0x11 => op("ldloc.s", O::UInt8, F::Sequential),
        0x12 => op("ldloca.s", O::UInt8, F::Sequential),
        0x13 => op("stloc.s", O::UInt8, F::Sequential),
        0x14 => seq("ldnull"),
        0x15 => seq("ldc.i4.m1"),
        0x16 => seq("ldc.i4.0"),
        0x17 => seq("ldc.i4.1"),
        0x18 => seq("ldc.i4.2"),
        0x19 => seq("ldc.i4.3"),
        0x1A => seq("ldc.i4.4"),
        0x1B => seq("ldc.i4.5"),
        0x1C => seq("ldc.i4.6"),
        0x1D => seq("ldc.i4.7"),
        0x1E => seq("ldc.i4.8"),
        0x1F => op("ldc.i4.s", O::Int8, F::Sequential),
        0x20 => op("ldc.i4", O::Int32, F::Sequential),
        0x21 => op("ldc.i8", O::Int64, F::Sequential),
        0x22 => op("ldc.r4", O::Float32, F::Sequential),
        0x23 => op("ldc.r8", O::Float64, F::Sequential),
        0x25 => seq("dup"),
        0x26 => seq("pop"),
        0x27 => op("jmp", O::Token, F::Call),
        0x28 => op("call", O::Token, F::Call),
        0x29 => op("calli", O::Token, F::Call),
        0x2A => op("ret", O::None, F::Return),
        0x2B => op("br.s", O::ShortTarget, F::UnconditionalBranch),
        0x2C => op("brfalse.s", O::ShortTarget, F::ConditionalBranch),
        0x2D => op("brtrue.s", O::ShortTarget, F::ConditionalBranch),
        0x2E => op("beq.s", O::ShortTarget, F::ConditionalBranch),
        0x2F => op("bge.s", O::ShortTarget, F::ConditionalBranch),
        0x30 => op("bgt.s", O::ShortTarget, F::ConditionalBranch),
        0x31 => op("ble.s", O::ShortTarget, F::ConditionalBranch),
        0x32 => op("blt.s", O::ShortTarget, F::ConditionalBranch),
        0x33 => op("bne.un.s", O::ShortTarget, F::ConditionalBranch),
        0x34 => op("bge.un.s", O::ShortTarget, F::ConditionalBranch),
        0x35 => op("bgt.un.s", O::ShortTarget, F::ConditionalBranch),
        0x36 => op("ble.un.s", O::ShortTarget, F::ConditionalBranch),
        0x37 => op("blt.un.s", O::ShortTarget, F::ConditionalBranch),
        0x38 => op("br", O::Target, F::UnconditionalBranch),
        0x39 => op("brfalse", O::Target, F::ConditionalBranch),
        0x3A => op("brtrue", O::Target, F::ConditionalBranch),
        0x3B => op("beq", O::Target, F::ConditionalBranch),
        0x3C => op("bge", O::Target, F::ConditionalBranch),
        0x3D => op("bgt", O::Target, F::ConditionalBranch),
        0x3E => op("ble", O::Target, F::ConditionalBranch),
        0x3F => op("blt", O::Target, F::ConditionalBranch),
        0x40 => op("bne.un", O::Target, F::ConditionalBranch),
        0x41 => op("bge.un", O::Target, F::ConditionalBranch),
        0x42 => op("bgt.un", O::Target, F::ConditionalBranch),
        0x43 => op("ble.un", O::Target, F::ConditionalBranch),
        0x44 => op("blt.un", O::Target, F::ConditionalBranch),
        0x45 => op("switch", O::Switch, F::Switch),
        0x46 => seq("ldind.i1"),
        0x47 => seq("ldind.u1"),
        0x48 => seq("ldind.i2"),
        0x49 => seq("ldind.u2"),
        0x4A => seq("ldind.i4"),
        0x4B => seq("ldind.u4"),
        0x4C => seq("ldind.i8"),
        0x4D => seq("ldind.i"),
        0x4E => seq("ldind.r4"),
        0x4F => seq("ldind.r8"),
        0x50 => seq("ldind.ref"),
        0x51 => seq("stind.ref"),
        0x52 => seq("stind.i1"),
        0x53 => seq("stind.i2"),
        0x54 => seq("stind.i4"),
        0x55 => seq("stind.i8"),
        0x56 => seq("stind.r4"),
        0x57 => seq("stind.r8"),
        0x58 => seq("add"),
        0x59 => seq("sub"),
        0x5A => seq("mul"),
        0x5B => seq("div"),
        0x5C => seq("div.un"),
        0x5D => seq("rem"),
        0x5E => seq("rem.un"),
        0x5F => seq("and"),
        0x60 => seq("or"),
        0x61 => seq("xor"),
        0x62 => seq("shl"),
        0x63 => seq("shr"),
        0x64 => seq("shr.un"),
        0x65 => seq("neg"),
        0x66 => seq("not"),
        0x67 => seq("conv.i1"),
        0x68 => seq("conv.i2"),
        0x69 => seq("conv.i4"),
        0x6A => seq("conv.i8"),
        0x6B => seq("conv.r4"),
        0x6C => seq("conv.r8"),
        0x6D => seq("conv.u4"),
        0x6E => seq("conv.u8"),
        0x6F => op("callvirt", O::Token, F::Call),
        0x70 => tok("cpobj"),
        0x71 => tok("ldobj"),
        0x72 => tok("ldstr"),
        0x73 => op("newobj", O::Token, F::Call),
        0x74 => tok("castclass"),
        0x75 => tok("isinst"),
        0x76 => seq("conv.r.un"),
        0x79 => tok("unbox"),
        0x7A => op("throw", O::None, F::Throw),
        0x7B => tok("ldfld"),
        0x7C => tok("ldflda"),
        0x7D => tok("stfld"),
        0x7E => tok("ldsfld"),
        0x7F => tok("ldsflda"),
        0x80 => tok("stsfld"),
        0x81 => tok("stobj"),
        0x82 => seq("conv.ovf.i1.un"),
        0x83 => seq("conv.ovf.i2.un"),
        0x84 => seq("conv.ovf.i4.un"),
        0x85 => seq("conv.ovf.i8.un"),
        0x86 => seq("conv.ovf.u1.un"),
        0x87 => seq("conv.ovf.u2.un"),
        0x88 => seq("conv.ovf.u4.un"),
        0x89 => seq("conv.ovf.u8.un"),
        0x8A => seq("conv.ovf.i.un"),
        0x8B => seq("conv.ovf.u.un"),
        0x8C => tok("box"),
        0x8D => tok("newarr"),
        0x8E => seq("ldlen"),
        0x8F => tok("ldelema"),
        0x90 => seq("ldelem.i1"),
        0x91 => seq("ldelem.u1"),
        0x92 => seq("ldelem.i2"),
        0x93 => seq("ldelem.u2"),
        0x94 => seq("ldelem.i4"),
        0x95 => seq("ldelem.u4"),
        0x96 => seq("ldelem.i8"),
        0x97 => seq("ldelem.i"),
        0x98 => seq("ldelem.r4"),
        0x99 => seq("ldelem.r8"),
        0x9A => seq("ldelem.ref"),
        0x9B => seq("stelem.i"),
        0x9C => seq("stelem.i1"),
        0x9D => seq("stelem.i2"),
        0x9E => seq("stelem.i4"),
        0x9F => seq("stelem.i8"),
        0xA0 => seq("stelem.r4"),
        0xA1 => seq("stelem.r8"),
        0xA2 => seq("stelem.ref"),
        0xA3 => tok("ldelem"),
        0xA4 => tok("stelem"),
        0xA5 => tok("unbox.any"),
        0xB3 => seq("conv.ovf.i1"),
        0xB4 => seq("conv.ovf.u1"),
        0xB5 => seq("conv.ovf.i2"),
        0xB6 => seq("conv.ovf.u2"),
        0xB7 => seq("conv.ovf.i4"),
        0xB8 => seq("conv.ovf.u4"),
        0xB9 => seq("conv.ovf.i8"),
        0xBA => seq("conv.ovf.u8"),
        0xC2 => tok("refanyval"),
        0xC3 => seq("ckfinite"),
        0xC6 => tok("mkrefany"),
        0xD0 => tok("ldtoken"),
        0xD1 => seq("conv.u2"),
        0xD2 => seq("conv.u1"),
        0xD3 => seq("conv.i"),
        0xD4 => seq("conv.ovf.i"),
        0xD5 => seq("conv.ovf.u"),
        0xD6 => seq("add.ovf"),
        0xD7 => seq("add.ovf.un"),
        0xD8 => seq("mul.ovf"),
        0xD9 => seq("mul.ovf.un"),
        0xDA => seq("sub.ovf"),
        0xDB => seq("sub.ovf.un"),
        0xDC => op("endfinally", O::None, F::EndFinally),
        0xDD => op("leave", O::Target, F::Leave),
        0xDE => op("leave.s", O::ShortTarget, F::Leave),
        0xDF => seq("stind.i"),
        0xE0 => seq("conv.u"),
        _ => return None,
    };
    Some(info)
}

fn two_byte(opcode: u8) -> Option<OpCodeInfo> {
    let info = match opcode {
        0x00 => seq("arglist"),
        0x01 => seq("ceq"),
        0x02 => seq("cgt"),
        0x03 => seq("cgt.un"),
        0x04 => seq("clt"),
        0x05 => seq("clt.un"),
        0x06 => tok("ldftn"),
        0x07 => tok("ldvirtftn"),
        0x09 => op("ldarg", O::UInt16, F::Sequential),
        0x0A => op("ldarga", O::UInt16, F::Sequential),
        0x0B => op("starg", O::UInt16, F::Sequential),
        0x0C => op("ldloc", O::UInt16, F::Sequential),
        0x0D => op("ldloca", O::UInt16, F::Sequential),
        0x0E => op("stloc", O::UInt16, F::Sequential),
        0x0F => seq("localloc"),
        0x11 => op("endfilter", O::None, F::EndFinally),
        0x12 => op("unaligned.", O::UInt8, F::Meta),
        0x13 => op("volatile.", O::None, F::Meta),
        0x14 => op("tail.", O::None, F::Meta),
        0x15 => tok("initobj"),
        0x16 => op("constrained.", O::Token, F::Meta),
        0x17 => seq("cpblk"),
        0x18 => seq("initblk"),
        0x19 => op("no.", O::UInt8, F::Meta),
        0x1A => op("rethrow", O::None, F::Throw),
        0x1C => tok("sizeof"),
        0x1D => seq("refanytype"),
        0x1E => op("readonly.", O::None, F::Meta),
        _ => return None,
    };
    Some(info)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn table_size() {
        assert_eq!(all_opcodes().filter(|(prefix, _, _)| *prefix == 0).count(), 191);
        assert_eq!(
            all_opcodes().filter(|(prefix, _, _)| *prefix == FE_PREFIX).count(),
            28
        );
    }

    #[test]
    fn mnemonics_are_unique() {
        let mut seen = HashSet::new();
        for (_, _, info) in all_opcodes() {
            assert!(seen.insert(info.mnemonic), "duplicate {}", info.mnemonic);
        }
    }

    #[test]
    fn reserved_are_absent() {
        assert!(opcode_info(0, 0x24).is_none());
        assert!(opcode_info(0, 0xA6).is_none());
        assert!(opcode_info(0, 0xE1).is_none());
        assert!(opcode_info(FE_PREFIX, 0x08).is_none());
        assert!(opcode_info(FE_PREFIX, 0x1F).is_none());
        assert!(opcode_info(0x01, 0x00).is_none());
    }

    #[test]
    fn calls() {
        let call = opcode_info(0, 0x28).unwrap();
        assert_eq!(call.mnemonic, "call");
        assert_eq!(call.operand, O::Token);
        assert_eq!(call.flow, F::Call);

        let callvirt = opcode_info(0, 0x6F).unwrap();
        assert_eq!(callvirt.mnemonic, "callvirt");
    }
}
