//! Shared fixtures for unit tests.
//!
//! `sample_image` models a small host module:
//!
//! ```text
//! <Module>                         (type 0)
//! GameManager                      (type 1)
//!   Awake()   : ldarg.0, call DontDestroyOnLoad, ldarg.0, brfalse.s 5, nop, ret
//!   Start()   : IEnumerator, ldnull, ret
//!   Update()  : no body
//!   <Start>d__3                    (type 2, nested)
//!     MoveNext(): nop, ldnull, call DontDestroyOnLoad, ldc.i4.0, ret
//! ```
//!
//! `sample_loader` defines `CilHook.ModLoader::Init()` in assembly `CilHook` 1.2.0.0.
//!
//! Both are built in memory; `write_samples` emits them as PE DLLs.

pub mod pe;

use std::path::{Path, PathBuf};

use crate::{
    disassembler::{opcodes, Instruction, Operand},
    image::Image,
    metadata::{
        identity::AssemblyIdentity,
        memberref::MemberRef,
        method::{MethodAttributes, MethodBody, MethodDef},
        signature::MethodSig,
        token::Token,
        typedef::TypeDef,
    },
};

pub const DONT_DESTROY: Token = Token(0x0A00_0001);
pub const DEBUG_LOG: Token = Token(0x0A00_0002);

pub fn ins(opcode: u8) -> Instruction {
    Instruction::simple(0, opcode).unwrap()
}

pub fn body(instructions: Vec<Instruction>) -> Option<MethodBody> {
    Some(MethodBody::new(instructions))
}

pub fn sample_image() -> Image {
    let mut image = Image::new();

    image.add_member_ref(MemberRef::new(
        "UnityEngine.Object",
        "DontDestroyOnLoad",
        MethodSig::new_static("System.Void", vec!["UnityEngine.Object".into()]),
    ));
    image.add_member_ref(MemberRef::new(
        "UnityEngine.Debug",
        "Log",
        MethodSig::new_static("System.Void", vec!["System.Object".into()]),
    ));

    let manager = image.add_type(TypeDef::new("", "GameManager")).unwrap();
    let state_machine = image
        .add_type(TypeDef::nested("<Start>d__3", manager))
        .unwrap();

    let instance = MethodAttributes::PRIVATE | MethodAttributes::HIDE_BY_SIG;
    image
        .add_method(MethodDef::new(
            "Awake",
            instance,
            manager,
            MethodSig::new_instance("System.Void", vec![]),
            body(vec![
                ins(opcodes::LDARG_0),
                Instruction::call(DONT_DESTROY),
                ins(opcodes::LDARG_0),
                Instruction::new(0, opcodes::BRFALSE_S, Operand::Target(5)).unwrap(),
                ins(opcodes::NOP),
                ins(opcodes::RET),
            ]),
        ))
        .unwrap();
    image
        .add_method(MethodDef::new(
            "Start",
            instance,
            manager,
            MethodSig::new_instance("System.Collections.IEnumerator", vec![]),
            body(vec![ins(opcodes::LDNULL), ins(opcodes::RET)]),
        ))
        .unwrap();
    image
        .add_method(MethodDef::new(
            "Update",
            instance | MethodAttributes::ABSTRACT | MethodAttributes::VIRTUAL,
            manager,
            MethodSig::new_instance("System.Void", vec![]),
            None,
        ))
        .unwrap();
    image
        .add_method(MethodDef::new(
            "MoveNext",
            MethodAttributes::PRIVATE | MethodAttributes::VIRTUAL,
            state_machine,
            MethodSig::new_instance("System.Boolean", vec![]),
            body(vec![
                ins(opcodes::NOP),
                ins(opcodes::LDNULL),
                Instruction::call(DONT_DESTROY),
                ins(opcodes::LDC_I4_0),
                ins(opcodes::RET),
            ]),
        ))
        .unwrap();

    image
}

pub fn sample_loader() -> Image {
    let mut image = Image::new();
    image.set_identity(Some(AssemblyIdentity::new("CilHook", [1, 2, 0, 0])));
    let loader = image.add_type(TypeDef::new("CilHook", "ModLoader")).unwrap();
    image
        .add_method(MethodDef::new(
            "Init",
            MethodAttributes::PUBLIC | MethodAttributes::STATIC,
            loader,
            MethodSig::void_static(),
            body(vec![ins(opcodes::RET)]),
        ))
        .unwrap();
    image
}

/// Write the sample host and loader images into `dir`.
pub fn write_samples(dir: &Path) -> (PathBuf, PathBuf) {
    let image = dir.join("Assembly-CSharp.dll");
    let loader = dir.join("CilHook.dll");
    sample_image().write_to(&image).unwrap();
    sample_loader().write_to(&loader).unwrap();
    (image, loader)
}
