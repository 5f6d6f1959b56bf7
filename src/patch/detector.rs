//! Detecting an existing entry call.
//!
//! An image is injected if any method on a top-level type, or on a type nested one level below
//! one, contains a `call` whose callee renders exactly as the configured entry signature. The
//! check reads only the image itself, so it gives the same answer on every re-open.

use std::path::Path;

use log::debug;

use crate::{config::HookSpec, disassembler::opcodes, image::Image, Result};

/// Deepest nesting level whose methods are scanned
const MAX_SCAN_DEPTH: usize = 1;

/// A `call` to the entry method found in an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Injection {
    /// Index of the calling method
    pub method: usize,
    /// Index of the call instruction
    pub position: usize,
}

/// All calls to the entry method, in method and instruction order.
#[must_use]
pub fn find_injections(image: &Image, spec: &HookSpec) -> Vec<Injection> {
    let expected = spec.entry_signature();
    let mut found = Vec::new();

    for (index, method) in image.methods().iter().enumerate() {
        if image.nesting_depth(method.declaring_type) > MAX_SCAN_DEPTH {
            continue;
        }
        let Some(body) = method.body.as_ref() else {
            continue;
        };

        for (position, instruction) in body.instructions.iter().enumerate() {
            if instruction.prefix != 0 || instruction.opcode != opcodes::CALL {
                continue;
            }
            let Some(token) = instruction.token() else {
                continue;
            };
            if image.call_signature(token).as_deref() == Some(expected.as_str()) {
                debug!(
                    "Entry call in {} at {}",
                    image.method_full_name(index),
                    position
                );
                found.push(Injection {
                    method: index,
                    position,
                });
            }
        }
    }

    found
}

/// True if the image already calls the entry method.
#[must_use]
pub fn is_injected(image: &Image, spec: &HookSpec) -> bool {
    !find_injections(image, spec).is_empty()
}

/// Open the image at `path` and check it.
///
/// # Errors
/// Returns an error if the image cannot be opened or parsed.
pub fn is_injected_at(path: &Path, spec: &HookSpec) -> Result<bool> {
    let image = Image::from_file(path)?;
    Ok(is_injected(&image, spec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        disassembler::{Instruction, Operand},
        metadata::{
            method::{MethodAttributes, MethodBody, MethodDef},
            signature::MethodSig,
            typedef::TypeDef,
        },
        test::{ins, sample_image},
    };

    fn inject_into(image: &mut Image, method: usize, instruction: Instruction) {
        image
            .method_mut(method)
            .unwrap()
            .body
            .as_mut()
            .unwrap()
            .insert_after(0, instruction)
            .unwrap();
    }

    #[test]
    fn clean_image() {
        assert!(!is_injected(&sample_image(), &HookSpec::default()));
    }

    #[test]
    fn detects_call() {
        let mut image = sample_image();
        let token = image.import_method("CilHook.ModLoader", "Init", &MethodSig::void_static());
        inject_into(&mut image, 0, Instruction::call(token));

        let found = find_injections(&image, &HookSpec::default());
        assert_eq!(found, vec![Injection { method: 0, position: 1 }]);
    }

    #[test]
    fn detects_in_nested_type() {
        let mut image = sample_image();
        let token = image.import_method("CilHook.ModLoader", "Init", &MethodSig::void_static());
        inject_into(&mut image, 3, Instruction::call(token));
        assert!(is_injected(&image, &HookSpec::default()));
    }

    #[test]
    fn ignores_deeper_nesting() {
        let mut image = sample_image();
        let token = image.import_method("CilHook.ModLoader", "Init", &MethodSig::void_static());
        let deep = image.add_type(TypeDef::nested("Deeper", 1)).unwrap();
        image
            .add_method(MethodDef::new(
                "Run",
                MethodAttributes::PRIVATE,
                deep,
                MethodSig::new_instance("System.Void", vec![]),
                Some(MethodBody::new(vec![
                    Instruction::call(token),
                    ins(opcodes::RET),
                ])),
            ))
            .unwrap();
        assert!(!is_injected(&image, &HookSpec::default()));
    }

    #[test]
    fn exact_signature_only() {
        let mut image = sample_image();
        let other_sig = MethodSig::new_static("System.Void", vec!["System.String".into()]);
        let token = image.import_method("CilHook.ModLoader", "Init", &other_sig);
        inject_into(&mut image, 0, Instruction::call(token));

        let token = image.import_method("CilHook.ModLoader", "InitLate", &MethodSig::void_static());
        inject_into(&mut image, 0, Instruction::call(token));

        assert!(!is_injected(&image, &HookSpec::default()));
    }

    #[test]
    fn callvirt_is_not_an_injection() {
        let mut image = sample_image();
        let token = image.import_method("CilHook.ModLoader", "Init", &MethodSig::void_static());
        inject_into(
            &mut image,
            0,
            Instruction::new(0, opcodes::CALLVIRT, Operand::Token(token)).unwrap(),
        );
        assert!(!is_injected(&image, &HookSpec::default()));
    }

    #[test]
    fn entry_defined_locally() {
        // A MethodDef token resolves too, not just MemberRefs
        let mut image = sample_image();
        let loader = image.add_type(TypeDef::new("CilHook", "ModLoader")).unwrap();
        let init = image
            .add_method(MethodDef::new(
                "Init",
                MethodAttributes::PUBLIC | MethodAttributes::STATIC,
                loader,
                MethodSig::void_static(),
                Some(MethodBody::new(vec![ins(opcodes::RET)])),
            ))
            .unwrap();
        let token = image.method_token(init);
        inject_into(&mut image, 0, Instruction::call(token));
        assert!(is_injected(&image, &HookSpec::default()));
    }
}
