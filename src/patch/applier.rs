//! Inserting the entry call.

use log::info;

use crate::{
    config::HookSpec,
    disassembler::Instruction,
    image::Image,
    metadata::{memberref::MemberRef, token::Token},
    patch::{detector::is_injected, locator::HookPoint},
    Error, Result,
};

/// Result of a successful insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Insertion {
    /// Index of the patched method
    pub method: usize,
    /// Index of the inserted call
    pub position: usize,
    /// Token the call refers to
    pub token: Token,
    /// Instruction count after the insertion
    pub instruction_count: usize,
}

/// Find the entry method in the loader image and return a reference to it.
///
/// Exactly one method with the entry name must exist on the entry type, and it must be a static
/// method returning `System.Void` without parameters. The reference is scoped to the loader's
/// assembly identity when the loader is an assembly.
///
/// # Errors
/// Returns [`Error::EntryNotFound`], [`Error::EntryAmbiguous`] or [`Error::EntrySignature`].
pub fn resolve_entry(loader: &Image, spec: &HookSpec) -> Result<MemberRef> {
    let not_found = || Error::EntryNotFound {
        type_name: spec.entry_type.clone(),
        method_name: spec.entry_method.clone(),
    };

    let entry_type = loader.find_type(&spec.entry_type).ok_or_else(not_found)?;
    let candidates: Vec<_> = loader
        .methods_of(entry_type)
        .filter(|(_, method)| method.name == spec.entry_method)
        .collect();

    let (index, method) = match candidates.as_slice() {
        [] => return Err(not_found()),
        [single] => *single,
        _ => {
            return Err(Error::EntryAmbiguous {
                type_name: spec.entry_type.clone(),
                method_name: spec.entry_method.clone(),
                count: candidates.len(),
            })
        }
    };

    if !method.is_static() || !method.signature.returns_void() || !method.signature.params.is_empty()
    {
        return Err(Error::EntrySignature(format!(
            "{} must be static, return System.Void and take no parameters",
            loader.method_full_name(index)
        )));
    }

    Ok(MemberRef::new(
        spec.entry_type.clone(),
        spec.entry_method.clone(),
        spec.entry_sig(),
    )
    .with_scope(loader.identity().cloned()))
}

/// Insert `call <entry>` right after the hook point.
///
/// # Errors
/// Returns [`Error::AlreadyInjected`] without touching the image if it already calls the entry,
/// and [`Error::Malformed`] if the hook point no longer matches the method.
pub fn apply(
    image: &mut Image,
    point: &HookPoint,
    entry: &MemberRef,
    spec: &HookSpec,
) -> Result<Insertion> {
    if is_injected(image, spec) {
        return Err(Error::AlreadyInjected);
    }

    let current = image
        .method(point.method)
        .and_then(|method| method.body.as_ref())
        .map(|body| body.instructions.len());
    if current != Some(point.instruction_count) {
        return Err(malformed_error!(
            "Method {} changed since the hook point was located",
            point.method
        ));
    }

    let token = image.import(entry);
    let full_name = image.method_full_name(point.method);

    let Some(body) = image
        .method_mut(point.method)
        .and_then(|method| method.body.as_mut())
    else {
        return Err(malformed_error!("Method {} has no body", point.method));
    };
    body.insert_after(point.position, Instruction::call(token))?;

    info!(
        "Inserted call {} at {} in {}",
        entry.full_name(),
        point.position + 1,
        full_name
    );

    Ok(Insertion {
        method: point.method,
        position: point.position + 1,
        token,
        instruction_count: body.instructions.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        disassembler::{opcodes, Operand},
        metadata::{
            method::{MethodAttributes, MethodBody, MethodDef},
            signature::MethodSig,
        },
        patch::locator::locate,
        test::{ins, sample_image, sample_loader},
    };

    #[test]
    fn resolve_sample_entry() {
        let entry = resolve_entry(&sample_loader(), &HookSpec::default()).unwrap();
        assert_eq!(entry.full_name(), "System.Void CilHook.ModLoader::Init()");
    }

    #[test]
    fn resolve_rejects_bad_entries() {
        let spec = HookSpec::default();
        assert!(matches!(
            resolve_entry(&Image::new(), &spec),
            Err(Error::EntryNotFound { .. })
        ));

        let mut loader = sample_loader();
        let owner = loader.find_type("CilHook.ModLoader").unwrap();
        loader
            .add_method(MethodDef::new(
                "Init",
                MethodAttributes::PUBLIC | MethodAttributes::STATIC,
                owner,
                MethodSig::new_static("System.Void", vec!["System.String".into()]),
                None,
            ))
            .unwrap();
        assert!(matches!(
            resolve_entry(&loader, &spec),
            Err(Error::EntryAmbiguous { count: 2, .. })
        ));

        let mut loader = Image::new();
        let owner = loader
            .add_type(crate::metadata::typedef::TypeDef::new("CilHook", "ModLoader"))
            .unwrap();
        loader
            .add_method(MethodDef::new(
                "Init",
                MethodAttributes::PUBLIC,
                owner,
                MethodSig::new_instance("System.Void", vec![]),
                Some(MethodBody::new(vec![ins(opcodes::RET)])),
            ))
            .unwrap();
        assert!(matches!(
            resolve_entry(&loader, &spec),
            Err(Error::EntrySignature(_))
        ));
    }

    #[test]
    fn insertion_postcondition() {
        let mut image = sample_image();
        let spec = HookSpec::default();
        let point = locate(&image, &spec).unwrap();
        let before = image.methods()[0].body.clone().unwrap().instructions;
        let entry = resolve_entry(&sample_loader(), &spec).unwrap();

        let insertion = apply(&mut image, &point, &entry, &spec).unwrap();
        assert_eq!(insertion.position, 2);
        assert_eq!(insertion.instruction_count, before.len() + 1);

        let after = &image.methods()[0].body.as_ref().unwrap().instructions;
        assert_eq!(&after[..2], &before[..2]);
        assert_eq!(after[2], Instruction::call(insertion.token));
        assert_eq!(after[3], before[2]);
        // brfalse.s 5 now targets the ret at 6
        assert_eq!(after[4].operand, Operand::Target(6));
        assert_eq!(&after[5..], &before[4..]);

        assert!(is_injected(&image, &spec));
    }

    #[test]
    fn second_apply_is_refused_before_mutation() {
        let mut image = sample_image();
        let spec = HookSpec::default();
        let point = locate(&image, &spec).unwrap();
        let entry = resolve_entry(&sample_loader(), &spec).unwrap();
        apply(&mut image, &point, &entry, &spec).unwrap();

        let snapshot = image.clone();
        let point = locate(&image, &spec).unwrap();
        assert!(matches!(
            apply(&mut image, &point, &entry, &spec),
            Err(Error::AlreadyInjected)
        ));
        assert_eq!(image, snapshot);
    }

    #[test]
    fn stale_hook_point() {
        let mut image = sample_image();
        let spec = HookSpec::default();
        let mut point = locate(&image, &spec).unwrap();
        point.instruction_count += 1;
        let entry = resolve_entry(&sample_loader(), &spec).unwrap();
        assert!(matches!(
            apply(&mut image, &point, &entry, &spec),
            Err(Error::Malformed { .. })
        ));
    }
}
