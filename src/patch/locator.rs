//! Finding the instruction after which the entry call is inserted.
//!
//! The hook method is looked up by type full name and method name. If it is an iterator
//! (returns `IEnumerator`/`IEnumerable`) its code lives in a compiler-generated nested type, so
//! the search moves into that type's step method. The hook point is then the first
//! `call`/`callvirt` whose callee name contains the marker fragment.

use log::{debug, warn};

use crate::{
    config::HookSpec,
    image::Image,
    metadata::{method::MethodDef, signature::MethodSig},
    LocateError, Result,
};

/// Simple return type names that mark a method as an iterator
const ITERATOR_RETURN_TYPES: [&str; 2] = ["IEnumerator", "IEnumerable"];

/// Where the entry call goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookPoint {
    /// Index of the method containing the marker call
    pub method: usize,
    /// True if the hook method was an iterator and `method` is its step method
    pub iterator: bool,
    /// Index of the marker call; the entry call is inserted right after it
    pub position: usize,
    /// Number of instructions in `method` when it was located
    pub instruction_count: usize,
}

/// True if a method with this signature is compiled into a state machine.
#[must_use]
pub fn is_iterator_shaped(signature: &MethodSig) -> bool {
    ITERATOR_RETURN_TYPES.contains(&signature.return_simple_name())
}

fn find_method<'a>(image: &'a Image, type_index: usize, name: &str) -> Option<(usize, &'a MethodDef)> {
    image
        .methods_of(type_index)
        .find(|(_, method)| method.name == name)
}

/// Resolve the hook method, following iterator state machines, and find the marker call.
///
/// # Errors
/// Returns [`crate::Error::Locate`] if the hook type, method, state machine, step method or
/// marker call is missing, or if the target method has no body.
pub fn locate(image: &Image, spec: &HookSpec) -> Result<HookPoint> {
    let Some(hook_type) = image.find_type(&spec.hook_type) else {
        return Err(LocateError::TypeNotFound(spec.hook_type.clone()).into());
    };

    let Some((hook_index, hook_method)) = find_method(image, hook_type, &spec.hook_method) else {
        return Err(LocateError::MethodNotFound {
            type_name: spec.hook_type.clone(),
            method_name: spec.hook_method.clone(),
        }
        .into());
    };

    let (target, iterator) = if is_iterator_shaped(&hook_method.signature) {
        let state_machine = image.nested_types(hook_type).find(|nested| {
            let name = &image.types()[*nested].name;
            name.contains(&spec.hook_method)
                && spec
                    .iterator_markers
                    .iter()
                    .any(|marker| name.contains(marker.as_str()))
        });
        let Some(state_machine) = state_machine else {
            return Err(LocateError::IteratorTypeNotFound {
                type_name: spec.hook_type.clone(),
                method_name: spec.hook_method.clone(),
            }
            .into());
        };

        let Some((step_index, _)) = find_method(image, state_machine, &spec.step_method) else {
            return Err(LocateError::StepMethodNotFound {
                type_name: image.type_full_name(state_machine),
                method_name: spec.step_method.clone(),
            }
            .into());
        };

        debug!(
            "{} is an iterator, searching {}",
            image.method_full_name(hook_index),
            image.method_full_name(step_index)
        );
        (step_index, true)
    } else {
        (hook_index, false)
    };

    let Some(body) = image.methods()[target].body.as_ref() else {
        return Err(LocateError::NoBody(image.method_full_name(target)).into());
    };

    let mut matches = body.calls().filter(|(_, token)| {
        image
            .resolve_callee(*token)
            .is_some_and(|callee| callee.name.contains(spec.marker.as_str()))
    });

    let Some((position, _)) = matches.next() else {
        return Err(LocateError::MarkerNotFound {
            method: image.method_full_name(target),
            marker: spec.marker.clone(),
        }
        .into());
    };

    let extra = matches.count();
    if extra > 0 {
        warn!(
            "{} more call(s) matching '{}' in {}, using the first at {}",
            extra,
            spec.marker,
            image.method_full_name(target),
            position
        );
    }

    debug!(
        "Hook point: {} instruction {} of {}",
        image.method_full_name(target),
        position,
        body.instructions.len()
    );

    Ok(HookPoint {
        method: target,
        iterator,
        position,
        instruction_count: body.instructions.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        disassembler::{opcodes, Instruction, Operand},
        metadata::{
            method::{MethodAttributes, MethodBody},
            typedef::TypeDef,
        },
        test::{ins, sample_image, DEBUG_LOG, DONT_DESTROY},
        Error,
    };

    fn hook(method: &str) -> HookSpec {
        HookSpec {
            hook_method: method.to_string(),
            ..HookSpec::default()
        }
    }

    #[test]
    fn plain_method() {
        let image = sample_image();
        let point = locate(&image, &HookSpec::default()).unwrap();
        assert_eq!(
            point,
            HookPoint {
                method: 0,
                iterator: false,
                position: 1,
                instruction_count: 6,
            }
        );
    }

    #[test]
    fn iterator_redirects_to_step_method() {
        let image = sample_image();
        let point = locate(&image, &hook("Start")).unwrap();
        assert!(point.iterator);
        assert_eq!(image.methods()[point.method].name, "MoveNext");
        assert_eq!(point.position, 2);
        assert_eq!(point.instruction_count, 5);
    }

    #[test]
    fn iterator_markers_are_configurable() {
        let image = sample_image();
        let spec = HookSpec {
            hook_method: "Start".into(),
            iterator_markers: vec!["Iterator".into()],
            ..HookSpec::default()
        };
        assert!(matches!(
            locate(&image, &spec),
            Err(Error::Locate(LocateError::IteratorTypeNotFound { .. }))
        ));
    }

    #[test]
    fn missing_pieces() {
        let image = sample_image();

        let spec = HookSpec {
            hook_type: "Nope".into(),
            ..HookSpec::default()
        };
        assert!(matches!(
            locate(&image, &spec),
            Err(Error::Locate(LocateError::TypeNotFound(_)))
        ));
        assert!(matches!(
            locate(&image, &hook("OnEnable")),
            Err(Error::Locate(LocateError::MethodNotFound { .. }))
        ));
        assert!(matches!(
            locate(&image, &hook("Update")),
            Err(Error::Locate(LocateError::NoBody(_)))
        ));

        let spec = HookSpec {
            marker: "Instantiate".into(),
            ..HookSpec::default()
        };
        assert!(matches!(
            locate(&image, &spec),
            Err(Error::Locate(LocateError::MarkerNotFound { .. }))
        ));
    }

    #[test]
    fn step_method_missing() {
        let image = sample_image();
        let spec = HookSpec {
            hook_method: "Start".into(),
            step_method: "Step".into(),
            ..HookSpec::default()
        };
        assert!(matches!(
            locate(&image, &spec),
            Err(Error::Locate(LocateError::StepMethodNotFound { .. }))
        ));
    }

    #[test]
    fn first_match_wins() {
        let mut image = sample_image();
        let owner = image.find_type("GameManager").unwrap();
        image
            .add_method(MethodDef::new(
                "OnEnable",
                MethodAttributes::PRIVATE,
                owner,
                MethodSig::new_instance("System.Void", vec![]),
                Some(MethodBody::new(vec![
                    ins(opcodes::LDNULL),
                    Instruction::call(DEBUG_LOG),
                    ins(opcodes::LDNULL),
                    Instruction::call(DONT_DESTROY),
                    ins(opcodes::LDNULL),
                    Instruction::call(DONT_DESTROY),
                    ins(opcodes::RET),
                ])),
            ))
            .unwrap();

        let point = locate(&image, &hook("OnEnable")).unwrap();
        assert_eq!(point.position, 3);
        assert_eq!(point.instruction_count, 7);
    }

    #[test]
    fn generic_enumerable_is_iterator() {
        assert!(is_iterator_shaped(&MethodSig::new_instance(
            "System.Collections.Generic.IEnumerable`1<System.Int32>",
            vec![]
        )));
        assert!(!is_iterator_shaped(&MethodSig::void_static()));
    }

    #[test]
    fn callvirt_matches() {
        let mut image = Image::new();
        let owner = image.add_type(TypeDef::new("", "GameManager")).unwrap();
        let token = image.import_method(
            "UnityEngine.Object",
            "DontDestroyOnLoad",
            &MethodSig::new_instance("System.Void", vec![]),
        );
        image
            .add_method(MethodDef::new(
                "Awake",
                MethodAttributes::PRIVATE,
                owner,
                MethodSig::new_instance("System.Void", vec![]),
                Some(MethodBody::new(vec![
                    ins(opcodes::LDARG_0),
                    Instruction::new(
                        0,
                        opcodes::CALLVIRT,
                        Operand::Token(token),
                    )
                    .unwrap(),
                    ins(opcodes::RET),
                ])),
            ))
            .unwrap();

        assert_eq!(locate(&image, &HookSpec::default()).unwrap().position, 1);
    }
}
