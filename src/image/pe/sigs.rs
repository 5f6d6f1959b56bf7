//! Signature blobs (ECMA-335, Partition II, 23.2) to and from [`MethodSig`].
//!
//! Types are rendered as fully-qualified names: primitives by their `System.*` name, generic
//! instances as `Base<A,B>`, arrays as `T[]` or `T[,]`, generic parameters as `!0` and `!!0`.
//! Encoding covers primitives, named classes, single-dimension arrays, pointers and by-refs,
//! which is every signature an entry point or marker reference needs.

use crate::{
    image::pe::heaps::{push_compressed, read_compressed},
    metadata::{signature::MethodSig, token::TableId},
    Error, Result,
};

const ELEMENT_TYPE_PTR: u8 = 0x0F;
const ELEMENT_TYPE_BYREF: u8 = 0x10;
const ELEMENT_TYPE_VALUETYPE: u8 = 0x11;
const ELEMENT_TYPE_CLASS: u8 = 0x12;
const ELEMENT_TYPE_VAR: u8 = 0x13;
const ELEMENT_TYPE_ARRAY: u8 = 0x14;
const ELEMENT_TYPE_GENERICINST: u8 = 0x15;
const ELEMENT_TYPE_FNPTR: u8 = 0x1B;
const ELEMENT_TYPE_SZARRAY: u8 = 0x1D;
const ELEMENT_TYPE_MVAR: u8 = 0x1E;
const ELEMENT_TYPE_CMOD_REQD: u8 = 0x1F;
const ELEMENT_TYPE_CMOD_OPT: u8 = 0x20;
const ELEMENT_TYPE_SENTINEL: u8 = 0x41;
const ELEMENT_TYPE_PINNED: u8 = 0x45;

const HAS_THIS: u8 = 0x20;
const GENERIC: u8 = 0x10;
const FIELD: u8 = 0x06;

const MAX_DEPTH: usize = 32;

const PRIMITIVES: [(u8, &str); 18] = [
    (0x01, "System.Void"),
    (0x02, "System.Boolean"),
    (0x03, "System.Char"),
    (0x04, "System.SByte"),
    (0x05, "System.Byte"),
    (0x06, "System.Int16"),
    (0x07, "System.UInt16"),
    (0x08, "System.Int32"),
    (0x09, "System.UInt32"),
    (0x0A, "System.Int64"),
    (0x0B, "System.UInt64"),
    (0x0C, "System.Single"),
    (0x0D, "System.Double"),
    (0x0E, "System.String"),
    (0x16, "System.TypedReference"),
    (0x18, "System.IntPtr"),
    (0x19, "System.UIntPtr"),
    (0x1C, "System.Object"),
];

/// Resolves a `TypeDef`, `TypeRef` or `TypeSpec` row to a type name.
pub(crate) trait TypeNames {
    fn type_name(&self, table: TableId, row: u32, depth: usize) -> Result<String>;
}

struct Decoder<'a, N: ?Sized> {
    data: &'a [u8],
    offset: usize,
    names: &'a N,
}

impl<N: TypeNames + ?Sized> Decoder<'_, N> {
    fn byte(&mut self) -> Result<u8> {
        let byte = *self.data.get(self.offset).ok_or(Error::OutOfBounds)?;
        self.offset += 1;
        Ok(byte)
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.offset).copied()
    }

    fn compressed(&mut self) -> Result<u32> {
        read_compressed(self.data, &mut self.offset)
    }

    fn type_ref(&mut self, depth: usize) -> Result<String> {
        let encoded = self.compressed()?;
        let table = match encoded & 0x03 {
            0 => TableId::TypeDef,
            1 => TableId::TypeRef,
            2 => TableId::TypeSpec,
            _ => return Err(malformed_error!("Invalid TypeDefOrRef tag in {:#x}", encoded)),
        };
        self.names.type_name(table, encoded >> 2, depth + 1)
    }

    fn skip_modifiers(&mut self) -> Result<()> {
        while let Some(ELEMENT_TYPE_CMOD_REQD | ELEMENT_TYPE_CMOD_OPT | ELEMENT_TYPE_PINNED) =
            self.peek()
        {
            if self.byte()? != ELEMENT_TYPE_PINNED {
                self.compressed()?;
            }
        }
        Ok(())
    }

    fn ty(&mut self, depth: usize) -> Result<String> {
        if depth > MAX_DEPTH {
            return Err(malformed_error!("Signature nesting exceeds {} levels", MAX_DEPTH));
        }
        self.skip_modifiers()?;

        let element = self.byte()?;
        if let Some((_, name)) = PRIMITIVES.iter().find(|(code, _)| *code == element) {
            return Ok((*name).to_string());
        }
        match element {
            ELEMENT_TYPE_PTR => Ok(format!("{}*", self.ty(depth + 1)?)),
            ELEMENT_TYPE_BYREF => Ok(format!("{}&", self.ty(depth + 1)?)),
            ELEMENT_TYPE_CLASS | ELEMENT_TYPE_VALUETYPE => self.type_ref(depth),
            ELEMENT_TYPE_VAR => Ok(format!("!{}", self.compressed()?)),
            ELEMENT_TYPE_MVAR => Ok(format!("!!{}", self.compressed()?)),
            ELEMENT_TYPE_SZARRAY => Ok(format!("{}[]", self.ty(depth + 1)?)),
            ELEMENT_TYPE_ARRAY => {
                let element = self.ty(depth + 1)?;
                let rank = self.compressed()?;
                for _ in 0..self.compressed()? {
                    self.compressed()?;
                }
                for _ in 0..self.compressed()? {
                    self.compressed()?;
                }
                let commas = ",".repeat(rank.saturating_sub(1).min(32) as usize);
                Ok(format!("{element}[{commas}]"))
            }
            ELEMENT_TYPE_GENERICINST => {
                // CLASS or VALUETYPE
                self.byte()?;
                let base = self.type_ref(depth)?;
                let count = self.compressed()?;
                let mut args = Vec::new();
                for _ in 0..count {
                    args.push(self.ty(depth + 1)?);
                }
                Ok(format!("{base}<{}>", args.join(",")))
            }
            ELEMENT_TYPE_FNPTR => {
                let sig = self.method(depth + 1)?;
                Ok(format!("method {}*({})", sig.return_type, sig.params.join(",")))
            }
            other => Err(malformed_error!("Unknown element type {:#x} in signature", other)),
        }
    }

    fn method(&mut self, depth: usize) -> Result<MethodSig> {
        let convention = self.byte()?;
        if convention & 0x0F == FIELD {
            let field_type = self.ty(depth)?;
            return Ok(MethodSig {
                has_this: false,
                return_type: field_type,
                params: Vec::new(),
            });
        }
        if convention & GENERIC != 0 {
            self.compressed()?;
        }

        let count = self.compressed()?;
        let return_type = self.ty(depth)?;
        let mut params = Vec::with_capacity((count as usize).min(self.data.len()));
        for _ in 0..count {
            if self.peek() == Some(ELEMENT_TYPE_SENTINEL) {
                self.byte()?;
            }
            params.push(self.ty(depth)?);
        }

        Ok(MethodSig {
            has_this: convention & HAS_THIS != 0,
            return_type,
            params,
        })
    }
}

/// Decode a method or field signature blob.
pub(crate) fn decode_method_sig<N: TypeNames + ?Sized>(
    blob: &[u8],
    names: &N,
) -> Result<MethodSig> {
    Decoder {
        data: blob,
        offset: 0,
        names,
    }
    .method(0)
}

/// Decode a type signature, as found in a `TypeSpec` blob.
pub(crate) fn decode_type_sig<N: TypeNames + ?Sized>(
    blob: &[u8],
    names: &N,
    depth: usize,
) -> Result<String> {
    Decoder {
        data: blob,
        offset: 0,
        names,
    }
    .ty(depth)
}

fn encode_type<F>(out: &mut Vec<u8>, name: &str, class_of: &mut F) -> Result<()>
where
    F: FnMut(&str) -> Result<(TableId, u32)>,
{
    if let Some((code, _)) = PRIMITIVES.iter().find(|(_, primitive)| *primitive == name) {
        out.push(*code);
        return Ok(());
    }
    if let Some(element) = name.strip_suffix("[]") {
        out.push(ELEMENT_TYPE_SZARRAY);
        return encode_type(out, element, class_of);
    }
    if let Some(element) = name.strip_suffix('&') {
        out.push(ELEMENT_TYPE_BYREF);
        return encode_type(out, element, class_of);
    }
    if let Some(element) = name.strip_suffix('*') {
        out.push(ELEMENT_TYPE_PTR);
        return encode_type(out, element, class_of);
    }
    if name.is_empty()
        || name.ends_with('>')
        || name.starts_with('!')
        || name.contains([',', ' '])
    {
        return Err(Error::Error(format!("Cannot encode type '{name}' in a signature")));
    }

    let (table, row) = class_of(name)?;
    let tag = match table {
        TableId::TypeDef => 0,
        TableId::TypeRef => 1,
        TableId::TypeSpec => 2,
        other => return Err(malformed_error!("{} row cannot name a type", other)),
    };
    out.push(ELEMENT_TYPE_CLASS);
    push_compressed(out, (row << 2) | tag)
}

/// Encode a method signature. `class_of` maps a class name to its `TypeDef` or `TypeRef` row.
///
/// # Errors
/// Returns [`Error::Error`] for generic instances and generic parameters.
pub(crate) fn encode_method_sig<F>(sig: &MethodSig, mut class_of: F) -> Result<Vec<u8>>
where
    F: FnMut(&str) -> Result<(TableId, u32)>,
{
    let mut out = vec![if sig.has_this { HAS_THIS } else { 0 }];
    let count = u32::try_from(sig.params.len())
        .map_err(|_| malformed_error!("Too many parameters"))?;
    push_compressed(&mut out, count)?;
    encode_type(&mut out, &sig.return_type, &mut class_of)?;
    for param in &sig.params {
        encode_type(&mut out, param, &mut class_of)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Names;

    impl TypeNames for Names {
        fn type_name(&self, table: TableId, row: u32, _depth: usize) -> Result<String> {
            match (table, row) {
                (TableId::TypeRef, 1) => Ok("UnityEngine.Object".to_string()),
                (TableId::TypeRef, 2) => Ok("System.Collections.Generic.List`1".to_string()),
                (TableId::TypeDef, 2) => Ok("GameManager".to_string()),
                _ => Err(Error::OutOfBounds),
            }
        }
    }

    #[test]
    fn decode_static_method() {
        // static void (UnityEngine.Object)
        let sig = decode_method_sig(&[0x00, 0x01, 0x01, 0x12, 0x05], &Names).unwrap();
        assert_eq!(sig, MethodSig::new_static("System.Void", vec!["UnityEngine.Object".into()]));
    }

    #[test]
    fn decode_instance_generic_and_arrays() {
        // instance List`1<int32> (string[], int32[,], GameManager&, !0, !!1)
        let blob = [
            0x20, 0x05, 0x15, 0x12, 0x09, 0x01, 0x08, 0x1D, 0x0E, 0x14, 0x08, 0x02, 0x00, 0x00,
            0x10, 0x12, 0x08, 0x13, 0x00, 0x1E, 0x01,
        ];
        let sig = decode_method_sig(&blob, &Names).unwrap();
        assert!(sig.has_this);
        assert_eq!(sig.return_type, "System.Collections.Generic.List`1<System.Int32>");
        assert_eq!(
            sig.params,
            vec!["System.String[]", "System.Int32[,]", "GameManager&", "!0", "!!1"]
        );
    }

    #[test]
    fn decode_field_and_modifiers() {
        // field: modreq(TypeRef 1) int32
        let sig = decode_method_sig(&[0x06, 0x1F, 0x05, 0x08], &Names).unwrap();
        assert_eq!(sig.return_type, "System.Int32");
        assert!(sig.params.is_empty());
        // generic method with one type parameter: !!0 M<T>(object)
        let sig = decode_method_sig(&[0x10, 0x01, 0x01, 0x1E, 0x00, 0x1C], &Names).unwrap();
        assert_eq!(sig.return_type, "!!0");
        assert_eq!(sig.params, vec!["System.Object"]);
    }

    #[test]
    fn decode_rejects_damage() {
        assert!(decode_method_sig(&[0x00, 0x01], &Names).is_err());
        assert!(decode_method_sig(&[0x00, 0x00, 0x42], &Names).is_err());
        assert!(decode_method_sig(&[0x00, 0x00, 0x12, 0x1F], &Names).is_err());
        let deep: Vec<u8> = [0x00, 0x00]
            .into_iter()
            .chain(std::iter::repeat(0x1D).take(64))
            .chain([0x08])
            .collect();
        assert!(decode_method_sig(&deep, &Names).is_err());
    }

    #[test]
    fn encode_then_decode() {
        let sig = MethodSig::new_instance(
            "System.Boolean",
            vec!["UnityEngine.Object".into(), "System.Byte[]".into(), "System.Int32&".into()],
        );
        let blob = encode_method_sig(&sig, |name| {
            assert_eq!(name, "UnityEngine.Object");
            Ok((TableId::TypeRef, 1))
        })
        .unwrap();
        assert_eq!(blob, [0x20, 0x03, 0x02, 0x12, 0x05, 0x1D, 0x05, 0x10, 0x08]);
        assert_eq!(decode_method_sig(&blob, &Names).unwrap(), sig);
    }

    #[test]
    fn encode_rejects_generics() {
        let sig = MethodSig::new_static("System.Collections.Generic.List`1<System.Int32>", vec![]);
        let result = encode_method_sig(&sig, |_| Ok((TableId::TypeRef, 2)));
        assert!(matches!(result, Err(Error::Error(_))));
        let sig = MethodSig::new_static("System.Void", vec!["!!0".into()]);
        assert!(encode_method_sig(&sig, |_| Ok((TableId::TypeRef, 2))).is_err());
    }
}
