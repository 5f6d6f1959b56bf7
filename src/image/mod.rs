//! In-memory, mutable image of a .NET assembly.
//!
//! An [`Image`] holds the `TypeDef`, `MethodDef` and `MemberRef` tables of a PE/CLI assembly
//! with decoded method bodies. It is opened from a file (through a memory map) or from a buffer,
//! edited in place, and written back. Writing an opened assembly keeps every byte of the original
//! and appends one section with the changed bodies and the extended metadata; an image built in
//! memory is emitted as a new single-section DLL.
//!
//! # Key Components
//!
//! - [`Image`] - The tables plus lookups by full name and token
//! - [`Callee`] - A resolved call target, as seen through a `call` token
//! - [`Output`] - Memory-mapped, atomically moved output file
//!
//! # Examples
//!
//! ```rust,no_run
//! use cilhook::image::Image;
//! use std::path::Path;
//!
//! let image = Image::from_file(Path::new("Assembly-CSharp.dll"))?;
//! for (index, method) in image.methods().iter().enumerate() {
//!     println!("{} ({} instructions)", image.method_full_name(index), method.instruction_count());
//! }
//! # Ok::<(), cilhook::Error>(())
//! ```

mod output;
pub(crate) mod pe;

pub use output::Output;

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use log::debug;

use crate::{
    file::File,
    metadata::{
        identity::AssemblyIdentity,
        memberref::MemberRef,
        method::{MethodDef, TypeAttributes},
        signature::MethodSig,
        token::{TableId, Token},
        typedef::TypeDef,
    },
    Error, Result,
};

/// Name of the pseudo-type owning a module's global members, always the first `TypeDef` row
pub const MODULE_TYPE: &str = "<Module>";

/// A call target resolved from a `MethodDef` or `MemberRef` token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callee<'a> {
    /// Fully-qualified declaring type
    pub declaring_type: String,
    /// Method name
    pub name: &'a str,
    /// Method signature
    pub signature: &'a MethodSig,
}

impl Callee<'_> {
    /// `<ReturnType> <DeclaringType>::<Name>(<Params>)`
    #[must_use]
    pub fn full_name(&self) -> String {
        self.signature.full_name(&self.declaring_type, self.name)
    }
}

/// A module's metadata tables and method bodies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Image {
    pub(crate) types: Vec<TypeDef>,
    pub(crate) methods: Vec<MethodDef>,
    pub(crate) member_refs: Vec<MemberRef>,
    pub(crate) path: Option<PathBuf>,
    /// Methods handed out through [`Image::method_mut`]
    pub(crate) dirty: BTreeSet<usize>,
    pub(crate) identity: Option<AssemblyIdentity>,
    pub(crate) assembly: Option<Box<pe::Assembly>>,
}

impl Image {
    /// An empty module holding only the `<Module>` type.
    #[must_use]
    pub fn new() -> Self {
        let module = TypeDef {
            flags: TypeAttributes::empty(),
            ..TypeDef::new("", MODULE_TYPE)
        };
        Image {
            types: vec![module],
            ..Self::default()
        }
    }

    /// Open and parse an assembly file.
    ///
    /// The file is mapped only while parsing; the returned image owns its data, so the file can
    /// be overwritten afterwards.
    ///
    /// # Errors
    /// Returns [`Error::FileError`] if the file cannot be opened, [`Error::NotSupported`] for a
    /// file that is not a .NET assembly, [`Error::GoblinErr`] for damaged PE headers and
    /// [`Error::Malformed`] or [`Error::OutOfBounds`] for damaged metadata.
    pub fn from_file(path: &Path) -> Result<Image> {
        let file = File::from_file(path)?;
        let mut image = Self::parse(file.data())?;
        image.path = Some(path.to_path_buf());
        debug!(
            "Loaded {} ({} types, {} methods, {} member refs)",
            path.display(),
            image.types.len(),
            image.methods.len(),
            image.member_refs.len()
        );
        Ok(image)
    }

    /// Parse an assembly from a buffer.
    ///
    /// # Errors
    /// Returns [`Error::Empty`] for an empty buffer, otherwise as [`Image::from_file`].
    pub fn from_mem(data: Vec<u8>) -> Result<Image> {
        let file = File::from_mem(data)?;
        Self::parse(file.data())
    }

    fn parse(data: &[u8]) -> Result<Image> {
        if !data.starts_with(b"MZ") {
            return Err(Error::NotSupported);
        }
        pe::read_image(data)
    }

    /// Encode the image as a PE/CLI assembly.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if a body or table cannot be encoded, and [`Error::Error`] if
    /// types or methods were added to an opened assembly or the headers have no room for another
    /// section.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        pe::write_image(self)
    }

    /// Write the image back to the file it was opened from.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for an image that was not opened from a file, and
    /// [`Error::Write`] if writing fails.
    pub fn write(&self) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Err(Error::Config("image has no backing file".to_string()));
        };
        self.write_to(path)
    }

    /// Write the image to `path`, replacing it atomically.
    ///
    /// # Errors
    /// Returns [`Error::Write`] if the data cannot be encoded or the file cannot be written.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes().map_err(|error| Error::Write {
            path: path.to_path_buf(),
            cause: crate::WriteCause::Serialization,
            source: Box::new(error),
        })?;

        let mut output = Output::create(path, bytes.len() as u64)?;
        output.write_at(0, &bytes)?;
        output.finalize()?;
        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }

    /// The file this image was opened from
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Add a type and return its index.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if the enclosing type does not exist.
    pub fn add_type(&mut self, typedef: TypeDef) -> Result<usize> {
        if let Some(enclosing) = typedef.enclosing {
            if enclosing >= self.types.len() {
                return Err(malformed_error!("Enclosing type {} does not exist", enclosing));
            }
        }
        self.types.push(typedef);
        Ok(self.types.len() - 1)
    }

    /// Add a method and return its index.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if the declaring type does not exist.
    pub fn add_method(&mut self, method: MethodDef) -> Result<usize> {
        if method.declaring_type >= self.types.len() {
            return Err(malformed_error!(
                "Declaring type {} of '{}' does not exist",
                method.declaring_type,
                method.name
            ));
        }
        self.methods.push(method);
        Ok(self.methods.len() - 1)
    }

    /// Add a member reference and return its token.
    pub fn add_member_ref(&mut self, member_ref: MemberRef) -> Token {
        self.member_refs.push(member_ref);
        Token::from_index(TableId::MemberRef, self.member_refs.len() - 1)
    }

    /// All types
    #[must_use]
    pub fn types(&self) -> &[TypeDef] {
        &self.types
    }

    /// All methods
    #[must_use]
    pub fn methods(&self) -> &[MethodDef] {
        &self.methods
    }

    /// All member references
    #[must_use]
    pub fn member_refs(&self) -> &[MemberRef] {
        &self.member_refs
    }

    /// The method at `index`
    #[must_use]
    pub fn method(&self, index: usize) -> Option<&MethodDef> {
        self.methods.get(index)
    }

    /// Mutable access to the method at `index`. Its body is rewritten on the next write.
    pub fn method_mut(&mut self, index: usize) -> Option<&mut MethodDef> {
        let method = self.methods.get_mut(index)?;
        self.dirty.insert(index);
        Some(method)
    }

    /// Identity from the `Assembly` table, `None` for a bare module
    #[must_use]
    pub fn identity(&self) -> Option<&AssemblyIdentity> {
        self.identity.as_ref()
    }

    /// Set the identity written into the `Assembly` table of a new image.
    pub fn set_identity(&mut self, identity: Option<AssemblyIdentity>) {
        self.identity = identity;
    }

    /// Full name of a type: `Namespace.Name`, nested types as `Outer/Inner`.
    ///
    /// Returns an empty string for an unknown index.
    #[must_use]
    pub fn type_full_name(&self, index: usize) -> String {
        let Some(typedef) = self.types.get(index) else {
            return String::new();
        };
        match typedef.enclosing {
            Some(enclosing) => format!("{}/{}", self.type_full_name(enclosing), typedef.name),
            None => typedef.qualified_name(),
        }
    }

    /// Fully-qualified rendering of the method at `index`.
    #[must_use]
    pub fn method_full_name(&self, index: usize) -> String {
        match self.methods.get(index) {
            Some(method) => method
                .signature
                .full_name(&self.type_full_name(method.declaring_type), &method.name),
            None => String::new(),
        }
    }

    /// Index of the first type whose full name equals `full_name`.
    #[must_use]
    pub fn find_type(&self, full_name: &str) -> Option<usize> {
        (0..self.types.len()).find(|index| self.type_full_name(*index) == full_name)
    }

    /// Indices of the types directly nested in `index`, in table order.
    pub fn nested_types(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.types
            .iter()
            .enumerate()
            .filter(move |(_, typedef)| typedef.enclosing == Some(index))
            .map(|(nested, _)| nested)
    }

    /// Methods declared on the type at `index`, in table order.
    pub fn methods_of(&self, index: usize) -> impl Iterator<Item = (usize, &MethodDef)> + '_ {
        self.methods
            .iter()
            .enumerate()
            .filter(move |(_, method)| method.declaring_type == index)
    }

    /// Nesting depth of a type: 0 for top-level types.
    #[must_use]
    pub fn nesting_depth(&self, index: usize) -> usize {
        let mut depth = 0;
        let mut current = self.types.get(index).and_then(|typedef| typedef.enclosing);
        while let Some(enclosing) = current {
            depth += 1;
            current = self.types.get(enclosing).and_then(|typedef| typedef.enclosing);
        }
        depth
    }

    /// Token of the method at `index`
    #[must_use]
    pub fn method_token(&self, index: usize) -> Token {
        Token::from_index(TableId::MethodDef, index)
    }

    /// Resolve a `MethodDef` or `MemberRef` token to its call target.
    #[must_use]
    pub fn resolve_callee(&self, token: Token) -> Option<Callee<'_>> {
        let index = token.index()?;
        match token.table_id()? {
            TableId::MethodDef => {
                let method = self.methods.get(index)?;
                Some(Callee {
                    declaring_type: self.type_full_name(method.declaring_type),
                    name: &method.name,
                    signature: &method.signature,
                })
            }
            TableId::MemberRef => {
                let member_ref = self.member_refs.get(index)?;
                Some(Callee {
                    declaring_type: member_ref.class.clone(),
                    name: &member_ref.name,
                    signature: &member_ref.signature,
                })
            }
            _ => None,
        }
    }

    /// Fully-qualified signature of the method a call token refers to.
    #[must_use]
    pub fn call_signature(&self, token: Token) -> Option<String> {
        self.resolve_callee(token).map(|callee| callee.full_name())
    }

    /// Import a method reference, reusing a `MemberRef` row for the same method if one exists.
    ///
    /// The reference's scope names the assembly defining its class; a new row gets an
    /// `AssemblyRef` for that scope when the image is written.
    pub fn import(&mut self, member_ref: &MemberRef) -> Token {
        if let Some(index) = self
            .member_refs
            .iter()
            .position(|existing| existing.same_method(member_ref))
        {
            return Token::from_index(TableId::MemberRef, index);
        }
        self.add_member_ref(member_ref.clone())
    }

    /// [`import`](Self::import) an unscoped reference.
    pub fn import_method(&mut self, class: &str, name: &str, signature: &MethodSig) -> Token {
        self.import(&MemberRef::new(class, name, signature.clone()))
    }

    /// Reject enclosing-type cycles.
    pub(crate) fn check_nesting(&self) -> Result<()> {
        for start in 0..self.types.len() {
            let mut current = self.types[start].enclosing;
            let mut steps = 0;
            while let Some(enclosing) = current {
                steps += 1;
                if steps > self.types.len() {
                    return Err(malformed_error!(
                        "Type '{}' is part of a nesting cycle",
                        self.types[start].name
                    ));
                }
                current = self.types.get(enclosing).and_then(|typedef| typedef.enclosing);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        disassembler::{opcodes, Instruction},
        metadata::method::{MethodAttributes, MethodBody},
        test::{pe::minimal_pe, sample_image, sample_loader},
    };
    use tempfile::tempdir;

    #[test]
    fn names_and_lookup() {
        let image = sample_image();
        assert_eq!(image.types()[0].name, MODULE_TYPE);
        let manager = image.find_type("GameManager").unwrap();
        assert_eq!(image.type_full_name(manager), "GameManager");

        let nested: Vec<_> = image.nested_types(manager).collect();
        assert_eq!(nested.len(), 1);
        assert_eq!(
            image.type_full_name(nested[0]),
            "GameManager/<Start>d__3"
        );
        assert_eq!(image.nesting_depth(nested[0]), 1);
        assert_eq!(image.find_type("Game.GameManager"), None);

        let (awake, _) = image
            .methods_of(manager)
            .find(|(_, method)| method.name == "Awake")
            .unwrap();
        assert_eq!(
            image.method_full_name(awake),
            "System.Void GameManager::Awake()"
        );
    }

    #[test]
    fn assembly_roundtrip() {
        let image = sample_image();
        let reparsed = Image::from_mem(image.to_bytes().unwrap()).unwrap();
        assert_eq!(reparsed.types(), image.types());
        assert_eq!(reparsed.methods(), image.methods());
        assert_eq!(reparsed.member_refs(), image.member_refs());
        assert_eq!(
            reparsed.method_full_name(3),
            "System.Boolean GameManager/<Start>d__3::MoveNext()"
        );
    }

    #[test]
    fn roundtrip_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Game.dll");
        sample_image().write_to(&path).unwrap();
        let original = std::fs::read(&path).unwrap();

        let mut image = Image::from_file(&path).unwrap();
        assert_eq!(image.path(), Some(path.as_path()));

        let token = image.import_method("A.B", "C", &MethodSig::void_static());
        let method = image.method_mut(0).unwrap();
        method
            .body
            .as_mut()
            .unwrap()
            .insert_after(0, Instruction::call(token))
            .unwrap();
        image.write().unwrap();

        let reopened = Image::from_file(&path).unwrap();
        assert!(std::fs::read(&path).unwrap().len() > original.len());
        assert_eq!(
            reopened.methods()[0].instruction_count(),
            image.methods()[0].instruction_count()
        );
        assert_eq!(
            reopened.call_signature(token).as_deref(),
            Some("System.Void A.B::C()")
        );
    }

    #[test]
    fn only_touched_methods_are_dirty() {
        let mut image = Image::from_mem(sample_image().to_bytes().unwrap()).unwrap();
        assert!(image.dirty.is_empty());
        assert!(image.method_mut(99).is_none());
        image.method_mut(3).unwrap();
        assert_eq!(image.dirty.iter().copied().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn identity_of_loader() {
        let loader = Image::from_mem(sample_loader().to_bytes().unwrap()).unwrap();
        let identity = loader.identity().unwrap();
        assert_eq!(identity.name, "CilHook");
        assert_eq!(identity.version, [1, 2, 0, 0]);
    }

    #[test]
    fn import_reuses_rows() {
        let mut image = sample_image();
        let before = image.member_refs().len();
        let first = image.import_method("CilHook.ModLoader", "Init", &MethodSig::void_static());
        let second = image.import_method("CilHook.ModLoader", "Init", &MethodSig::void_static());
        assert_eq!(first, second);
        assert_eq!(first.table_id(), Some(TableId::MemberRef));
        assert_eq!(image.member_refs().len(), before + 1);
    }

    #[test]
    fn resolve_method_def_tokens() {
        let mut image = Image::new();
        let owner = image.add_type(TypeDef::new("N", "T")).unwrap();
        let index = image
            .add_method(MethodDef::new(
                "Run",
                MethodAttributes::PUBLIC | MethodAttributes::STATIC,
                owner,
                MethodSig::void_static(),
                Some(MethodBody::new(vec![Instruction::simple(0, opcodes::RET).unwrap()])),
            ))
            .unwrap();
        let token = image.method_token(index);
        assert_eq!(token.value(), 0x0600_0001);
        assert_eq!(image.call_signature(token).as_deref(), Some("System.Void N.T::Run()"));
        assert_eq!(image.call_signature(Token::new(0x0600_0002)), None);
        assert_eq!(image.call_signature(Token::new(0x0200_0001)), None);
    }

    #[test]
    fn rejects_foreign_files() {
        assert!(matches!(Image::from_mem(Vec::new()), Err(Error::Empty)));
        assert!(matches!(
            Image::from_mem(b"\x7fELF\x02\x01\x01\x00".to_vec()),
            Err(Error::NotSupported)
        ));
        assert!(matches!(
            Image::from_mem(b"MZ\x90\x00\x03\x00\x00\x00".to_vec()),
            Err(Error::GoblinErr(_))
        ));
        // A PE whose CLI header points at something other than metadata
        assert!(matches!(
            Image::from_mem(minimal_pe(&[0xAA; 64])),
            Err(Error::NotSupported)
        ));

        let mut bytes = sample_image().to_bytes().unwrap();
        bytes.truncate(0x210);
        assert!(Image::from_mem(bytes).is_err());
    }

    #[test]
    fn rejects_dangling_declaring_type() {
        let mut image = Image::new();
        let method = MethodDef::new(
            "M",
            MethodAttributes::PUBLIC,
            5,
            MethodSig::void_static(),
            None,
        );
        assert!(image.add_method(method).is_err());
        assert!(image.add_type(TypeDef::nested("X", 5)).is_err());
    }

    #[test]
    fn write_without_path() {
        assert!(matches!(Image::new().write(), Err(Error::Config(_))));
    }
}
