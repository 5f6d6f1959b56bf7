//! The contract between the dispatcher and a loaded plugin.
//!
//! A plugin module exposes a table of [`EntryPoint`]s. The dispatcher selects entries with an
//! [`EntryQuery`], binds the caller's [`ArgValue`]s against each entry's declared
//! [`ParamKind`]s and invokes the entry by index.

use std::{fmt, path::Path};

use bitflags::bitflags;
use strum::Display;

bitflags! {
    /// Visibility and binding flags of an entry point.
    #[derive(PartialEq, Eq, Debug, Clone, Copy)]
    pub struct EntryFlags: u32 {
        /// Visible to the loader
        const PUBLIC = 0x0001;
        /// Callable without an instance
        const STATIC = 0x0002;
    }
}

/// Kind of an entry point parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[repr(u32)]
pub enum ParamKind {
    /// Signed 64-bit integer
    #[strum(serialize = "int")]
    Int = 1,
    /// 64-bit float
    #[strum(serialize = "float")]
    Float = 2,
    /// Boolean
    #[strum(serialize = "bool")]
    Bool = 3,
    /// UTF-8 string
    #[strum(serialize = "string")]
    Str = 4,
}

impl ParamKind {
    /// Kind for a raw ABI code
    #[must_use]
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(ParamKind::Int),
            2 => Some(ParamKind::Float),
            3 => Some(ParamKind::Bool),
            4 => Some(ParamKind::Str),
            _ => None,
        }
    }

    /// Raw ABI code
    #[must_use]
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// An argument passed to plugin entry points.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// Matches any parameter kind
    Null,
    /// Integer argument
    Int(i64),
    /// Float argument
    Float(f64),
    /// Boolean argument
    Bool(bool),
    /// String argument
    Str(String),
}

impl ArgValue {
    /// Kind of the value, `None` for [`ArgValue::Null`]
    #[must_use]
    pub fn kind(&self) -> Option<ParamKind> {
        match self {
            ArgValue::Null => None,
            ArgValue::Int(_) => Some(ParamKind::Int),
            ArgValue::Float(_) => Some(ParamKind::Float),
            ArgValue::Bool(_) => Some(ParamKind::Bool),
            ArgValue::Str(_) => Some(ParamKind::Str),
        }
    }
}

/// An entry point exported by a plugin module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    /// Declaring type name
    pub type_name: String,
    /// Method name
    pub method_name: String,
    /// Visibility and binding flags
    pub flags: EntryFlags,
    /// Declared parameter kinds, in order
    pub params: Vec<ParamKind>,
}

impl EntryPoint {
    /// A public static entry point.
    pub fn new(
        type_name: impl Into<String>,
        method_name: impl Into<String>,
        params: Vec<ParamKind>,
    ) -> Self {
        EntryPoint {
            type_name: type_name.into(),
            method_name: method_name.into(),
            flags: EntryFlags::PUBLIC | EntryFlags::STATIC,
            params,
        }
    }

    /// Replace the flags.
    #[must_use]
    pub fn with_flags(mut self, flags: EntryFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Check `args` against the declared parameters.
    ///
    /// A parameterless entry ignores the arguments. Otherwise the arity must match and every
    /// non-null argument must have the declared kind.
    ///
    /// # Errors
    /// Returns a description of the first mismatch.
    pub fn bind(&self, args: &[ArgValue]) -> std::result::Result<Vec<ArgValue>, String> {
        if self.params.is_empty() {
            return Ok(Vec::new());
        }
        if args.len() != self.params.len() {
            return Err(format!(
                "expected {} argument(s), got {}",
                self.params.len(),
                args.len()
            ));
        }
        for (position, (arg, param)) in args.iter().zip(&self.params).enumerate() {
            if let Some(kind) = arg.kind() {
                if kind != *param {
                    return Err(format!(
                        "argument {position} is {kind}, parameter is {param}"
                    ));
                }
            }
        }
        Ok(args.to_vec())
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.params.iter().map(ToString::to_string).collect();
        write!(
            f,
            "{}::{}({})",
            self.type_name,
            self.method_name,
            params.join(",")
        )
    }
}

/// Selects the entry points the dispatcher invokes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryQuery {
    /// Required method name
    pub method: String,
    /// Restrict to this declaring type
    pub type_name: Option<String>,
    /// Flags an entry must carry
    pub flags: EntryFlags,
}

impl EntryQuery {
    /// Query for public static entries named `method`, optionally on one declaring type.
    pub fn new(method: impl Into<String>, type_name: Option<String>) -> Self {
        EntryQuery {
            method: method.into(),
            type_name,
            flags: EntryFlags::PUBLIC | EntryFlags::STATIC,
        }
    }

    /// True if `entry` has the method name and the required flags.
    #[must_use]
    pub fn matches(&self, entry: &EntryPoint) -> bool {
        entry.method_name == self.method && entry.flags.contains(self.flags)
    }

    /// Indices of the entries to invoke.
    ///
    /// With a declaring type only the first matching entry on that type is returned, otherwise
    /// every matching entry in table order.
    #[must_use]
    pub fn resolve(&self, entries: &[EntryPoint]) -> Vec<usize> {
        let mut matching = entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| self.matches(entry));

        match &self.type_name {
            Some(type_name) => matching
                .find(|(_, entry)| &entry.type_name == type_name)
                .map(|(index, _)| index)
                .into_iter()
                .collect(),
            None => matching.map(|(index, _)| index).collect(),
        }
    }
}

impl fmt::Display for EntryQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.type_name {
            Some(type_name) => write!(f, "{}::{}", type_name, self.method),
            None => write!(f, "*::{}", self.method),
        }
    }
}

/// A loaded plugin module.
pub trait PluginModule {
    /// The exported entry points
    fn entries(&self) -> &[EntryPoint];

    /// Invoke entry `index` with already bound arguments.
    ///
    /// # Errors
    /// Returns a description of the failure the entry reported.
    fn invoke(&self, index: usize, args: &[ArgValue]) -> std::result::Result<(), String>;
}

/// Loads plugin modules from disk.
pub trait ModuleLoader {
    /// Load the module at `path`.
    ///
    /// # Errors
    /// Returns a description of why the module could not be loaded.
    fn load(&self, path: &Path) -> std::result::Result<Box<dyn PluginModule>, String>;
}
