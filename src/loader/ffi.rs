//! C ABI of native plugins.
//!
//! A plugin exports one function, `cilhook_plugin_manifest`, returning a pointer to a
//! [`CilhookManifest`] with static lifetime. The manifest lists the plugin's entries; each entry
//! carries exactly one of the two supported function shapes.
//!
//! ```rust,ignore
//! use std::ffi::c_char;
//! use cilhook::loader::ffi::*;
//!
//! extern "C" fn init() -> i32 { 0 }
//!
//! static ENTRIES: [CilhookEntry; 1] = [CilhookEntry {
//!     type_name: c"MyMod.Plugin".as_ptr(),
//!     method_name: c"Init".as_ptr(),
//!     flags: 0x3,
//!     param_kinds: std::ptr::null(),
//!     param_count: 0,
//!     no_args: Some(init),
//!     with_args: None,
//! }];
//!
//! #[no_mangle]
//! pub extern "C" fn cilhook_plugin_manifest() -> *const CilhookManifest {
//!     static MANIFEST: CilhookManifest = CilhookManifest {
//!         abi_major: CILHOOK_ABI_VERSION_MAJOR,
//!         abi_minor: CILHOOK_ABI_VERSION_MINOR,
//!         entries: ENTRIES.as_ptr(),
//!         entry_count: ENTRIES.len(),
//!     };
//!     &MANIFEST
//! }
//! ```

use std::ffi::{c_char, CStr};

use crate::loader::module::{ArgValue, EntryFlags, EntryPoint, ParamKind};

/// Manifest ABI major version; a plugin with another major version is rejected
pub const CILHOOK_ABI_VERSION_MAJOR: u32 = 1;
/// Manifest ABI minor version
pub const CILHOOK_ABI_VERSION_MINOR: u32 = 0;

/// Symbol every native plugin exports
pub const MANIFEST_SYMBOL: &[u8] = b"cilhook_plugin_manifest\0";

/// Argument tag for a null argument
pub const ARG_NULL: u32 = 0;

/// Entry without parameters
pub type NoArgsFn = extern "C" fn() -> i32;
/// Entry with typed parameters
pub type WithArgsFn = extern "C" fn(args: *const CilhookArg, count: usize) -> i32;
/// The exported manifest function
pub type ManifestFn = unsafe extern "C" fn() -> *const CilhookManifest;

/// One argument as passed across the ABI.
///
/// `kind` is [`ARG_NULL`] or a [`ParamKind`] code; only the matching value field is meaningful.
/// Strings are UTF-8, not NUL-terminated, and borrowed for the duration of the call.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CilhookArg {
    /// Kind tag
    pub kind: u32,
    /// Integer or boolean (0/1) value
    pub int_value: i64,
    /// Float value
    pub float_value: f64,
    /// String data
    pub str_ptr: *const u8,
    /// String length in bytes
    pub str_len: usize,
}

/// One exported entry.
#[repr(C)]
#[derive(Debug)]
pub struct CilhookEntry {
    /// NUL-terminated declaring type name
    pub type_name: *const c_char,
    /// NUL-terminated method name
    pub method_name: *const c_char,
    /// [`EntryFlags`] bits
    pub flags: u32,
    /// [`ParamKind`] codes
    pub param_kinds: *const u32,
    /// Number of parameter codes
    pub param_count: usize,
    /// Set for parameterless entries
    pub no_args: Option<NoArgsFn>,
    /// Set for entries with parameters
    pub with_args: Option<WithArgsFn>,
}

/// The table returned by `cilhook_plugin_manifest`.
#[repr(C)]
#[derive(Debug)]
pub struct CilhookManifest {
    /// Must equal [`CILHOOK_ABI_VERSION_MAJOR`]
    pub abi_major: u32,
    /// Informational
    pub abi_minor: u32,
    /// Entry array
    pub entries: *const CilhookEntry,
    /// Number of entries
    pub entry_count: usize,
}

// Manifests are immutable static tables
unsafe impl Sync for CilhookEntry {}
unsafe impl Sync for CilhookManifest {}

/// Callable half of an entry.
#[derive(Debug, Clone, Copy)]
pub(crate) enum EntryFn {
    NoArgs(NoArgsFn),
    WithArgs(WithArgsFn),
}

impl EntryFn {
    pub(crate) fn call(self, args: &[ArgValue]) -> i32 {
        match self {
            EntryFn::NoArgs(function) => function(),
            EntryFn::WithArgs(function) => {
                let raw: Vec<CilhookArg> = args.iter().map(to_raw).collect();
                function(raw.as_ptr(), raw.len())
            }
        }
    }
}

/// Borrowing conversion; the result must not outlive `arg`.
fn to_raw(arg: &ArgValue) -> CilhookArg {
    let mut raw = CilhookArg {
        kind: arg.kind().map_or(ARG_NULL, ParamKind::code),
        int_value: 0,
        float_value: 0.0,
        str_ptr: std::ptr::null(),
        str_len: 0,
    };
    match arg {
        ArgValue::Null => {}
        ArgValue::Int(value) => raw.int_value = *value,
        ArgValue::Bool(value) => raw.int_value = i64::from(*value),
        ArgValue::Float(value) => raw.float_value = *value,
        ArgValue::Str(value) => {
            raw.str_ptr = value.as_ptr();
            raw.str_len = value.len();
        }
    }
    raw
}

unsafe fn read_cstr(ptr: *const c_char, what: &str) -> std::result::Result<String, String> {
    if ptr.is_null() {
        return Err(format!("{what} is null"));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map(str::to_string)
        .map_err(|_| format!("{what} is not UTF-8"))
}

unsafe fn read_entry(entry: &CilhookEntry) -> std::result::Result<(EntryPoint, EntryFn), String> {
    let type_name = read_cstr(entry.type_name, "type name")?;
    let method_name = read_cstr(entry.method_name, "method name")?;

    let codes: &[u32] = if entry.param_count == 0 {
        &[]
    } else if entry.param_kinds.is_null() {
        return Err(format!("{type_name}::{method_name} has a null parameter list"));
    } else {
        std::slice::from_raw_parts(entry.param_kinds, entry.param_count)
    };
    let params = codes
        .iter()
        .map(|code| {
            ParamKind::from_code(*code)
                .ok_or_else(|| format!("{type_name}::{method_name} has parameter kind {code}"))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let function = match (params.is_empty(), entry.no_args, entry.with_args) {
        (true, Some(function), None) => EntryFn::NoArgs(function),
        (false, None, Some(function)) => EntryFn::WithArgs(function),
        _ => {
            return Err(format!(
                "{type_name}::{method_name} does not provide exactly one function matching its parameters"
            ))
        }
    };

    let point = EntryPoint {
        type_name,
        method_name,
        flags: EntryFlags::from_bits_truncate(entry.flags),
        params,
    };
    Ok((point, function))
}

/// Copy a manifest into owned entries.
///
/// # Safety
/// `manifest.entries` must point to `manifest.entry_count` valid entries whose strings and
/// parameter arrays are valid for reads.
pub(crate) unsafe fn read_manifest(
    manifest: &CilhookManifest,
) -> std::result::Result<Vec<(EntryPoint, EntryFn)>, String> {
    if manifest.abi_major != CILHOOK_ABI_VERSION_MAJOR {
        return Err(format!(
            "ABI version mismatch: plugin {}.{} incompatible with host {}.{}",
            manifest.abi_major,
            manifest.abi_minor,
            CILHOOK_ABI_VERSION_MAJOR,
            CILHOOK_ABI_VERSION_MINOR
        ));
    }
    if manifest.entry_count == 0 {
        return Ok(Vec::new());
    }
    if manifest.entries.is_null() {
        return Err("manifest entry table is null".to_string());
    }

    std::slice::from_raw_parts(manifest.entries, manifest.entry_count)
        .iter()
        .map(|entry| read_entry(entry))
        .collect()
}
