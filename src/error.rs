use std::{io, path::PathBuf};

use strum::Display;
use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// # Error Categories
///
/// ## Image Parsing Errors
/// - [`Error::Malformed`] - Corrupted or invalid metadata or method body structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond the end of the input
/// - [`Error::NotSupported`] - Not a .NET assembly, or uncompressed metadata tables
/// - [`Error::GoblinErr`] - Damaged PE headers, reported by goblin
/// - [`Error::Empty`] - Empty input provided
///
/// ## Patch Session Errors
/// - [`Error::Locate`] - The hook point could not be found
/// - [`Error::AlreadyInjected`] - The image already calls the loader entry point
/// - [`Error::EntryNotFound`], [`Error::EntryAmbiguous`], [`Error::EntrySignature`] - The loader
///   image does not expose exactly one usable entry method
/// - [`Error::Verification`] - The written image does not carry the hook when re-read
///
/// ## I/O and Configuration Errors
/// - [`Error::FileError`] - Filesystem I/O errors while reading
/// - [`Error::Write`] - A persisted write failed, categorized by [`WriteCause`]
/// - [`Error::Config`] - A configuration file could not be read or parsed
///
/// # Examples
///
/// ```rust,no_run
/// use cilhook::{Error, image::Image};
///
/// match Image::from_file("Assembly-CSharp.dll".as_ref()) {
///     Ok(image) => println!("{} types", image.types().len()),
///     Err(Error::NotSupported) => eprintln!("not a .NET assembly"),
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("Malformed image: {} ({}:{})", message, file, line);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The image is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the input.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// This file type is not supported.
    ///
    /// Produced for files that are not PE images, PE images without CLI metadata and
    /// assemblies whose tables use the uncompressed `#-` stream.
    #[error("This file type is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error while reading.
    #[error("{0}")]
    FileError(#[from] io::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),

    /// Error from the goblin crate while parsing PE headers.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    /// A configuration file could not be loaded.
    #[error("Invalid configuration - {0}")]
    Config(String),

    /// The hook point could not be located.
    ///
    /// Fatal to a patch session, nothing has been modified when this is returned.
    #[error("Failed to locate the hook point - {0}")]
    Locate(#[from] LocateError),

    /// The image already contains a call to the loader entry point.
    ///
    /// Returned by the applier before any mutation.
    #[error("The image already calls the loader entry point")]
    AlreadyInjected,

    /// The loader image does not define the configured entry method.
    #[error("Entry method '{type_name}::{method_name}' not found in the loader image")]
    EntryNotFound {
        /// Full name of the entry type
        type_name: String,
        /// Name of the entry method
        method_name: String,
    },

    /// The loader image defines more than one candidate entry method.
    #[error("Entry method '{type_name}::{method_name}' is ambiguous ({count} candidates)")]
    EntryAmbiguous {
        /// Full name of the entry type
        type_name: String,
        /// Name of the entry method
        method_name: String,
        /// Number of candidates found
        count: usize,
    },

    /// The entry method is not a static, parameterless method returning `System.Void`.
    #[error("Entry method has an unsupported signature - {0}")]
    EntrySignature(String),

    /// A write to disk failed.
    ///
    /// Write failures are never retried. `cause` tells the caller what kind of failure it was.
    #[error("Failed to write '{}' ({cause}): {source}", .path.display())]
    Write {
        /// Destination that could not be written
        path: PathBuf,
        /// Category of the failure
        cause: WriteCause,
        /// Underlying error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The written image does not pass the post-write injection check.
    #[error("Post-write verification failed - {0}")]
    Verification(String),
}

impl Error {
    /// Build an [`Error::Write`] from an I/O error, categorizing its cause.
    pub fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Write {
            path: path.into(),
            cause: WriteCause::from_io(&source),
            source: Box::new(source),
        }
    }

    /// Build an [`Error::Write`] for a payload that could not be serialized.
    pub fn serialization(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Error::Write {
            path: path.into(),
            cause: WriteCause::Serialization,
            source: Box::new(source),
        }
    }
}

/// Category of a failed write, used for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum WriteCause {
    /// Access to the destination was denied
    #[strum(serialize = "permission denied")]
    PermissionDenied,
    /// The destination path exceeds the platform limit
    #[strum(serialize = "path too long")]
    PathTooLong,
    /// A parent directory of the destination does not exist
    #[strum(serialize = "missing directory")]
    MissingDirectory,
    /// The operation was blocked by a security policy
    #[strum(serialize = "blocked by security policy")]
    SecurityPolicy,
    /// The payload could not be serialized
    #[strum(serialize = "serialization failed")]
    Serialization,
    /// Any other I/O failure
    #[strum(serialize = "i/o error")]
    Io,
}

impl WriteCause {
    /// Categorize an I/O error.
    ///
    /// Raw OS codes are checked first, then the portable [`io::ErrorKind`].
    #[must_use]
    pub fn from_io(error: &io::Error) -> Self {
        if let Some(code) = error.raw_os_error() {
            #[cfg(unix)]
            {
                if code == libc::ENAMETOOLONG {
                    return WriteCause::PathTooLong;
                }
                if code == libc::EPERM {
                    return WriteCause::SecurityPolicy;
                }
            }
            #[cfg(windows)]
            {
                // ERROR_FILENAME_EXCED_RANGE, ERROR_ACCESS_DISABLED_BY_POLICY
                if code == 206 {
                    return WriteCause::PathTooLong;
                }
                if code == 1260 {
                    return WriteCause::SecurityPolicy;
                }
            }
            #[cfg(not(any(unix, windows)))]
            let _ = code;
        }

        match error.kind() {
            io::ErrorKind::PermissionDenied => WriteCause::PermissionDenied,
            io::ErrorKind::NotFound => WriteCause::MissingDirectory,
            _ => WriteCause::Io,
        }
    }
}

/// Reasons the hook point locator gives up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocateError {
    /// The hook type does not exist in the image
    #[error("type '{0}' not found")]
    TypeNotFound(String),

    /// The hook type has no method with the hook method name
    #[error("method '{method_name}' not found on '{type_name}'")]
    MethodNotFound {
        /// Full name of the hook type
        type_name: String,
        /// Name of the hook method
        method_name: String,
    },

    /// The hook method is an iterator but no generated state machine type was found
    #[error("no generated iterator type for '{type_name}::{method_name}'")]
    IteratorTypeNotFound {
        /// Full name of the hook type
        type_name: String,
        /// Name of the hook method
        method_name: String,
    },

    /// The state machine type has no step method
    #[error("state machine '{type_name}' has no '{method_name}' method")]
    StepMethodNotFound {
        /// Full name of the state machine type
        type_name: String,
        /// Name of the step method
        method_name: String,
    },

    /// The target method has no body to scan
    #[error("method '{0}' has no body")]
    NoBody(String),

    /// No call in the target method matches the marker
    #[error("no call to a method containing '{marker}' in '{method}'")]
    MarkerNotFound {
        /// Full name of the scanned method
        method: String,
        /// The marker fragment that was searched for
        marker: String,
    },
}

/// A failure isolated to a single plugin during dispatch.
///
/// These are recorded in the plugin's report and never abort the dispatch of other plugins.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    /// The module could not be loaded
    #[error("failed to load '{file_name}': {reason}")]
    Load {
        /// File name of the plugin
        file_name: String,
        /// Loader diagnostic
        reason: String,
    },

    /// No entry point matched the query
    #[error("no entry point matching '{query}' in '{file_name}'")]
    Resolve {
        /// File name of the plugin
        file_name: String,
        /// Rendered entry query
        query: String,
    },

    /// The caller arguments do not fit the entry's parameters
    #[error("'{entry}' in '{file_name}' cannot be bound: {reason}")]
    Binding {
        /// File name of the plugin
        file_name: String,
        /// Rendered entry point
        entry: String,
        /// Why binding failed
        reason: String,
    },

    /// The entry point reported a failure
    #[error("'{entry}' in '{file_name}' failed: {reason}")]
    Invoke {
        /// File name of the plugin
        file_name: String,
        /// Rendered entry point
        entry: String,
        /// Failure description
        reason: String,
    },

    /// The entry point panicked
    #[error("'{entry}' in '{file_name}' panicked: {message}")]
    Panicked {
        /// File name of the plugin
        file_name: String,
        /// Rendered entry point
        entry: String,
        /// Panic payload, if it was a string
        message: String,
    },
}
