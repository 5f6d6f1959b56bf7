//! Install-time patching of a host image.
//!
//! # Key Components
//!
//! - [`locate`] - Finds the marker call the entry call is inserted after
//! - [`is_injected`] - Checks whether an image already calls the entry
//! - [`apply`] - Inserts the entry call, refusing an image that already has it
//! - [`Backup`] - Single-generation copy of the host image
//! - [`PatchSession`] - The complete install sequence
//!
//! # Example
//!
//! ```rust,no_run
//! use cilhook::config::HookSpec;
//! use cilhook::image::Image;
//! use cilhook::patch::{is_injected, locate};
//!
//! let image = Image::from_file("Assembly-CSharp.dll".as_ref())?;
//! let spec = HookSpec::default();
//! if !is_injected(&image, &spec) {
//!     let point = locate(&image, &spec)?;
//!     println!("would insert after instruction {}", point.position);
//! }
//! # Ok::<(), cilhook::Error>(())
//! ```

mod applier;
mod backup;
mod detector;
mod locator;
mod session;

pub use applier::{apply, resolve_entry, Insertion};
pub use backup::Backup;
pub use detector::{find_injections, is_injected, is_injected_at, Injection};
pub use locator::{is_iterator_shaped, locate, HookPoint};
pub use session::{render_instruction, Inspection, PatchOutcome, PatchSession, PatchSummary};
