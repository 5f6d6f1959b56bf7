//! One install-time patch run.
//!
//! A [`PatchSession`] performs the whole sequence: injection check, backup, entry resolution,
//! hook point location, insertion, write and re-verification. Fatal errors are turned into a
//! [`BugReport`] and emitted once before they are returned.

use std::{fmt, path::PathBuf};

use log::{debug, info};
use serde::Serialize;

use crate::{
    config::PatchConfig,
    diagnostics::{file_sha1, BugReport, Reporter},
    disassembler::{Instruction, Operand},
    image::Image,
    patch::{
        applier::{apply, resolve_entry},
        backup::Backup,
        detector::is_injected,
        locator::locate,
    },
    Error, Result,
};

/// What a successful injection did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchSummary {
    /// Full name of the patched method
    pub method: String,
    /// Index of the inserted call
    pub position: usize,
    /// Instruction count before the insertion
    pub instructions_before: usize,
    /// Instruction count after the insertion
    pub instructions_after: usize,
    /// True if the call went into an iterator's step method
    pub iterator: bool,
    /// Path of the backup
    pub backup: PathBuf,
    /// SHA-1 of the image before patching
    pub sha1_before: String,
    /// SHA-1 of the patched image
    pub sha1_after: String,
}

/// Outcome of [`PatchSession::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The entry call was inserted
    Injected(PatchSummary),
    /// The image already calls the entry; nothing was changed
    AlreadyInjected,
}

/// Disassembly of the hook target, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Inspection {
    /// Full name of the target method
    pub method: String,
    /// True if the hook method is an iterator and `method` is its step method
    pub iterator: bool,
    /// Index of the marker call
    pub position: usize,
    /// True if the image already calls the entry
    pub injected: bool,
    /// One rendered line per instruction
    pub lines: Vec<String>,
}

impl fmt::Display for Inspection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.method)?;
        if self.iterator {
            writeln!(f, "  (iterator step method)")?;
        }
        for (index, line) in self.lines.iter().enumerate() {
            let mark = if index == self.position { "=>" } else { "  " };
            writeln!(f, "{mark} IL_#{index:<4} {line}")?;
        }
        write!(f, "injected: {}", self.injected)
    }
}

/// Render an instruction, resolving call tokens to their full names.
#[must_use]
pub fn render_instruction(image: &Image, instruction: &Instruction) -> String {
    match instruction.operand {
        Operand::Token(token) => match image.call_signature(token) {
            Some(callee) => format!("{} {}", instruction.mnemonic, callee),
            None => instruction.to_string(),
        },
        _ => instruction.to_string(),
    }
}

/// A patch run over one host image.
#[derive(Debug)]
pub struct PatchSession {
    config: PatchConfig,
    reporter: Reporter,
}

impl PatchSession {
    /// A session for `config`.
    #[must_use]
    pub fn new(config: PatchConfig) -> Self {
        PatchSession {
            config,
            reporter: Reporter::new(),
        }
    }

    /// The session configuration
    #[must_use]
    pub fn config(&self) -> &PatchConfig {
        &self.config
    }

    /// True once a bug report was emitted for this session
    #[must_use]
    pub fn has_reported(&self) -> bool {
        self.reporter.has_reported()
    }

    /// Run the session.
    ///
    /// # Errors
    /// Any failure other than an already injected image. The error has been reported through
    /// the session's [`Reporter`] before it is returned.
    pub fn run(&mut self) -> Result<PatchOutcome> {
        match self.run_steps() {
            Ok(outcome) => Ok(outcome),
            Err(Error::AlreadyInjected) => Ok(PatchOutcome::AlreadyInjected),
            Err(error) => {
                self.reporter.report(&BugReport::new(&self.config, &error));
                Err(error)
            }
        }
    }

    fn run_steps(&self) -> Result<PatchOutcome> {
        let config = &self.config;
        let spec = &config.hook;
        info!("Patching {}", config.image.display());

        let sha1_before = file_sha1(&config.image)?;
        let mut image = Image::from_file(&config.image)?;
        if is_injected(&image, spec) {
            info!("{} already calls {}", config.image.display(), spec.entry_signature());
            return Ok(PatchOutcome::AlreadyInjected);
        }

        let backup = Backup::new(&config.image, &config.backup_suffix);
        backup.create()?;

        let loader = Image::from_file(&config.loader)?;
        let entry = resolve_entry(&loader, spec)?;

        let point = locate(&image, spec)?;
        if config.debug {
            for line in self.disassemble(&image, point.method) {
                debug!("  {line}");
            }
        }

        let insertion = apply(&mut image, &point, &entry, spec)?;
        image.write()?;

        let reopened = Image::from_file(&config.image)?;
        if !is_injected(&reopened, spec) {
            return Err(Error::Verification(format!(
                "{} does not call {} after writing",
                config.image.display(),
                spec.entry_signature()
            )));
        }

        let summary = PatchSummary {
            method: image.method_full_name(insertion.method),
            position: insertion.position,
            instructions_before: point.instruction_count,
            instructions_after: insertion.instruction_count,
            iterator: point.iterator,
            backup: backup.path().to_path_buf(),
            sha1_before,
            sha1_after: file_sha1(&config.image)?,
        };
        info!(
            "Injected into {} at {} ({} -> {} instructions)",
            summary.method, summary.position, summary.instructions_before, summary.instructions_after
        );
        Ok(PatchOutcome::Injected(summary))
    }

    fn disassemble(&self, image: &Image, method: usize) -> Vec<String> {
        image
            .method(method)
            .and_then(|method| method.body.as_ref())
            .map(|body| {
                body.instructions
                    .iter()
                    .map(|instruction| render_instruction(image, instruction))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Locate the hook point and disassemble its method without changing anything.
    ///
    /// # Errors
    /// Returns an error if the image cannot be opened or the hook point cannot be located.
    pub fn inspect(&self) -> Result<Inspection> {
        let image = Image::from_file(&self.config.image)?;
        let point = locate(&image, &self.config.hook)?;
        Ok(Inspection {
            method: image.method_full_name(point.method),
            iterator: point.iterator,
            position: point.position,
            injected: is_injected(&image, &self.config.hook),
            lines: self.disassemble(&image, point.method),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::HookSpec,
        patch::detector::is_injected_at,
        test::{sample_image, write_samples},
        LocateError,
    };
    use tempfile::tempdir;

    #[test]
    fn inject_then_refuse() {
        let dir = tempdir().unwrap();
        let (image, loader) = write_samples(dir.path());
        let config = PatchConfig::new(&image, &loader);

        let PatchOutcome::Injected(summary) = PatchSession::new(config.clone()).run().unwrap() else {
            panic!("expected an injection");
        };
        assert_eq!(summary.method, "System.Void GameManager::Awake()");
        assert_eq!(summary.position, 2);
        assert_eq!(summary.instructions_before, 6);
        assert_eq!(summary.instructions_after, 7);
        assert!(!summary.iterator);
        assert_ne!(summary.sha1_before, summary.sha1_after);
        assert_eq!(summary.backup, config.backup_path());

        assert!(is_injected_at(&image, &config.hook).unwrap());
        let original = Image::from_file(&summary.backup).unwrap();
        assert_eq!(original.methods(), sample_image().methods());

        let before = std::fs::read(&image).unwrap();
        let mut second = PatchSession::new(config);
        assert_eq!(second.run().unwrap(), PatchOutcome::AlreadyInjected);
        assert!(!second.has_reported());
        assert_eq!(std::fs::read(&image).unwrap(), before);
    }

    #[test]
    fn inject_into_iterator() {
        let dir = tempdir().unwrap();
        let (image, loader) = write_samples(dir.path());
        let config = PatchConfig::new(&image, &loader).with_hook(HookSpec {
            hook_method: "Start".into(),
            ..HookSpec::default()
        });

        let PatchOutcome::Injected(summary) = PatchSession::new(config).run().unwrap() else {
            panic!("expected an injection");
        };
        assert!(summary.iterator);
        assert_eq!(
            summary.method,
            "System.Boolean GameManager/<Start>d__3::MoveNext()"
        );
        assert_eq!(summary.position, 3);
    }

    #[test]
    fn locate_failure_is_reported() {
        let dir = tempdir().unwrap();
        let (image, loader) = write_samples(dir.path());
        let config = PatchConfig::new(&image, &loader).with_hook(HookSpec {
            marker: "Instantiate".into(),
            ..HookSpec::default()
        });
        let before = std::fs::read(&image).unwrap();

        let mut session = PatchSession::new(config);
        assert!(matches!(
            session.run(),
            Err(Error::Locate(LocateError::MarkerNotFound { .. }))
        ));
        assert!(session.has_reported());
        assert_eq!(std::fs::read(&image).unwrap(), before);
    }

    #[test]
    fn missing_loader() {
        let dir = tempdir().unwrap();
        let (image, _) = write_samples(dir.path());
        let config = PatchConfig::new(&image, dir.path().join("absent.dll"));
        assert!(PatchSession::new(config).run().is_err());
    }

    #[test]
    fn inspect_marks_hook_point() {
        let dir = tempdir().unwrap();
        let (image, loader) = write_samples(dir.path());
        let inspection = PatchSession::new(PatchConfig::new(&image, &loader))
            .inspect()
            .unwrap();

        assert_eq!(inspection.position, 1);
        assert!(!inspection.injected);
        assert_eq!(
            inspection.lines[1],
            "call System.Void UnityEngine.Object::DontDestroyOnLoad(UnityEngine.Object)"
        );
        let text = inspection.to_string();
        assert!(text.contains("=> IL_#1"));
    }
}
