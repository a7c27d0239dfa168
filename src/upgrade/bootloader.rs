// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Boot-loader staging.
//!
//! After a deployment, the boot media may still carry boot-loader binaries
//! from an older commit. Staging copies the binaries shipped inside the
//! freshly deployed commit over the ones found on the boot media.
//!
//! # Procedure
//!
//! 1. Search the boot media for files named like the boot-loader.
//! 2. Verify each one against the configured certificate. Files that fail
//!    verification are skipped.
//! 3. For every directory holding a verified file, copy the primary
//!    boot-loader binary and every shim binary of the deployed commit into
//!    place.
//!
//! All copies of one directory are written to temporary files next to their
//! destinations first, then renamed over them. A source missing from the
//! deployed commit stops that directory before anything is written, because
//! a half-updated boot-loader is worse than an old one.

use crate::{
    config::BootMedia,
    path::join_inside,
    runner::{RunError, Runner, SystemRunner},
    upgrade::Warning,
};

use glob::{glob_with, MatchOptions, Pattern, PatternError};
use std::{
    collections::{BTreeMap, BTreeSet},
    ffi::OsString,
    fs::{read_dir, File},
    io,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

/// Verify signatures of boot binaries.
pub trait SignatureVerifier {
    /// Verify `file` against `certificate`.
    fn verify(&self, certificate: &Path, file: &Path) -> Result<(), RunError>;
}

/// Signature verification through `sbverify`.
#[derive(Debug)]
pub struct Sbverify<R = SystemRunner>
where
    R: Runner,
{
    runner: R,
}

impl<R> Sbverify<R>
where
    R: Runner,
{
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

impl<R> SignatureVerifier for Sbverify<R>
where
    R: Runner,
{
    fn verify(&self, certificate: &Path, file: &Path) -> Result<(), RunError> {
        let output = self.runner.run_capture([
            OsString::from("--cert"),
            certificate.into(),
            file.into(),
        ])?;
        debug!("verified {:?}: {}", file.display(), output.trim());

        Ok(())
    }
}

/// Outcome of a boot-loader update.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BootloaderReport {
    /// Destination files that were replaced.
    pub updated: Vec<PathBuf>,

    /// Files or directories that were skipped.
    pub warnings: Vec<Warning>,
}

/// Boot-loader updater for one boot media root.
pub struct Bootloader<'a> {
    media: BootMedia,
    verifier: &'a dyn SignatureVerifier,
}

impl<'a> Bootloader<'a> {
    pub fn new(media: BootMedia, verifier: &'a dyn SignatureVerifier) -> Self {
        Self { media, verifier }
    }

    /// Find boot-loader files already present on boot media.
    ///
    /// Names are matched without regard to case, since boot media is usually
    /// FAT formatted.
    ///
    /// # Errors
    ///
    /// - Return [`BootloaderError::Pattern`] if search pattern is invalid.
    pub fn locate(&self) -> Result<(Vec<PathBuf>, Vec<Warning>)> {
        let pattern = format!(
            "{}/**/{}",
            Pattern::escape(&self.media.media_root.to_string_lossy()),
            Pattern::escape(&self.media.bootloader),
        );
        let options = MatchOptions {
            case_sensitive: false,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };

        let mut found = Vec::new();
        let mut warnings = Vec::new();
        for entry in glob_with(&pattern, options)? {
            match entry {
                Ok(path) if path.is_file() => found.push(path),
                Ok(_) => continue,
                Err(err) => warnings.push(Warning::new(err.path().display(), err.error())),
            }
        }

        Ok((found, warnings))
    }

    /// Update boot-loader binaries from deployment at `deployment_root`.
    ///
    /// # Errors
    ///
    /// - Return [`BootloaderError::Pattern`] if search pattern is invalid.
    /// - Return [`BootloaderError::Stage`] if writing to boot media fails.
    #[instrument(skip(self), level = "debug")]
    pub fn update(&self, deployment_root: &Path) -> Result<BootloaderReport> {
        let (found, mut warnings) = self.locate()?;
        if found.is_empty() {
            warn!(
                "no {} found under {:?}",
                self.media.bootloader,
                self.media.media_root.display()
            );
        }

        // INVARIANT: Only directories holding a verified boot-loader are touched.
        let mut targets: BTreeMap<PathBuf, BTreeSet<OsString>> = BTreeMap::new();
        for file in found {
            if let Err(err) = self.verifier.verify(&self.media.certificate, &file) {
                warn!("skip {:?}: {err}", file.display());
                warnings.push(Warning::new(file.display(), err));
                continue;
            }

            let (Some(dir), Some(name)) = (file.parent(), file.file_name()) else {
                continue;
            };
            targets
                .entry(dir.to_path_buf())
                .or_default()
                .insert(name.to_os_string());
        }

        let primary = join_inside(deployment_root, &self.media.source);
        let shims = match self.shim_sources(deployment_root) {
            Ok(shims) => shims,
            Err(warning) => {
                warn!("{warning}");
                warnings.push(warning);
                Vec::new()
            }
        };

        let mut report = BootloaderReport {
            updated: Vec::new(),
            warnings,
        };
        for (dir, names) in targets {
            let mut copies = names
                .into_iter()
                .map(|name| (primary.clone(), name))
                .collect::<Vec<_>>();
            copies.extend(shims.iter().cloned());

            if let Some(missing) = copies.iter().find(|(source, _)| !source.is_file()) {
                let warning = Warning::new(
                    dir.display(),
                    format!("{:?} missing from deployment, left untouched", missing.0.display()),
                );
                warn!("{warning}");
                report.warnings.push(warning);
                continue;
            }

            report.updated.extend(stage_directory(&dir, &copies)?);
        }

        Ok(report)
    }

    fn shim_sources(&self, deployment_root: &Path) -> Result<Vec<(PathBuf, OsString)>, Warning> {
        let shim_dir = join_inside(deployment_root, &self.media.shim_dir);
        let entries = read_dir(&shim_dir).map_err(|err| Warning::new(shim_dir.display(), err))?;

        let mut shims = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| Warning::new(shim_dir.display(), err))?;
            let path = entry.path();
            if path.is_file() {
                shims.push((path, entry.file_name()));
            }
        }
        shims.sort();

        Ok(shims)
    }
}

/// Replace files in `dir` with copies of their sources.
///
/// Every copy is written to a temporary file in `dir` before any destination
/// is replaced.
fn stage_directory(dir: &Path, copies: &[(PathBuf, OsString)]) -> Result<Vec<PathBuf>> {
    let mut staged = Vec::new();
    for (source, name) in copies {
        let mut temp = NamedTempFile::new_in(dir).map_err(|err| stage_error(dir, err))?;
        let mut reader = File::open(source).map_err(|err| stage_error(source, err))?;
        io::copy(&mut reader, temp.as_file_mut()).map_err(|err| stage_error(source, err))?;
        temp.as_file().sync_all().map_err(|err| stage_error(dir, err))?;
        staged.push((temp, dir.join(name)));
    }

    let mut updated = Vec::new();
    for (temp, destination) in staged {
        temp.persist(&destination)
            .map_err(|err| stage_error(&destination, err.error))?;
        info!("updated {:?}", destination.display());
        updated.push(destination);
    }
    debug!("staged {} boot files in {:?}", updated.len(), dir.display());

    Ok(updated)
}

fn stage_error(path: &Path, source: io::Error) -> BootloaderError {
    BootloaderError::Stage {
        source,
        path: path.to_path_buf(),
    }
}

/// Boot-loader update error types.
#[derive(Debug, thiserror::Error)]
pub enum BootloaderError {
    /// Search pattern for boot-loader files is invalid.
    #[error(transparent)]
    Pattern(#[from] PatternError),

    /// Boot file could not be written to boot media.
    #[error("failed to stage boot file at {:?}", path.display())]
    Stage {
        #[source]
        source: io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
type Result<T, E = BootloaderError> = std::result::Result<T, E>;
