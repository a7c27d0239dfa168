// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the settings file oxitree reads. Every section is
//! optional. Keys that are only needed by some operations are validated when
//! those operations ask for them, so a missing boot section only matters when
//! the boot-loader is actually being updated.
//!
//! # General Layout
//!
//! ```toml
//! [ostree]
//! binary = "ostree"
//! sysroot = "/"
//!
//! [packages]
//! database = "/var/db/pkg"
//! fallback = "/usr/lib/oxitree/pkgdb"
//!
//! [etc]
//! pristine = "/usr/etc"
//! live = "/etc"
//!
//! [boot]
//! media_root = "/boot/efi"
//! certificate = "db.crt"
//! ```

use crate::path::resolve_under;

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

/// Settings file layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub ostree: OstreeSettings,
    pub packages: PackageSettings,
    pub etc: EtcSettings,
    pub boot: BootSettings,
}

impl Settings {
    /// Load settings file.
    ///
    /// A missing file is not an error. Default settings are used instead.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if settings file cannot be read.
    /// - Return [`ConfigError::Deserialize`] if settings file is malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match read_to_string(path) {
            Ok(data) => data.parse(),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no settings at {:?}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(err) => Err(ConfigError::Read {
                source: err,
                path: path.into(),
            }),
        }
    }

    /// Package database locations.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::MissingKey`] if `packages.database` is unset.
    pub fn package_database(&self) -> Result<PackageDatabase> {
        let primary = require(&self.packages.database, "packages.database")?;
        let fallback = self
            .packages
            .fallback
            .as_deref()
            .filter(|fallback| !fallback.trim().is_empty())
            .map(String::from);

        Ok(PackageDatabase {
            primary: primary.into(),
            fallback,
        })
    }

    /// Boot media locations needed for boot-loader updates.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::MissingKey`] if `boot.media_root` or
    ///   `boot.certificate` is unset.
    pub fn boot_media(&self) -> Result<BootMedia> {
        let media_root = PathBuf::from(require(&self.boot.media_root, "boot.media_root")?);
        let certificate = require(&self.boot.certificate, "boot.certificate")?;
        let certificate = resolve_under(&media_root, certificate);

        Ok(BootMedia {
            media_root,
            certificate,
            bootloader: self.boot.bootloader.clone(),
            source: self.boot.source.clone(),
            shim_dir: self.boot.shim_dir.clone(),
            verifier: self.boot.verifier.clone(),
        })
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path setting.
        settings.ostree.sysroot = expand(&settings.ostree.sysroot)?;
        settings.ostree.repo = settings.ostree.repo.as_deref().map(expand).transpose()?;
        settings.packages.database = settings.packages.database.as_deref().map(expand).transpose()?;
        settings.packages.fallback = settings.packages.fallback.as_deref().map(expand).transpose()?;
        settings.etc.pristine = expand(&settings.etc.pristine)?;
        settings.etc.live = expand(&settings.etc.live)?;
        settings.boot.media_root = settings.boot.media_root.as_deref().map(expand).transpose()?;
        settings.boot.certificate = settings.boot.certificate.as_deref().map(expand).transpose()?;

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// How to reach the external deployment tool.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OstreeSettings {
    /// Name or path of OSTree binary.
    pub binary: String,

    /// Physical root of deployments.
    pub sysroot: String,

    /// Repository to use instead of the system repository.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
}

impl Default for OstreeSettings {
    fn default() -> Self {
        Self {
            binary: "ostree".into(),
            sysroot: "/".into(),
            repo: None,
        }
    }
}

/// Where installed packages are recorded inside a commit.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PackageSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

/// Where configuration trees live.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EtcSettings {
    /// Pristine configuration tree inside a commit.
    pub pristine: String,

    /// Live configuration tree of running system.
    pub live: String,
}

impl Default for EtcSettings {
    fn default() -> Self {
        Self {
            pristine: "/usr/etc".into(),
            live: "/etc".into(),
        }
    }
}

/// Boot media settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BootSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_root: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,

    /// File name of boot-loader binary to look for on boot media.
    pub bootloader: String,

    /// Primary boot-loader binary inside a deployed commit.
    pub source: String,

    /// Directory of shim binaries inside a deployed commit.
    pub shim_dir: String,

    /// Signature verification tool.
    pub verifier: String,
}

impl Default for BootSettings {
    fn default() -> Self {
        Self {
            media_root: None,
            certificate: None,
            bootloader: "grubx64.efi".into(),
            source: "/usr/lib/oxitree/efi/grubx64.efi".into(),
            shim_dir: "/usr/lib/oxitree/efi/shim".into(),
            verifier: "sbverify".into(),
        }
    }
}

/// Validated package database locations.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PackageDatabase {
    pub primary: String,
    pub fallback: Option<String>,
}

/// Validated boot media settings.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BootMedia {
    pub media_root: PathBuf,
    pub certificate: PathBuf,
    pub bootloader: String,
    pub source: String,
    pub shim_dir: String,
    pub verifier: String,
}

fn require<'a>(value: &'a Option<String>, key: &'static str) -> Result<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::MissingKey(key))
}

fn expand(value: &str) -> Result<String> {
    Ok(shellexpand::full(value)
        .map_err(ConfigError::ShellExpansion)?
        .into_owned())
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required key is missing or empty.
    #[error("required setting {0:?} is missing or empty")]
    MissingKey(&'static str),

    /// Settings file cannot be read.
    #[error("failed to read settings at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
