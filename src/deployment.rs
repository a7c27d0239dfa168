// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Deployment status model.
//!
//! OSTree reports its boot status as a JSON document listing every
//! deployment it knows about. A fresh [`Deployments`] snapshot is parsed on
//! every query. Nothing here is cached, because the external tool remains the
//! source of truth.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::warn;

/// One bootable deployment.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Deployment {
    /// Content checksum of deployed commit.
    pub checksum: String,

    /// Logical OS name deployment is grouped under.
    pub stateroot: String,

    /// Reference deployment tracks for updates. Empty when pinned.
    #[serde(default)]
    pub refspec: String,

    #[serde(default)]
    pub booted: bool,

    #[serde(default)]
    pub pending: bool,

    #[serde(default)]
    pub rollback: bool,

    #[serde(default)]
    pub staged: bool,

    #[serde(default)]
    pub index: u32,

    #[serde(default)]
    pub serial: u32,
}

impl Deployment {
    /// Name of deployment directory on disk.
    pub fn dir_name(&self) -> String {
        format!("{}.{}", self.checksum, self.serial)
    }

    /// Absolute path to deployment root filesystem under `sysroot`.
    pub fn root_path(&self, sysroot: impl AsRef<Path>) -> PathBuf {
        crate::path::deployment_root(sysroot, &self.stateroot, self.dir_name())
    }
}

impl Display for Deployment {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let marker = if self.booted { '*' } else { ' ' };
        write!(fmt, "{marker} {} {}", self.stateroot, self.dir_name())?;

        if !self.refspec.is_empty() {
            write!(fmt, " ({})", self.refspec)?;
        }

        let flags = [
            (self.pending, "pending"),
            (self.rollback, "rollback"),
            (self.staged, "staged"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
        .collect::<Vec<_>>();
        if !flags.is_empty() {
            write!(fmt, " [{}]", flags.join(", "))?;
        }

        Ok(())
    }
}

/// Ordered snapshot of deployment status.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Deployments {
    deployments: Vec<Deployment>,
}

impl Deployments {
    pub fn new(deployments: Vec<Deployment>) -> Self {
        Self { deployments }
    }

    /// Find deployment that is currently booted.
    ///
    /// # Errors
    ///
    /// - Return [`StateError::NoBootedDeployment`] if nothing is booted.
    pub fn currently_booted(&self) -> Result<&Deployment, StateError> {
        let mut booted = self.deployments.iter().filter(|deployment| deployment.booted);
        let first = booted.next().ok_or(StateError::NoBootedDeployment)?;

        if booted.next().is_some() {
            warn!("status reports more than one booted deployment, using {}", first.dir_name());
        }

        Ok(first)
    }

    /// Find first deployment of target commit.
    ///
    /// # Errors
    ///
    /// - Return [`StateError::NotFound`] if no deployment matches.
    pub fn find_by_commit(&self, commit: &str) -> Result<&Deployment, StateError> {
        self.deployments
            .iter()
            .find(|deployment| deployment.checksum == commit)
            .ok_or_else(|| StateError::NotFound {
                commit: commit.into(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Deployment> {
        self.deployments.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.deployments.is_empty()
    }
}

impl FromStr for Deployments {
    type Err = StatusError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let status: Deployments = serde_json::from_str(data)?;

        // INVARIANT: Every deployment names its commit.
        if let Some(position) = status
            .deployments
            .iter()
            .position(|deployment| deployment.checksum.is_empty())
        {
            return Err(StatusError::EmptyChecksum(position));
        }

        Ok(status)
    }
}

/// Status document parse error types.
#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    /// Document is not valid status JSON.
    #[error("malformed deployment status")]
    Parse(#[from] serde_json::Error),

    /// Deployment entry lacks a commit checksum.
    #[error("deployment at position {0} has an empty checksum")]
    EmptyChecksum(usize),
}

/// Deployment state error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// Status lists no booted deployment.
    #[error("no booted deployment found")]
    NoBootedDeployment,

    /// No deployment of a known commit exists.
    #[error("no deployment found for commit {commit}")]
    NotFound { commit: String },
}
