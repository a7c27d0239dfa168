// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! OSTree command protocol.
//!
//! OSTree owns object storage, deduplication, and the atomic swap between
//! deployments. Oxitree only drives it as a subprocess. The protocol is split
//! into narrow capabilities, so each component depends on exactly the part of
//! OSTree it uses:
//!
//! - [`StatusReader`] reads boot status.
//! - [`ListingReader`] lists commit contents and resolves references.
//! - [`Mutator`] pulls, deploys, and switches.
//!
//! [`Ostree`] implements all three on top of a [`Runner`].

use crate::{
    catalog::{parse_listing, ParseError, PathInfo},
    deployment::{Deployments, StatusError},
    runner::{RunError, Runner, SystemRunner},
};

use std::{ffi::OsString, path::Path};
use tracing::{debug, info, instrument};

/// Read deployment boot status.
pub trait StatusReader {
    /// Take fresh snapshot of deployment status.
    fn status(&self) -> Result<Deployments>;
}

/// Read commit contents.
pub trait ListingReader {
    /// Recursively list `path` inside `commit` with checksums.
    fn list(&self, commit: &str, path: &str) -> Result<Vec<PathInfo>>;

    /// Resolve latest local commit of `refspec`.
    fn resolve(&self, refspec: &str) -> Result<String>;

    /// Record directory on the live system as an orphan commit.
    ///
    /// The returned commit has `dir` as its root, so it can be listed like
    /// any pristine tree.
    fn snapshot(&self, dir: &Path) -> Result<String>;

    /// Delete a commit made by [`ListingReader::snapshot`], along with every
    /// object only it referenced.
    fn discard(&self, commit: &str) -> Result<()>;
}

/// Change what gets deployed.
pub trait Mutator {
    /// Fetch updates for booted deployment without deploying them.
    fn pull(&self) -> Result<()>;

    /// Deploy latest fetched commit.
    fn deploy(&self) -> Result<()>;

    /// Switch booted deployment to track another reference.
    fn switch(&self, refspec: &str) -> Result<()>;
}

/// OSTree driven through a subprocess runner.
#[derive(Debug)]
pub struct Ostree<R = SystemRunner>
where
    R: Runner,
{
    runner: R,
    sysroot: Option<String>,
    repo: Option<String>,
}

impl<R> Ostree<R>
where
    R: Runner,
{
    /// Construct new OSTree client.
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            sysroot: None,
            repo: None,
        }
    }

    /// Operate on a sysroot other than the running system's.
    pub fn with_sysroot(mut self, sysroot: impl Into<String>) -> Self {
        let sysroot = sysroot.into();
        self.sysroot = (sysroot != "/").then_some(sysroot);
        self
    }

    /// Operate on a repository other than the system repository.
    ///
    /// Without one, repository commands use the repository of the configured
    /// sysroot, so they read what admin commands pull.
    pub fn with_repo(mut self, repo: Option<String>) -> Self {
        self.repo = repo;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn admin_args(&self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Vec<OsString> {
        let mut bin_args: Vec<OsString> = vec!["admin".into()];
        let mut user_args = args.into_iter().map(Into::into).collect::<Vec<_>>();
        if let Some(sysroot) = &self.sysroot {
            user_args.insert(1.min(user_args.len()), format!("--sysroot={sysroot}").into());
        }
        bin_args.extend(user_args);

        bin_args
    }

    fn repo_args(&self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Vec<OsString> {
        let mut user_args = args.into_iter().map(Into::into).collect::<Vec<_>>();
        if let Some(repo) = self.repo() {
            user_args.insert(1.min(user_args.len()), format!("--repo={repo}").into());
        }

        user_args
    }

    fn repo(&self) -> Option<String> {
        self.repo.clone().or_else(|| {
            self.sysroot.as_ref().map(|sysroot| {
                Path::new(sysroot)
                    .join("ostree/repo")
                    .to_string_lossy()
                    .into_owned()
            })
        })
    }
}

impl<R> StatusReader for Ostree<R>
where
    R: Runner,
{
    #[instrument(skip(self), level = "debug")]
    fn status(&self) -> Result<Deployments> {
        let output = self.runner.run_capture(self.admin_args(["status", "--json"]))?;
        Ok(output.parse()?)
    }
}

impl<R> ListingReader for Ostree<R>
where
    R: Runner,
{
    #[instrument(skip(self), level = "debug")]
    fn list(&self, commit: &str, path: &str) -> Result<Vec<PathInfo>> {
        let output = self
            .runner
            .run_capture(self.repo_args(["ls", "-R", "-C", commit, path]))?;
        let entries = parse_listing(&output)?;
        debug!("listed {} entries of {path} in {commit}", entries.len());

        Ok(entries)
    }

    #[instrument(skip(self), level = "debug")]
    fn resolve(&self, refspec: &str) -> Result<String> {
        let output = self.runner.run_capture(self.repo_args(["rev-parse", refspec]))?;
        first_line(&output).ok_or_else(|| OstreeError::EmptyOutput("rev-parse".into()))
    }

    #[instrument(skip(self), level = "debug")]
    fn snapshot(&self, dir: &Path) -> Result<String> {
        let tree = format!("--tree=dir={}", dir.display());
        let output = self.runner.run_capture(self.repo_args([
            "commit",
            "--orphan",
            "--no-xattrs",
            tree.as_str(),
            "--subject=oxitree live configuration snapshot",
        ]))?;
        first_line(&output).ok_or_else(|| OstreeError::EmptyOutput("commit".into()))
    }

    #[instrument(skip(self), level = "debug")]
    fn discard(&self, commit: &str) -> Result<()> {
        let target = format!("--delete-commit={commit}");
        Ok(self.runner.run(self.repo_args(["prune", target.as_str()]))?)
    }
}

impl<R> Mutator for Ostree<R>
where
    R: Runner,
{
    #[instrument(skip(self), level = "debug")]
    fn pull(&self) -> Result<()> {
        info!("fetch updates");
        Ok(self.runner.run(self.admin_args(["upgrade", "--pull-only"]))?)
    }

    #[instrument(skip(self), level = "debug")]
    fn deploy(&self) -> Result<()> {
        info!("deploy latest commit");
        Ok(self.runner.run(self.admin_args(["upgrade", "--deploy-only"]))?)
    }

    #[instrument(skip(self), level = "debug")]
    fn switch(&self, refspec: &str) -> Result<()> {
        info!("switch to {refspec}");
        Ok(self.runner.run(self.admin_args(["switch", refspec]))?)
    }
}

fn first_line(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(String::from)
}

/// OSTree protocol error types.
#[derive(Debug, thiserror::Error)]
pub enum OstreeError {
    /// OSTree could not be run, or failed.
    #[error(transparent)]
    Run(#[from] RunError),

    /// Listing output is malformed.
    #[error(transparent)]
    Listing(#[from] ParseError),

    /// Status output is malformed.
    #[error(transparent)]
    Status(#[from] StatusError),

    /// Command that must print a commit printed nothing.
    #[error("ostree {0} printed no commit")]
    EmptyOutput(String),
}

/// Friendly result alias :3
pub type Result<T, E = OstreeError> = std::result::Result<T, E>;
