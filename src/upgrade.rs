// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Upgrade orchestration.
//!
//! An upgrade is a strictly sequential walk through these stages:
//!
//! 1. Read current state: find the booted commit and the reference it tracks.
//! 2. Fetch updates for that reference.
//! 3. Compare the booted commit against the latest fetched commit.
//! 4. Analyze changes: package set differences and three-way configuration
//!    merge. Failures here only produce warnings.
//! 5. Stop here when pretending.
//! 6. Confirm with the user, unless told to assume yes. Declining is a normal
//!    way to finish, not an error.
//! 7. Deploy.
//! 8. Optionally update boot-loader binaries on the boot media.
//!
//! Each stage consumes the output of the one before it. Progress is reported
//! through a [`Reporter`] as [`UpgradeEvent`] values, and confirmation goes
//! through a [`Prompter`], so the whole walk can run against fakes.

pub mod bootloader;

use crate::{
    catalog::Catalog,
    config::PackageDatabase,
    deployment::StateError,
    etc::{compute_diff, EtcChange},
    ostree::{ListingReader, Mutator, OstreeError, StatusReader},
    packages::{installed_packages, PackageDiff},
    upgrade::bootloader::{Bootloader, BootloaderError, BootloaderReport},
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    io,
    path::PathBuf,
};
use tracing::{info, instrument, warn};

/// Flags controlling an upgrade.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpgradeOptions {
    /// Refresh boot-loader binaries after deployment.
    pub update_bootloader: bool,

    /// Skip confirmation prompt.
    pub assume_yes: bool,

    /// Analyze only, never deploy.
    pub pretend: bool,

    /// Deploy even when already up to date.
    pub force: bool,
}

/// Recoverable problem that skips one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub subject: String,
    pub reason: String,
}

impl Warning {
    pub fn new(subject: impl Display, reason: impl Display) -> Self {
        Self {
            subject: subject.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl Display for Warning {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}: {}", self.subject, self.reason)
    }
}

/// Progress of an upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeEvent {
    Checking,
    Fetching { refspec: String },
    UpToDate { commit: String },
    UpdateAvailable { from: String, to: String },
    Redeploying { commit: String },
    Analyzing,
    PackageAnalysis(PackageDiff),
    ConfigAnalysis(Vec<EtcChange>),
    Warning(Warning),
    Pretend,
    Confirmation,
    Aborted,
    Deploying,
    Bootloader(BootloaderReport),
    Success { commit: String },
}

impl UpgradeEvent {
    /// Short name of stage event belongs to.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Checking => "checking",
            Self::Fetching { .. } => "fetching",
            Self::UpToDate { .. } => "up-to-date",
            Self::UpdateAvailable { .. } => "update-available",
            Self::Redeploying { .. } => "redeploying",
            Self::Analyzing => "analyzing",
            Self::PackageAnalysis(_) => "package-analysis",
            Self::ConfigAnalysis(_) => "config-analysis",
            Self::Warning(_) => "warning",
            Self::Pretend => "pretend",
            Self::Confirmation => "confirmation",
            Self::Aborted => "aborted",
            Self::Deploying => "deploying",
            Self::Bootloader(_) => "bootloader",
            Self::Success { .. } => "success",
        }
    }
}

/// Receive upgrade progress.
pub trait Reporter {
    fn report(&mut self, event: UpgradeEvent);
}

impl Reporter for Vec<UpgradeEvent> {
    fn report(&mut self, event: UpgradeEvent) {
        self.push(event);
    }
}

/// Ask user for confirmation.
pub trait Prompter {
    /// Ask yes or no question. Anything but an explicit yes is a no.
    fn confirm(&self, question: &str) -> io::Result<bool>;
}

/// How an upgrade finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    UpToDate,
    Pretended,
    Aborted,
    Deployed { commit: String },
}

/// Locations analysis and deployment work with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Physical root of deployments.
    pub sysroot: PathBuf,

    /// Package database inside commits.
    pub packages: PackageDatabase,

    /// Pristine configuration tree inside commits.
    pub etc_pristine: String,

    /// Live configuration tree of running system.
    pub etc_live: PathBuf,
}

/// Result of analyzing changes between two commits.
///
/// Each part is `None` when it could not be computed. The reason is recorded
/// in `warnings`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub packages: Option<PackageDiff>,
    pub etc: Option<Vec<EtcChange>>,
    pub warnings: Vec<Warning>,
}

impl Analysis {
    /// Report warnings first, then whatever parts were computed.
    pub fn report_to(self, reporter: &mut dyn Reporter) {
        for warning in self.warnings {
            reporter.report(UpgradeEvent::Warning(warning));
        }
        if let Some(packages) = self.packages {
            reporter.report(UpgradeEvent::PackageAnalysis(packages));
        }
        if let Some(etc) = self.etc {
            reporter.report(UpgradeEvent::ConfigAnalysis(etc));
        }
    }
}

/// Upgrade state machine.
pub struct Upgrader<'a> {
    status: &'a dyn StatusReader,
    listing: &'a dyn ListingReader,
    mutator: &'a dyn Mutator,
    prompter: &'a dyn Prompter,
    layout: Layout,
    bootloader: Option<Bootloader<'a>>,
}

impl<'a> Upgrader<'a> {
    /// Construct new upgrader.
    pub fn new(
        status: &'a dyn StatusReader,
        listing: &'a dyn ListingReader,
        mutator: &'a dyn Mutator,
        prompter: &'a dyn Prompter,
        layout: Layout,
    ) -> Self {
        Self {
            status,
            listing,
            mutator,
            prompter,
            layout,
            bootloader: None,
        }
    }

    /// Attach boot-loader updater.
    pub fn with_bootloader(mut self, bootloader: Bootloader<'a>) -> Self {
        self.bootloader = Some(bootloader);
        self
    }

    /// Run upgrade.
    ///
    /// # Errors
    ///
    /// - Return [`UpgradeError::State`] if nothing is booted, or the deployed
    ///   commit cannot be found for boot-loader staging.
    /// - Return [`UpgradeError::NotTracking`] if booted deployment is pinned.
    /// - Return [`UpgradeError::Ostree`] if reading status, fetching,
    ///   resolving, or deploying fails.
    /// - Return [`UpgradeError::Prompt`] if confirmation cannot be asked.
    /// - Return [`UpgradeError::Bootloader`] if boot media cannot be written.
    #[instrument(skip(self, reporter), level = "debug")]
    pub fn run(&self, options: &UpgradeOptions, reporter: &mut dyn Reporter) -> Result<Outcome> {
        if options.update_bootloader && self.bootloader.is_none() {
            return Err(UpgradeError::BootloaderUnconfigured);
        }

        reporter.report(UpgradeEvent::Checking);
        let status = self.status.status()?;
        let booted = status.currently_booted()?;
        let current = booted.checksum.clone();
        let refspec = booted.refspec.clone();
        if refspec.is_empty() {
            return Err(UpgradeError::NotTracking(current));
        }
        info!("booted {current} tracking {refspec}");

        reporter.report(UpgradeEvent::Fetching {
            refspec: refspec.clone(),
        });
        self.mutator.pull()?;

        let latest = self.listing.resolve(&refspec)?;
        if latest == current {
            reporter.report(UpgradeEvent::UpToDate {
                commit: current.clone(),
            });

            if !options.force {
                if options.update_bootloader {
                    self.update_bootloader(&current, reporter)?;
                }
                return Ok(Outcome::UpToDate);
            }

            reporter.report(UpgradeEvent::Redeploying {
                commit: current.clone(),
            });
        } else {
            reporter.report(UpgradeEvent::UpdateAvailable {
                from: current.clone(),
                to: latest.clone(),
            });
        }

        reporter.report(UpgradeEvent::Analyzing);
        self.analyze(&current, &latest).report_to(reporter);

        if options.pretend {
            reporter.report(UpgradeEvent::Pretend);
            return Ok(Outcome::Pretended);
        }

        if !options.assume_yes {
            reporter.report(UpgradeEvent::Confirmation);
            let question = format!("Deploy {latest}?");
            if !self.prompter.confirm(&question).map_err(UpgradeError::Prompt)? {
                reporter.report(UpgradeEvent::Aborted);
                return Ok(Outcome::Aborted);
            }
        }

        reporter.report(UpgradeEvent::Deploying);
        self.mutator.deploy()?;

        if options.update_bootloader {
            self.update_bootloader(&latest, reporter)?;
        }

        reporter.report(UpgradeEvent::Success {
            commit: latest.clone(),
        });

        Ok(Outcome::Deployed { commit: latest })
    }

    /// Analyze package and configuration changes from `old` to `new`.
    ///
    /// Never fails. Whatever could not be analyzed is reported as a warning.
    #[instrument(skip(self), level = "debug")]
    pub fn analyze(&self, old: &str, new: &str) -> Analysis {
        let mut analysis = Analysis::default();

        match self.package_diff(old, new) {
            Ok(diff) => analysis.packages = Some(diff),
            Err(err) => {
                warn!("package analysis failed: {err}");
                analysis
                    .warnings
                    .push(Warning::new("package analysis", err));
            }
        }

        match self.etc_diff(old, new) {
            Ok(changes) => analysis.etc = Some(changes),
            Err(err) => {
                warn!("configuration analysis failed: {err}");
                analysis
                    .warnings
                    .push(Warning::new("configuration analysis", err));
            }
        }

        analysis
    }

    fn package_diff(&self, old: &str, new: &str) -> Result<PackageDiff, OstreeError> {
        let old_packages = installed_packages(self.listing, old, &self.layout.packages)?;
        let new_packages = installed_packages(self.listing, new, &self.layout.packages)?;

        Ok(PackageDiff::between(&old_packages, &new_packages))
    }

    fn etc_diff(&self, old: &str, new: &str) -> Result<Vec<EtcChange>, OstreeError> {
        let pristine = self.layout.etc_pristine.as_str();
        let old_tree = Catalog::rooted(pristine, self.listing.list(old, pristine)?);
        let new_tree = Catalog::rooted(pristine, self.listing.list(new, pristine)?);

        let live = self.listing.snapshot(&self.layout.etc_live)?;
        let listing = self.listing.list(&live, "/");

        // INVARIANT: Snapshot never outlives analysis, even if listing failed.
        if let Err(err) = self.listing.discard(&live) {
            warn!("failed to discard live configuration snapshot {live}: {err}");
        }
        let user_tree = Catalog::rooted("/", listing?);

        Ok(compute_diff(&old_tree, &new_tree, &user_tree))
    }

    fn update_bootloader(&self, commit: &str, reporter: &mut dyn Reporter) -> Result<()> {
        let bootloader = self
            .bootloader
            .as_ref()
            .ok_or(UpgradeError::BootloaderUnconfigured)?;

        // INVARIANT: Take fresh status snapshot, deployment just changed.
        let status = self.status.status()?;
        let deployment = status.find_by_commit(commit)?;
        let root = deployment.root_path(&self.layout.sysroot);
        info!("update boot-loader from {:?}", root.display());

        let report = bootloader.update(&root)?;
        for warning in &report.warnings {
            reporter.report(UpgradeEvent::Warning(warning.clone()));
        }
        reporter.report(UpgradeEvent::Bootloader(report));

        Ok(())
    }
}

/// Upgrade error types.
#[derive(Debug, thiserror::Error)]
pub enum UpgradeError {
    /// OSTree protocol failure.
    #[error(transparent)]
    Ostree(#[from] OstreeError),

    /// Deployment state is not what an upgrade needs.
    #[error(transparent)]
    State(#[from] StateError),

    /// Booted deployment does not track any reference.
    #[error("booted deployment {0} is pinned and tracks no reference")]
    NotTracking(String),

    /// Confirmation prompt failed.
    #[error("failed to ask for confirmation")]
    Prompt(#[source] io::Error),

    /// Boot-loader update requested without boot media settings.
    #[error("boot-loader update requested, but no boot media is configured")]
    BootloaderUnconfigured,

    /// Boot media could not be written.
    #[error(transparent)]
    Bootloader(#[from] BootloaderError),
}

/// Friendly result alias :3
pub type Result<T, E = UpgradeError> = std::result::Result<T, E>;
