// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use oxitree::{
    config::Settings,
    console::{ConsoleReporter, InquirePrompter},
    ostree::{Mutator, Ostree, StatusReader},
    path::default_settings_path,
    runner::SystemRunner,
    upgrade::{
        bootloader::{Bootloader, Sbverify},
        Layout, Outcome, UpgradeOptions, Upgrader,
    },
};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::{path::PathBuf, process::exit};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "oxitree [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let settings = Settings::load(
            self.global
                .config
                .clone()
                .unwrap_or_else(default_settings_path),
        )?;

        match self.command {
            Command::Status => run_status(&self.global, &settings),
            Command::Upgrade(opts) => run_upgrade(&self.global, &settings, opts),
            Command::Switch(opts) => run_switch(&self.global, &settings, opts),
            Command::Diff(opts) => run_diff(&self.global, &settings, opts),
        }
    }
}

#[derive(Debug, Clone, Args)]
struct GlobalOptions {
    /// Path to settings file.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Echo every external command before running it.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Show deployments known to OSTree.
    #[command(override_usage = "oxitree status [options]")]
    Status,

    /// Fetch, analyze, and deploy latest commit of tracked reference.
    #[command(override_usage = "oxitree upgrade [options]")]
    Upgrade(UpgradeOpts),

    /// Track another reference.
    #[command(override_usage = "oxitree switch [options] <refspec>")]
    Switch(SwitchOptions),

    /// Analyze changes between two commits without deploying anything.
    #[command(override_usage = "oxitree diff [options] <old> <new>")]
    Diff(DiffOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct UpgradeOpts {
    /// Refresh boot-loader binaries on boot media after deployment.
    #[arg(long)]
    pub update_bootloader: bool,

    /// Deploy without asking for confirmation.
    #[arg(short = 'y', long = "yes")]
    pub assume_yes: bool,

    /// Analyze changes, but do not deploy.
    #[arg(short, long)]
    pub pretend: bool,

    /// Deploy even when already up to date.
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SwitchOptions {
    /// Remote qualified reference to track, e.g. "origin:gentoo/amd64".
    #[arg(required = true, value_name = "refspec")]
    pub refspec: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DiffOptions {
    /// Commit to compare from.
    #[arg(required = true, value_name = "old")]
    pub old: String,

    /// Commit to compare to.
    #[arg(required = true, value_name = "new")]
    pub new: String,
}

fn main() {
    let cli = Cli::parse();

    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let default_level = if cli.global.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = cli.run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn ostree(global: &GlobalOptions, settings: &Settings) -> Ostree {
    Ostree::new(SystemRunner::new(&settings.ostree.binary, global.verbose))
        .with_sysroot(&settings.ostree.sysroot)
        .with_repo(settings.ostree.repo.clone())
}

fn layout(settings: &Settings) -> Result<Layout> {
    Ok(Layout {
        sysroot: PathBuf::from(&settings.ostree.sysroot),
        packages: settings.package_database()?,
        etc_pristine: settings.etc.pristine.clone(),
        etc_live: PathBuf::from(&settings.etc.live),
    })
}

fn run_status(global: &GlobalOptions, settings: &Settings) -> Result<()> {
    let status = ostree(global, settings).status()?;
    if status.is_empty() {
        info!("no deployments");
    }

    for deployment in status.iter() {
        println!("{deployment}");
    }

    Ok(())
}

fn run_upgrade(global: &GlobalOptions, settings: &Settings, opts: UpgradeOpts) -> Result<()> {
    let ostree = ostree(global, settings);
    let prompter = InquirePrompter;
    let options = UpgradeOptions {
        update_bootloader: opts.update_bootloader,
        assume_yes: opts.assume_yes,
        pretend: opts.pretend,
        force: opts.force,
    };

    let media = if options.update_bootloader {
        Some(settings.boot_media()?)
    } else {
        None
    };
    let verifier = media
        .as_ref()
        .map(|media| Sbverify::new(SystemRunner::new(&media.verifier, global.verbose)));

    let mut upgrader = Upgrader::new(&ostree, &ostree, &ostree, &prompter, layout(settings)?);
    if let (Some(media), Some(verifier)) = (media, verifier.as_ref()) {
        upgrader = upgrader.with_bootloader(Bootloader::new(media, verifier));
    }

    let mut reporter = ConsoleReporter::new();
    match upgrader.run(&options, &mut reporter)? {
        Outcome::UpToDate => info!("nothing to do"),
        Outcome::Pretended | Outcome::Aborted => {}
        Outcome::Deployed { commit } => info!("upgrade to {commit} complete"),
    }

    Ok(())
}

fn run_switch(global: &GlobalOptions, settings: &Settings, opts: SwitchOptions) -> Result<()> {
    ostree(global, settings).switch(&opts.refspec)?;
    Ok(())
}

fn run_diff(global: &GlobalOptions, settings: &Settings, opts: DiffOptions) -> Result<()> {
    let ostree = ostree(global, settings);
    let prompter = InquirePrompter;
    let upgrader = Upgrader::new(&ostree, &ostree, &ostree, &prompter, layout(settings)?);

    let mut reporter = ConsoleReporter::new();
    upgrader.analyze(&opts.old, &opts.new).report_to(&mut reporter);

    Ok(())
}
