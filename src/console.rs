// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Terminal front-end for upgrades.
//!
//! Progress goes through tracing, analysis results go to standard output, and
//! confirmation is asked through an interactive prompt. A spinner keeps the
//! terminal alive while changes are being analyzed, since listing large
//! commits can take a while.

use crate::{
    etc::{conflicts, summarize, EtcChange},
    upgrade::{Prompter, Reporter, UpgradeEvent},
};

use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Confirm, InquireError};
use std::{io, time::Duration};
use tracing::{info, warn};

/// Report upgrade progress to the terminal.
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    spinner: Option<ProgressBar>,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn start_spinner(&mut self, message: &str) {
        let spinner = ProgressBar::new_spinner();
        let template = "{elapsed_precise:.green}  {spinner:.yellow} {msg}";
        if let Ok(style) = ProgressStyle::with_template(template) {
            spinner.set_style(style);
        }
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(100));
        self.spinner = Some(spinner);
    }

    fn stop_spinner(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }
}

impl Reporter for ConsoleReporter {
    fn report(&mut self, event: UpgradeEvent) {
        self.stop_spinner();

        match event {
            UpgradeEvent::Checking => info!("checking current deployment"),
            UpgradeEvent::Fetching { refspec } => info!("fetching updates for {refspec}"),
            UpgradeEvent::UpToDate { commit } => info!("already up to date at {commit}"),
            UpgradeEvent::UpdateAvailable { from, to } => info!("update available: {from} -> {to}"),
            UpgradeEvent::Redeploying { commit } => info!("forcing redeploy of {commit}"),
            UpgradeEvent::Analyzing => self.start_spinner("analyzing changes"),
            UpgradeEvent::PackageAnalysis(diff) => print!("packages:\n{diff}"),
            UpgradeEvent::ConfigAnalysis(changes) => print_config_changes(&changes),
            UpgradeEvent::Warning(warning) => warn!("{warning}"),
            UpgradeEvent::Pretend => info!("pretending, nothing was deployed"),
            UpgradeEvent::Confirmation => {}
            UpgradeEvent::Aborted => info!("upgrade aborted"),
            UpgradeEvent::Deploying => info!("deploying"),
            UpgradeEvent::Bootloader(report) => {
                info!("updated {} boot-loader files", report.updated.len())
            }
            UpgradeEvent::Success { commit } => {
                info!("deployed {commit}, reboot to start using it")
            }
        }
    }
}

fn print_config_changes(changes: &[EtcChange]) {
    if changes.is_empty() {
        println!("no configuration changes");
        return;
    }

    println!("configuration:");
    for change in changes {
        println!("  {change}");
    }

    let summary = summarize(changes)
        .into_iter()
        .map(|(action, count)| format!("{count} {action}"))
        .collect::<Vec<_>>();
    println!("  ({})", summary.join(", "));

    for conflict in conflicts(changes) {
        warn!("{} needs manual resolution after deployment", conflict.path);
    }
}

/// Ask for confirmation through an interactive prompt.
#[derive(Debug, Default)]
pub struct InquirePrompter;

impl Prompter for InquirePrompter {
    fn confirm(&self, question: &str) -> io::Result<bool> {
        match Confirm::new(question).with_default(false).prompt() {
            Ok(answer) => Ok(answer),
            Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => Ok(false),
            Err(err) => Err(io::Error::other(err)),
        }
    }
}
