// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Atomic operating system upgrades on top of OSTree.
//!
//! OSTree stores operating system trees as content addressed commits, and
//! swaps between __deployments__ of those commits atomically. Oxitree is the
//! client side of that arrangement: it drives OSTree as a subprocess, models
//! its status and listings, and explains what an upgrade is about to change
//! before anything is deployed.
//!
//! # Upgrade Impact
//!
//! Two things matter to an administrator before an upgrade. Which packages
//! change, and what happens to their configuration. Package changes come from
//! comparing the package databases shipped in both commits. Configuration
//! changes come from a three-way merge between the pristine configuration tree
//! of the booted commit, the pristine configuration tree of the new commit,
//! and the live configuration tree the administrator edits.
//!
//! # See Also
//!
//! 1. [OSTree manual](https://ostreedev.github.io/ostree/)
//! 2. [`upgrade`]
//! 3. [`etc`]

pub mod catalog;
pub mod config;
pub mod console;
pub mod deployment;
pub mod etc;
pub mod ostree;
pub mod packages;
pub mod path;
pub mod runner;
pub mod upgrade;
