// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Subprocess execution.
//!
//! Every interaction with an external tool goes through a [`Runner`]. A runner
//! is bound to one program, and exposes two primitives: run the program for
//! its side effects while its output streams to our own standard streams, or
//! run it while capturing its standard output for parsing.
//!
//! Components never spawn processes on their own. They receive a runner at
//! construction time, so tests can hand them a scripted fake instead of the
//! real tool.

use std::{
    cell::RefCell,
    ffi::{OsStr, OsString},
    io::{self, Stderr, Write},
    process::{Command, ExitStatus, Stdio},
};
use tracing::{debug, instrument};

/// Execute an external program with argument vectors.
pub trait Runner {
    /// Name of the program this runner invokes.
    fn program(&self) -> &OsStr;

    /// Run program for its side effects.
    ///
    /// Standard output and standard error of the child are inherited, so they
    /// stream directly to the caller's terminal.
    ///
    /// # Errors
    ///
    /// - Return [`RunError::Spawn`] if the program cannot be started.
    /// - Return [`RunError::Exit`] if the program exits unsuccessfully.
    fn run(&self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Result<()>;

    /// Run program and capture its standard output.
    ///
    /// Standard error still streams live to the caller's terminal.
    ///
    /// # Errors
    ///
    /// - Return [`RunError::Spawn`] if the program cannot be started.
    /// - Return [`RunError::Exit`] if the program exits unsuccessfully.
    fn run_capture(&self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Result<String>;
}

/// Runner that spawns real processes.
///
/// When verbose, the full invocation is echoed to a diagnostics writer before
/// the program is executed. The writer defaults to standard error.
#[derive(Debug)]
pub struct SystemRunner<W = Stderr>
where
    W: Write,
{
    program: OsString,
    verbose: bool,
    diagnostics: RefCell<W>,
}

impl SystemRunner {
    /// Construct new runner that echoes to standard error.
    pub fn new(program: impl Into<OsString>, verbose: bool) -> Self {
        Self::with_diagnostics(program, verbose, io::stderr())
    }
}

impl<W> SystemRunner<W>
where
    W: Write,
{
    /// Construct new runner with custom diagnostics writer.
    pub fn with_diagnostics(program: impl Into<OsString>, verbose: bool, diagnostics: W) -> Self {
        Self {
            program: program.into(),
            verbose,
            diagnostics: RefCell::new(diagnostics),
        }
    }

    /// Take back the diagnostics writer.
    pub fn into_diagnostics(self) -> W {
        self.diagnostics.into_inner()
    }

    fn command(&self, args: Vec<OsString>) -> Result<(Command, String)> {
        let invocation = render_invocation(&self.program, &args);
        debug!("execute {invocation}");

        if self.verbose {
            let mut diagnostics = self.diagnostics.borrow_mut();
            writeln!(diagnostics, "+ {invocation}").map_err(RunError::Echo)?;
            diagnostics.flush().map_err(RunError::Echo)?;
        }

        let mut command = Command::new(&self.program);
        command.args(args);

        Ok((command, invocation))
    }
}

impl<W> Runner for SystemRunner<W>
where
    W: Write,
{
    fn program(&self) -> &OsStr {
        self.program.as_os_str()
    }

    #[instrument(skip(self, args), level = "debug")]
    fn run(&self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Result<()> {
        let (mut command, invocation) = self.command(args.into_iter().map(Into::into).collect())?;
        let status = command
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|source| RunError::Spawn {
                source,
                invocation: invocation.clone(),
            })?;

        if !status.success() {
            return Err(RunError::Exit { invocation, status });
        }

        Ok(())
    }

    #[instrument(skip(self, args), level = "debug")]
    fn run_capture(&self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Result<String> {
        let (mut command, invocation) = self.command(args.into_iter().map(Into::into).collect())?;
        let output = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .output()
            .map_err(|source| RunError::Spawn {
                source,
                invocation: invocation.clone(),
            })?;

        if !output.status.success() {
            return Err(RunError::Exit {
                invocation,
                status: output.status,
            });
        }

        Ok(String::from_utf8_lossy(output.stdout.as_slice()).into_owned())
    }
}

/// Render program and arguments as one space separated line.
pub fn render_invocation(program: impl AsRef<OsStr>, args: &[OsString]) -> String {
    let mut line = program.as_ref().to_string_lossy().into_owned();
    for arg in args {
        line.push(' ');
        line.push_str(arg.to_string_lossy().as_ref());
    }

    line
}

/// Subprocess error types.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Program could not be started at all.
    #[error("failed to spawn `{invocation}`")]
    Spawn {
        #[source]
        source: io::Error,
        invocation: String,
    },

    /// Program ran, but exited unsuccessfully.
    #[error("command `{invocation}` failed with {status}")]
    Exit {
        invocation: String,
        status: ExitStatus,
    },

    /// Invocation could not be echoed to the diagnostics writer.
    #[error("failed to echo invocation to diagnostics")]
    Echo(#[source] io::Error),
}

/// Friendly result alias :3
pub type Result<T, E = RunError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn verbose_runner_echoes_before_execution() -> anyhow::Result<()> {
        let runner = SystemRunner::with_diagnostics("true", true, Vec::new());
        runner.run(["admin", "status", "--json"])?;

        let result = String::from_utf8(runner.into_diagnostics())?;
        assert_eq!(result, "+ true admin status --json\n");

        Ok(())
    }

    #[test]
    fn quiet_runner_does_not_echo() -> anyhow::Result<()> {
        let runner = SystemRunner::with_diagnostics("true", false, Vec::new());
        runner.run(["upgrade"])?;
        assert!(runner.into_diagnostics().is_empty());

        Ok(())
    }

    #[test]
    fn echo_happens_even_when_spawn_fails() {
        let runner = SystemRunner::with_diagnostics("oxitree-no-such-binary", true, Vec::new());
        let result = runner.run(["ls"]);
        assert!(matches!(result, Err(RunError::Spawn { .. })));

        let echoed = String::from_utf8(runner.into_diagnostics()).unwrap();
        assert_eq!(echoed, "+ oxitree-no-such-binary ls\n");
    }

    #[test]
    fn capture_returns_stdout() -> anyhow::Result<()> {
        let runner = SystemRunner::with_diagnostics("echo", false, Vec::new());
        let result = runner.run_capture(["abc123"])?;
        assert_eq!(result, "abc123\n");

        Ok(())
    }

    #[test]
    fn nonzero_exit_is_an_error() {
        let runner = SystemRunner::with_diagnostics("false", false, Vec::new());
        match runner.run_capture(["anything"]) {
            Err(RunError::Exit { invocation, status }) => {
                assert_eq!(invocation, "false anything");
                assert!(!status.success());
            }
            other => panic!("expected exit error, got {other:?}"),
        }

        assert!(matches!(runner.run(Vec::<OsString>::new()), Err(RunError::Exit { .. })));
    }
}
