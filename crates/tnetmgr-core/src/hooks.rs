// # Hook Runner
//
// Runs the configured ExecUp/ExecDown commands through the shell template.
// Each command becomes the final argument of the template, so with the
// default "/usr/bin/bash -c" the hook "systemctl restart foo" runs as
// `/usr/bin/bash -c "systemctl restart foo"`.
//
// Hooks are side effects, not part of correctness: failures are logged and
// counted, never propagated, and never stop the remaining hooks.

use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Which transition a hook belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Up,
    Down,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPhase::Up => f.write_str("ExecUp"),
            HookPhase::Down => f.write_str("ExecDown"),
        }
    }
}

/// Executes hook commands sequentially with a per-command timeout
#[derive(Debug, Clone)]
pub struct HookRunner {
    shell: Vec<String>,
    timeout: Duration,
}

impl HookRunner {
    /// Create a runner from a shell template such as "/bin/sh -c"
    pub fn new(exec_shell: &str, timeout: Duration) -> Self {
        Self {
            shell: exec_shell.split_whitespace().map(str::to_string).collect(),
            timeout,
        }
    }

    /// Run every command in order
    ///
    /// Returns the number of commands that failed.
    pub async fn run_all(&self, phase: HookPhase, commands: &[String]) -> usize {
        let mut failed = 0;

        for command in commands {
            if let Err(e) = self.run(phase, command).await {
                warn!(%phase, command = %command, error = %e, "{} command failed", phase);
                failed += 1;
            }
        }

        failed
    }

    /// Run a single command to completion
    ///
    /// A timeout kills the child process.
    pub async fn run(&self, phase: HookPhase, command: &str) -> Result<()> {
        let Some((program, args)) = self.shell.split_first() else {
            return Err(Error::hook("exec_shell is empty"));
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(command)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(%phase, command, "running hook");

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(Error::hook(format!("could not launch {:?}: {}", command, e)));
            }
            Err(_) => {
                return Err(Error::hook(format!(
                    "{:?} timed out after {:?}",
                    command, self.timeout
                )));
            }
        };

        log_output(command, "stdout", &output.stdout);
        log_output(command, "stderr", &output.stderr);

        if output.status.success() {
            Ok(())
        } else {
            Err(Error::hook(format!("{:?} exited with {}", command, output.status)))
        }
    }
}

fn log_output(command: &str, stream: &str, bytes: &[u8]) {
    for line in String::from_utf8_lossy(bytes).lines() {
        debug!(command, stream, "{}", line);
    }
}
