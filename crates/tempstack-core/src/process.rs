//! External command execution.
//!
//! Every external tool a stage needs (scaffolder, package manager, test
//! runner, deploy tool, cloud CLI) is described by a [`CommandSpec`] and run
//! through a [`ProcessRunner`]. Stages only see an exit code and, when asked
//! for, captured output; how the process is actually started stays behind
//! the trait so the orchestrator can be driven by fakes in tests.

use crate::error::LifecycleError;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Description of one external command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandSpec {
    /// Human-readable label used in logs.
    pub name: String,

    /// Executable.
    pub program: String,

    /// Arguments.
    pub args: Vec<String>,

    /// Working directory (inherited when unset).
    pub cwd: Option<PathBuf>,

    /// Variables added on top of the inherited environment.
    pub env: BTreeMap<String, String>,

    /// Timeout in seconds (0 = none).
    pub timeout_secs: u64,

    /// Capture stdout/stderr instead of streaming them to the terminal.
    pub capture: bool,
}

impl CommandSpec {
    pub fn new(name: &str, program: &str) -> Self {
        Self {
            name: name.to_string(),
            program: program.to_string(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            timeout_secs: 0,
            capture: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn envs(mut self, vars: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn captured(mut self) -> Self {
        self.capture = true;
        self
    }

    /// The command line as a single string, for logs and errors.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code (-1 when terminated by a signal).
    pub exit_code: i32,

    /// Captured stdout (empty unless captured).
    pub stdout: String,

    /// Captured stderr (empty unless captured).
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl ProcessOutput {
    /// Successful output with the given stdout.
    pub fn success(stdout: &str) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
            duration_ms: 0,
        }
    }

    /// Failed output with the given exit code.
    pub fn failure(exit_code: i32) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
        }
    }

    /// Whether the command exited with code 0.
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into a `Process` error.
    pub fn check(self, spec: &CommandSpec) -> Result<Self> {
        if self.passed() {
            Ok(self)
        } else {
            Err(LifecycleError::Process {
                command: spec.command_line(),
                code: self.exit_code,
            })
        }
    }
}

/// A long-running child (e.g. a dev server) owned by the caller.
#[async_trait]
pub trait BackgroundProcess: Send {
    /// Terminate the process and wait for it to exit.
    async fn stop(&mut self) -> Result<()>;
}

/// Runs external commands.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run a command to completion.
    async fn run(&self, spec: &CommandSpec) -> Result<ProcessOutput>;

    /// Start a command in the background.
    async fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn BackgroundProcess>>;
}

/// Run a command and fail on a non-zero exit.
pub async fn run_checked(runner: &dyn ProcessRunner, spec: &CommandSpec) -> Result<ProcessOutput> {
    runner.run(spec).await?.check(spec)
}

/// Production runner backed by `tokio::process`.
///
/// Every child leads its own process group. Package managers and deploy
/// tools are wrappers that fork the real workers, so a timeout or `stop`
/// signals the whole group rather than just the wrapper.
#[derive(Debug, Default, Clone)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self
    }

    fn command(spec: &CommandSpec) -> Result<Command> {
        if spec.program.is_empty() {
            return Err(LifecycleError::EmptyCommand(spec.name.clone()));
        }
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        if spec.capture {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }
        Ok(cmd)
    }

    fn spawn_child(spec: &CommandSpec) -> Result<Child> {
        Self::command(spec)?
            .spawn()
            .map_err(|source| LifecycleError::Spawn {
                command: spec.command_line(),
                source,
            })
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<ProcessOutput> {
        let start = Instant::now();
        info!(command = %spec.command_line(), name = %spec.name, "Running command");

        let child = Self::spawn_child(spec)?;
        let mut group = ProcessGroup::of(&child, &spec.name);

        let waited = if spec.timeout_secs > 0 {
            match tokio::time::timeout(
                Duration::from_secs(spec.timeout_secs),
                child.wait_with_output(),
            )
            .await
            {
                Ok(waited) => waited,
                Err(_) => {
                    // the leader itself goes with kill_on_drop
                    group.kill();
                    return Err(LifecycleError::Timeout {
                        command: spec.command_line(),
                        secs: spec.timeout_secs,
                    });
                }
            }
        } else {
            child.wait_with_output().await
        };
        let output =
            waited.map_err(|e| LifecycleError::io(spec.cwd.clone().unwrap_or_default(), e))?;

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);
        debug!(name = %spec.name, exit_code, duration_ms, "Command finished");

        Ok(ProcessOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
        })
    }

    async fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn BackgroundProcess>> {
        info!(command = %spec.command_line(), name = %spec.name, "Starting background command");
        let child = Self::spawn_child(spec)?;
        let group = ProcessGroup::of(&child, &spec.name);
        Ok(Box::new(TokioBackgroundProcess {
            name: spec.name.clone(),
            child,
            group,
        }))
    }
}

/// Process group led by a spawned child. The id is captured at spawn time
/// since `Child::id` is gone once the leader has been reaped.
#[derive(Debug, Clone)]
struct ProcessGroup {
    name: String,
    leader: Option<u32>,
}

impl ProcessGroup {
    fn of(child: &Child, name: &str) -> Self {
        Self {
            name: name.to_string(),
            leader: child.id(),
        }
    }

    /// SIGKILL every process left in the group, at most once. An empty
    /// group is fine.
    #[cfg(unix)]
    fn kill(&mut self) {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(leader) = self.leader.take() else {
            return;
        };
        match killpg(Pid::from_raw(leader as i32), Signal::SIGKILL) {
            Ok(()) => debug!(name = %self.name, pgid = leader, "Killed process group"),
            Err(Errno::ESRCH) => debug!(name = %self.name, pgid = leader, "Process group already gone"),
            Err(e) => warn!(name = %self.name, pgid = leader, error = %e, "Failed to kill process group"),
        }
    }

    #[cfg(not(unix))]
    fn kill(&mut self) {
        self.leader = None;
    }
}

/// Background child started by [`TokioProcessRunner`]. Killed on drop.
pub struct TokioBackgroundProcess {
    name: String,
    child: Child,
    group: ProcessGroup,
}

#[async_trait]
impl BackgroundProcess for TokioBackgroundProcess {
    async fn stop(&mut self) -> Result<()> {
        // workers may outlive a wrapper that already exited
        self.group.kill();
        if let Ok(Some(status)) = self.child.try_wait() {
            debug!(name = %self.name, ?status, "Background command exited");
            return Ok(());
        }
        self.child
            .kill()
            .await
            .map_err(|e| LifecycleError::io(PathBuf::from(&self.name), e))?;
        info!(name = %self.name, "Stopped background command");
        Ok(())
    }
}

impl Drop for TokioBackgroundProcess {
    fn drop(&mut self) {
        self.group.kill();
    }
}
