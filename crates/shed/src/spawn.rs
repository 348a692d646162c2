//! Process re-execution with listener inheritance.
//!
//! Launches the current binary again with:
//! - stdin, stdout, stderr and the exported listener in slots 0..=3
//! - the parent's environment plus `LISTENER=<descriptor>`
//! - the executable's directory as working directory
//!
//! The parent keeps serving; what happens to its own listener afterwards is
//! the coordinator's decision.

use std::ffi::OsString;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::descriptor::{DescriptorError, HandoffDescriptor, LISTENER_ENV};
use crate::export::{export, ExportError};
use crate::fd;
use crate::listener::Listener;

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error("failed to resolve current executable: {0}")]
    CurrentExe(#[source] io::Error),

    #[error("executable {} has no parent directory", .0.display())]
    NoWorkingDir(PathBuf),

    #[error("failed to launch {}: {source}", .program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One entry of the child's inherited fd table. The table index is the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InheritedHandle {
    Stdin,
    Stdout,
    Stderr,
    /// Exported listener fd in the parent.
    Listener(RawFd),
}

impl InheritedHandle {
    /// Fd in the parent that backs this entry.
    pub fn source_fd(&self) -> RawFd {
        match self {
            InheritedHandle::Stdin => libc::STDIN_FILENO,
            InheritedHandle::Stdout => libc::STDOUT_FILENO,
            InheritedHandle::Stderr => libc::STDERR_FILENO,
            InheritedHandle::Listener(fd) => *fd,
        }
    }
}

/// Everything needed to launch the child, resolved before any process exists.
#[derive(Debug, Clone)]
pub struct SpawnPlan {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub working_dir: PathBuf,
    /// The one entry added to the inherited environment.
    pub env: (String, String),
    pub handles: [InheritedHandle; 4],
}

impl SpawnPlan {
    pub fn new(
        program: PathBuf,
        args: Vec<OsString>,
        descriptor: &HandoffDescriptor,
        listener_fd: RawFd,
    ) -> Result<Self, SpawnError> {
        let working_dir = program
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| SpawnError::NoWorkingDir(program.clone()))?;

        Ok(Self {
            program,
            args,
            working_dir,
            env: (LISTENER_ENV.to_string(), descriptor.encode()?),
            handles: [
                InheritedHandle::Stdin,
                InheritedHandle::Stdout,
                InheritedHandle::Stderr,
                InheritedHandle::Listener(listener_fd),
            ],
        })
    }

    /// Start the child. Either a running child is returned or nothing was
    /// started.
    pub fn launch(&self) -> Result<ChildProcess, SpawnError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(&self.working_dir)
            .env(&self.env.0, &self.env.1);

        let handles = self.handles;
        // SAFETY: the hook only calls dup2 and fcntl, both async-signal-safe,
        // and touches no memory shared with other threads.
        unsafe {
            command.pre_exec(move || install_handles(&handles));
        }

        let child = command.spawn().map_err(|source| SpawnError::Launch {
            program: self.program.clone(),
            source,
        })?;

        Ok(ChildProcess::from(child))
    }
}

/// Place each handle in its slot. Runs in the child between fork and exec.
fn install_handles(handles: &[InheritedHandle]) -> io::Result<()> {
    for (slot, handle) in handles.iter().enumerate() {
        let slot = slot as RawFd;
        let source = handle.source_fd();

        if source == slot {
            // dup2 onto itself keeps CLOEXEC; the std streams never have it.
            if slot > libc::STDERR_FILENO {
                fd::clear_cloexec(slot)?;
            }
            continue;
        }

        // dup2 clears CLOEXEC on the target.
        if unsafe { libc::dup2(source, slot) } < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// A launched child process.
#[derive(Debug)]
pub struct ChildProcess {
    pid: u32,
    child: Option<Child>,
}

impl ChildProcess {
    /// A child known only by pid, for spawners that don't own an OS handle.
    pub fn untracked(pid: u32) -> Self {
        Self { pid, child: None }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Collect the exit status if the child has exited. Never blocks.
    pub fn try_reap(&mut self) -> Option<ExitStatus> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(status) => status,
            Err(e) => {
                warn!(pid = self.pid, error = %e, "Failed to poll child process");
                None
            }
        }
    }
}

impl From<Child> for ChildProcess {
    fn from(child: Child) -> Self {
        Self {
            pid: child.id(),
            child: Some(child),
        }
    }
}

/// Launches a replacement process for a listener.
///
/// The seam the coordinator drives; tests substitute their own.
pub trait Spawn {
    fn spawn(&mut self, address: &str, listener: &Listener) -> Result<ChildProcess, SpawnError>;
}

/// Re-executes the current binary with its current arguments.
#[derive(Debug, Default)]
pub struct ProcessSpawner {
    program: Option<(PathBuf, Vec<OsString>)>,
}

impl ProcessSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `program` instead of the current executable.
    #[cfg(test)]
    pub(crate) fn with_program(program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            program: Some((program.into(), args)),
        }
    }

    /// Resolve the launch plan for an exported listener.
    pub fn plan(&self, descriptor: &HandoffDescriptor, listener_fd: RawFd) -> Result<SpawnPlan, SpawnError> {
        let (program, args) = match &self.program {
            Some((program, args)) => (program.clone(), args.clone()),
            None => (
                std::env::current_exe().map_err(SpawnError::CurrentExe)?,
                std::env::args_os().skip(1).collect(),
            ),
        };

        SpawnPlan::new(program, args, descriptor, listener_fd)
    }
}

impl Spawn for ProcessSpawner {
    fn spawn(&mut self, address: &str, listener: &Listener) -> Result<ChildProcess, SpawnError> {
        // The exported fd lives until the end of this call, on every path.
        let (descriptor, handle) = export(address, listener)?;
        let plan = self.plan(&descriptor, handle.as_raw_fd())?;

        debug!(
            exe = %plan.program.display(),
            dir = %plan.working_dir.display(),
            fd = handle.as_raw_fd(),
            descriptor = %plan.env.1,
            "Launching child process"
        );

        let child = plan.launch()?;
        info!(
            pid = child.pid(),
            address,
            name = %descriptor.debug_name,
            "Spawned child process with inherited listener"
        );

        Ok(child)
    }
}
