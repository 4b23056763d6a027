//! Process-group lifecycle for step subprocesses.
//!
//! Each step runs in its own process group so interrupt and kill reach
//! the whole tree, not just the immediate child. A wait-bridge thread
//! turns the blocking `Child::wait` into a channel the caller can select
//! against the cancellation token.

use crate::cancel::CancelToken;
use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError};
use std::io;
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

/// How long an interrupted process gets to exit before it is killed.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub enum WaitOutcome {
    /// The process exited on its own.
    Exited(ExitStatus),
    /// Cancellation was requested; the process was interrupted (and
    /// possibly killed) and has now exited.
    Cancelled(ExitStatus),
}

pub struct ProcessHandle {
    child: Option<Child>,
    pid: Option<u32>,
}

impl ProcessHandle {
    pub fn new() -> Self {
        Self { child: None, pid: None }
    }

    /// Spawn the command in a fresh process group with piped output.
    pub fn start(&mut self, mut command: Command) -> Result<()> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            unsafe {
                command.pre_exec(|| {
                    nix::unistd::setpgid(nix::unistd::Pid::from_raw(0), nix::unistd::Pid::from_raw(0))
                        .map_err(io::Error::from)?;
                    Ok(())
                });
            }
        }

        let child = command.spawn().context("failed to spawn step process")?;
        self.pid = Some(child.id());
        self.child = Some(child);
        Ok(())
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.as_mut().and_then(|c| c.stdout.take())
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.as_mut().and_then(|c| c.stderr.take())
    }

    /// Ask the process group to stop (SIGINT on Unix).
    #[cfg(unix)]
    pub fn interrupt(&self) -> Result<()> {
        self.signal_group(nix::sys::signal::Signal::SIGINT)
    }

    /// Force-terminate the process group (SIGKILL on Unix).
    #[cfg(unix)]
    pub fn kill(&self) -> Result<()> {
        self.signal_group(nix::sys::signal::Signal::SIGKILL)
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) -> Result<()> {
        let pid = self.pid.ok_or_else(|| anyhow!("process not started"))?;
        nix::sys::signal::killpg(nix::unistd::Pid::from_raw(pid as i32), signal)
            .map_err(|e| anyhow!("failed to signal process group {}: {}", pid, e))
    }

    // Without a console-event API in the dependency stack, interrupt on
    // Windows degrades to terminating the tree via taskkill.
    #[cfg(not(unix))]
    pub fn interrupt(&self) -> Result<()> {
        self.taskkill(false)
    }

    #[cfg(not(unix))]
    pub fn kill(&self) -> Result<()> {
        self.taskkill(true)
    }

    #[cfg(not(unix))]
    fn taskkill(&self, force: bool) -> Result<()> {
        let pid = self.pid.ok_or_else(|| anyhow!("process not started"))?;
        let mut command = Command::new("taskkill");
        command.args(["/T", "/PID"]).arg(pid.to_string());
        if force {
            command.arg("/F");
        }
        let status = command.status().context("failed to run taskkill")?;
        if !status.success() {
            bail!("taskkill exited with {}", status);
        }
        Ok(())
    }

    /// Wait for the process to exit. If `cancel` fires first, interrupt
    /// the group, give it `grace` to exit, then kill it. Always returns
    /// once the process is gone.
    pub fn wait(&mut self, cancel: &CancelToken, grace: Duration) -> Result<WaitOutcome> {
        let child = self
            .child
            .take()
            .ok_or_else(|| anyhow!("process not started"))?;
        let exit_rx = spawn_wait_bridge(child);

        select! {
            recv(exit_rx) -> status => {
                let status = status.context("wait bridge disconnected")??;
                Ok(WaitOutcome::Exited(status))
            }
            recv(cancel.cancelled()) -> _ => {
                if let Err(e) = self.interrupt() {
                    tracing::warn!(error = %e, "interrupt after cancellation failed");
                }
                match exit_rx.recv_timeout(grace) {
                    Ok(status) => Ok(WaitOutcome::Cancelled(status?)),
                    Err(RecvTimeoutError::Timeout) => {
                        // Interrupt was ignored; escalate. A kill error
                        // usually means the process died in between, so
                        // the bridge still delivers.
                        if let Err(e) = self.kill() {
                            tracing::warn!(error = %e, "kill after grace period failed");
                        }
                        let status = exit_rx
                            .recv_timeout(grace)
                            .context("process survived kill")??;
                        Ok(WaitOutcome::Cancelled(status))
                    }
                    Err(RecvTimeoutError::Disconnected) => bail!("wait bridge disconnected"),
                }
            }
        }
    }
}

impl Default for ProcessHandle {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_wait_bridge(mut child: Child) -> Receiver<io::Result<ExitStatus>> {
    let (tx, rx) = bounded(1);
    thread::spawn(move || {
        let _ = tx.send(child.wait());
    });
    rx
}

/// Numeric exit code for a status, mapping signal deaths to `128 + n`
/// on Unix.
pub fn exit_code(status: &ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.code().or_else(|| status.signal().map(|s| 128 + s))
    }
    #[cfg(not(unix))]
    {
        status.code()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg(script);
        command
    }

    #[test]
    fn waits_for_natural_exit() {
        let mut handle = ProcessHandle::new();
        handle.start(sh("exit 0")).unwrap();
        let cancel = CancelToken::new();
        match handle.wait(&cancel, DEFAULT_GRACE).unwrap() {
            WaitOutcome::Exited(status) => assert!(status.success()),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn reports_nonzero_exit() {
        let mut handle = ProcessHandle::new();
        handle.start(sh("exit 3")).unwrap();
        let cancel = CancelToken::new();
        match handle.wait(&cancel, DEFAULT_GRACE).unwrap() {
            WaitOutcome::Exited(status) => assert_eq!(exit_code(&status), Some(3)),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn cancellation_interrupts_sleeping_process() {
        let mut handle = ProcessHandle::new();
        handle.start(sh("sleep 30")).unwrap();

        let cancel = CancelToken::new();
        let canceller = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            canceller.cancel();
        });

        let started = Instant::now();
        let outcome = handle.wait(&cancel, Duration::from_secs(5)).unwrap();
        assert!(matches!(outcome, WaitOutcome::Cancelled(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn signalling_unstarted_process_fails() {
        let handle = ProcessHandle::new();
        assert!(handle.interrupt().is_err());
        assert!(handle.kill().is_err());
    }

    #[test]
    fn waiting_on_unstarted_process_fails() {
        let mut handle = ProcessHandle::new();
        let cancel = CancelToken::new();
        assert!(handle.wait(&cancel, DEFAULT_GRACE).is_err());
    }
}
