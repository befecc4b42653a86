//! Lifecycle of the long-running external processes.
//!
//! The supervisor owns `wpa_supplicant` and `iw event` plus the temporary
//! credentials file. Everything it started is sent SIGTERM and reaped on
//! shutdown, whether the daemon is exiting cleanly or not.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tempfile::NamedTempFile;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

/// How long a child gets to exit after SIGTERM before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

struct ManagedChild {
    name: String,
    child: Child,
}

#[derive(Default)]
pub struct ProcessSupervisor {
    children: Vec<ManagedChild>,
    credentials: Option<NamedTempFile>,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of processes currently owned.
    pub fn running(&self) -> usize {
        self.children.len()
    }

    /// Generate a supplicant config with `wpa_passphrase <ssid>`, feeding the
    /// password on stdin so it never shows up in the process list.
    pub async fn write_credentials(
        &mut self,
        passphrase_cmd: &str,
        ssid: &str,
        password: &str,
    ) -> Result<()> {
        let file = NamedTempFile::new().context("Failed to create credentials file")?;
        let stdout = file
            .reopen()
            .context("Failed to open credentials file for writing")?;

        let mut child = Command::new(passphrase_cmd)
            .arg(ssid)
            .stdin(Stdio::piped())
            .stdout(Stdio::from(stdout))
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to run {passphrase_cmd}"))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(password.as_bytes())
                .await
                .context("Failed to pass wifi password")?;
            // Dropping stdin sends EOF
        }

        let status = child
            .wait()
            .await
            .with_context(|| format!("Failed to wait for {passphrase_cmd}"))?;
        if !status.success() {
            bail!("{passphrase_cmd} failed with {status}");
        }

        debug!(path = %file.path().display(), "Wrote supplicant credentials");
        self.credentials = Some(file);
        Ok(())
    }

    /// Start `wpa_supplicant` against the generated credentials.
    pub fn start_supplicant(&mut self, command: &str, interface: &str) -> Result<()> {
        let Some(credentials) = &self.credentials else {
            bail!("Credentials must be written before starting the supplicant");
        };

        let child = Command::new(command)
            .arg("-i")
            .arg(interface)
            .arg("-c")
            .arg(credentials.path())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {command}"))?;

        self.adopt(command, child);
        Ok(())
    }

    /// Start `iw event` and hand back its output for the link monitor.
    pub fn start_event_monitor(&mut self, command: &str) -> Result<BufReader<ChildStdout>> {
        let mut child = Command::new(command)
            .arg("event")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {command} event"))?;

        let stdout = child
            .stdout
            .take()
            .with_context(|| format!("{command} event has no stdout"))?;

        self.adopt(command, child);
        Ok(BufReader::new(stdout))
    }

    fn adopt(&mut self, name: &str, child: Child) {
        info!(process = name, pid = child.id(), "Started process");
        self.children.push(ManagedChild {
            name: name.to_string(),
            child,
        });
    }

    /// SIGTERM every owned process, newest first, and wait for each to exit.
    pub async fn shutdown(&mut self) {
        while let Some(mut managed) = self.children.pop() {
            terminate(&mut managed).await;
        }
        // Dropping the temp file removes the credentials from disk
        self.credentials = None;
    }
}

async fn terminate(managed: &mut ManagedChild) {
    let name = managed.name.as_str();

    let Some(pid) = managed.child.id() else {
        debug!(process = name, "Process already exited");
        return;
    };

    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        warn!(process = name, pid, error = %e, "Failed to send SIGTERM");
    }

    match tokio::time::timeout(TERMINATE_GRACE, managed.child.wait()).await {
        Ok(Ok(status)) => info!(process = name, pid, status = %status, "Process stopped"),
        Ok(Err(e)) => warn!(process = name, pid, error = %e, "Failed to reap process"),
        Err(_) => {
            warn!(process = name, pid, "Process ignored SIGTERM, killing");
            if let Err(e) = managed.child.kill().await {
                warn!(process = name, pid, error = %e, "Failed to kill process");
            }
        }
    }
}
