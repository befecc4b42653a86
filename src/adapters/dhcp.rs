use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::core::share::{LeaseOutcome, LeaseProvider};

/// One-shot DHCP client run (`udhcpc -i <iface> --quit -f -s <script>`).
///
/// The child is killed if the acquiring future is dropped, so cancelling the
/// sync loop never leaves it behind.
pub struct DhcpClient {
    command: String,
    interface: String,
    script: PathBuf,
}

impl DhcpClient {
    pub fn new(command: impl Into<String>, interface: impl Into<String>, script: PathBuf) -> Self {
        Self {
            command: command.into(),
            interface: interface.into(),
            script,
        }
    }

    fn build(&self) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.arg("-i")
            .arg(&self.interface)
            .arg("--quit")
            .arg("-f")
            .arg("-s")
            .arg(&self.script)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl LeaseProvider for DhcpClient {
    async fn acquire(&self) -> LeaseOutcome {
        debug!(command = %self.command, interface = %self.interface, "Running DHCP client");

        match self.build().status().await {
            Ok(status) if status.success() => LeaseOutcome::Acquired,
            Ok(status) => LeaseOutcome::Failed(format!("{} exited with {status}", self.command)),
            Err(e) => LeaseOutcome::Failed(format!("failed to run {}: {e}", self.command)),
        }
    }
}
