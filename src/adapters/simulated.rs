use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::Mutex;

use crate::core::share::{LeaseOutcome, LeaseProvider};

/// Writes `iw event`-style lines into an in-memory pipe.
#[derive(Clone)]
pub struct LinkSimulator {
    interface: String,
    writer: std::sync::Arc<Mutex<DuplexStream>>,
}

impl LinkSimulator {
    pub async fn up(&self) -> std::io::Result<()> {
        self.emit(format!(
            "{} (phy #0): connected to 02:00:00:00:00:01\n",
            self.interface
        ))
        .await
    }

    pub async fn down(&self) -> std::io::Result<()> {
        self.emit(format!(
            "{} (phy #0): disconnected (local request)\n",
            self.interface
        ))
        .await
    }

    /// Pass an arbitrary event line through, e.g. noise the monitor should ignore.
    pub async fn emit(&self, line: String) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await
    }

    /// Close the stream, as if the event monitor process exited.
    pub async fn close(&self) -> std::io::Result<()> {
        self.writer.lock().await.shutdown().await
    }
}

/// Simulated wireless event source: a controller plus the stream the link
/// monitor reads from.
pub fn simulated_link(interface: &str) -> (LinkSimulator, BufReader<DuplexStream>) {
    let (events, writer) = tokio::io::duplex(4096);

    (
        LinkSimulator {
            interface: interface.to_string(),
            writer: std::sync::Arc::new(Mutex::new(writer)),
        },
        BufReader::new(events),
    )
}

/// Drive the simulator from stdin: `up`, `down`.
pub fn spawn_stdin_controller(simulator: LinkSimulator) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let result = match line.trim() {
                "up" => simulator.up().await,
                "down" => simulator.down().await,
                "" => Ok(()),
                _ => {
                    println!("(Simulator) Use: 'up' or 'down'");
                    Ok(())
                }
            };
            if result.is_err() {
                break;
            }
        }
    });
}

/// Lease step that always succeeds after a short pause.
pub struct SimulatedLease {
    pub delay: Duration,
}

impl Default for SimulatedLease {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(200),
        }
    }
}

#[async_trait]
impl LeaseProvider for SimulatedLease {
    async fn acquire(&self) -> LeaseOutcome {
        tokio::time::sleep(self.delay).await;
        LeaseOutcome::Acquired
    }
}
