//! Wires the link monitor, the sync orchestrator and the supervised
//! processes together and runs them until shutdown.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::io::AsyncBufRead;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters;
use crate::config::AppConfig;
use crate::context::AppContext;
use crate::core::{
    BasicReporter, DisplayReporter, LinkEventMonitor, MonitorExit, ProgressReporter,
    SyncOrchestrator, SyncSettings, transfer,
};
use crate::display::{RecordingBus, SysfsBus, Tm1637};
use crate::supervisor::ProcessSupervisor;

type EventStream = Box<dyn AsyncBufRead + Unpin + Send>;

pub async fn run(ctx: AppContext) -> Result<()> {
    spawn_signal_handler(ctx.cancel.clone());

    let config = ctx.config.clone();
    let reporter = tokio::task::spawn_blocking(move || build_reporter(&config))
        .await
        .context("Display setup task failed")??;
    let mut supervisor = ProcessSupervisor::new();

    let result = serve(&ctx, &mut supervisor, reporter.clone()).await;

    ctx.cancel.cancel();
    supervisor.shutdown().await;

    // Blank the display and wait for the frame to go out
    let blanked = tokio::task::spawn_blocking(move || {
        reporter.reset();
        drop(reporter);
    })
    .await;
    if let Err(e) = blanked {
        warn!(error = %e, "Failed to blank display");
    }

    info!("Stopped");
    result
}

/// Build sync settings and make sure the destination is usable before any
/// process is started. Storage failures later on only abandon a cycle.
pub async fn sync_settings(config: &AppConfig) -> Result<SyncSettings> {
    let settings = SyncSettings {
        remote_dir: config.share.remote_dir.clone(),
        destination: config.destination.clone(),
        cursor: config.cursor()?,
    };

    transfer::prepare_destination(&settings.destination)
        .await
        .context("Destination is unusable")?;

    Ok(settings)
}

async fn serve(
    ctx: &AppContext,
    supervisor: &mut ProcessSupervisor,
    reporter: Arc<dyn ProgressReporter>,
) -> Result<()> {
    let config = ctx.config.as_ref();

    let settings = sync_settings(config).await?;
    let events = open_event_stream(config, supervisor).await?;

    let monitor = LinkEventMonitor::new(ctx.link.clone());
    let orchestrator = SyncOrchestrator::new(
        ctx.link.clone(),
        adapters::lease_provider(config),
        adapters::share_connector(config),
        reporter,
        settings,
    );

    info!(
        interface = %config.interface,
        ssid = %config.ssid,
        simulation = config.simulation,
        "camsync started"
    );

    tokio::select! {
        exit = monitor.run(events, &ctx.cancel) => {
            match exit.context("Failed to read link events")? {
                MonitorExit::Cancelled => Ok(()),
                MonitorExit::EndOfStream if config.simulation => {
                    info!("Simulated link closed");
                    Ok(())
                }
                MonitorExit::EndOfStream => bail!("Link event monitor exited unexpectedly"),
            }
        }
        () = orchestrator.run(&ctx.cancel) => Ok(()),
    }
}

/// Start the event source. On real hardware the event monitor comes up
/// before the supplicant so the first association is not missed.
async fn open_event_stream(
    config: &AppConfig,
    supervisor: &mut ProcessSupervisor,
) -> Result<EventStream> {
    if config.simulation {
        let (simulator, events) = adapters::simulated::simulated_link(&config.interface);
        adapters::simulated::spawn_stdin_controller(simulator);
        println!("(Simulator) Type 'up' or 'down' to toggle the camera link");
        return Ok(Box::new(events));
    }

    let events = supervisor.start_event_monitor(&config.commands.event_monitor)?;
    supervisor
        .write_credentials(&config.commands.passphrase, &config.ssid, &config.password)
        .await?;
    supervisor.start_supplicant(&config.commands.supplicant, &config.interface)?;

    Ok(Box::new(events))
}

/// Pick the progress reporter once at startup.
///
/// Without the display hardware progress goes to the console only, unless
/// `display.required` is set. Opening the pins blocks, so call this off the
/// async runtime.
pub fn build_reporter(config: &AppConfig) -> Result<Arc<dyn ProgressReporter>> {
    let settings = &config.display;

    if !settings.enabled {
        return Ok(Arc::new(BasicReporter));
    }

    if config.simulation {
        let driver = Tm1637::new(RecordingBus::new().logging(), settings.brightness)
            .context("Failed to initialise simulated display")?;
        let reporter = DisplayReporter::new(driver).context("Failed to start display worker")?;
        return Ok(Arc::new(reporter));
    }

    match SysfsBus::open(settings.clk, settings.dio)
        .and_then(|bus| Tm1637::new(bus, settings.brightness))
    {
        Ok(driver) => {
            info!(clk = settings.clk, dio = settings.dio, "Display ready");
            let reporter =
                DisplayReporter::new(driver).context("Failed to start display worker")?;
            Ok(Arc::new(reporter))
        }
        Err(e) if settings.required => Err(e).context("Display unavailable"),
        Err(e) => {
            warn!(error = %e, "Display unavailable, reporting progress on the console only");
            Ok(Arc::new(BasicReporter))
        }
    }
}

async fn wait_for_shutdown() -> std::io::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(()) => {
                info!("Shutdown requested");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to install signal handlers"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulation_uses_recording_display() {
        let config = AppConfig {
            simulation: true,
            ..AppConfig::default()
        };
        assert!(build_reporter(&config).is_ok());
    }

    #[test]
    fn missing_required_display_is_fatal() {
        let mut config = AppConfig::default();
        config.display.clk = 9990;
        config.display.dio = 9991;
        config.display.required = true;
        assert!(build_reporter(&config).is_err());

        config.display.required = false;
        assert!(build_reporter(&config).is_ok());
    }

    #[tokio::test]
    async fn unusable_destination_fails_at_startup() {
        let dir = tempfile::TempDir::new().unwrap();
        let occupied = dir.path().join("photos");
        std::fs::write(&occupied, b"occupied").unwrap();

        let mut config = AppConfig {
            destination: occupied,
            ..AppConfig::default()
        };
        let err = sync_settings(&config).await.unwrap_err();
        assert!(err.to_string().contains("Destination is unusable"));

        config.destination = dir.path().join("new/photos");
        let settings = sync_settings(&config).await.unwrap();
        assert!(settings.destination.is_dir());
    }
}
