use std::path::PathBuf;

use anyhow::{Context, Result};
use camsync::config::{AppConfig, ConfigOverrides, DisplayOverrides};
use camsync::core::CursorMode;
use camsync::{context, daemon, logging};
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "camsync")]
#[command(about = "Copies new photos off a Wi-Fi camera whenever it comes in range", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: /etc/camsync/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the wireless link and sync on every connection
    Run(RunArgs),
    /// Print the merged configuration with secrets masked
    CheckConfig,
}

#[derive(Args)]
struct RunArgs {
    /// Local directory photos are copied into
    destination: Option<PathBuf>,

    #[arg(long)]
    interface: Option<String>,

    #[arg(long)]
    ssid: Option<String>,

    #[arg(long)]
    password: Option<String>,

    /// Only copy files after this one (file name, or timestamp with --newer-mode time)
    #[arg(long)]
    newer: Option<String>,

    #[arg(long, value_enum)]
    newer_mode: Option<CursorMode>,

    #[arg(long, num_args = 2, value_names = ["CLK", "DIO"])]
    display_pins: Option<Vec<u32>>,

    /// Report progress on the console only
    #[arg(long)]
    no_display: bool,

    /// Fake link events from stdin instead of driving the wireless stack
    #[arg(long)]
    simulation: bool,

    #[arg(long, short)]
    verbose: bool,

    #[arg(long)]
    json_logs: bool,
}

impl RunArgs {
    fn overrides(&self) -> ConfigOverrides {
        let (clk, dio) = match self.display_pins.as_deref() {
            Some(&[clk, dio]) => (Some(clk), Some(dio)),
            _ => (None, None),
        };

        ConfigOverrides {
            interface: self.interface.clone(),
            ssid: self.ssid.clone(),
            password: self.password.clone(),
            destination: self.destination.clone(),
            newer: self.newer.clone(),
            newer_mode: self.newer_mode,
            simulation: self.simulation.then_some(true),
            verbose: self.verbose.then_some(true),
            json_logs: self.json_logs.then_some(true),
            display: DisplayOverrides {
                enabled: self.no_display.then_some(false),
                clk,
                dio,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_file = cli.config.as_deref();

    match &cli.command {
        Commands::Run(args) => {
            let config = AppConfig::new(config_file, Some(&args.overrides()))?;
            logging::init(logging::LogConfig {
                json: config.json_logs,
                verbose: config.verbose,
            })?;

            let ctx = context::AppContext::new(config);
            daemon::run(ctx).await.context("camsync stopped with an error")?
        }
        Commands::CheckConfig => {
            let config = AppConfig::new::<ConfigOverrides>(config_file, None)?;
            let rendered =
                toml::to_string_pretty(&config.redacted()).context("Failed to render config")?;
            print!("{rendered}");
        }
    }

    Ok(())
}
