//! XProtect Risk Collector CLI

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};
use xprotect_collector::{
    Collector, CollectorConfig, LogSource, OutputStyle, PollScheduler, SystemClock,
    UnifiedLogSource,
};

#[derive(Parser)]
#[command(name = "xprotect-collector")]
#[command(about = "Collect XProtect risk events from the macOS unified log")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 持续轮询，直到 Ctrl-C
    Run(CollectorArgs),
    /// 只执行一次采集周期
    Once(CollectorArgs),
}

#[derive(Args)]
struct CollectorArgs {
    /// Config file (default: ~/.config/xprotect-collector/config.json)
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Risk event output file
    #[arg(long, short)]
    output: Option<PathBuf>,
    /// Poll interval in seconds
    #[arg(long, short)]
    interval: Option<u64>,
    /// Initial look-back window in seconds
    #[arg(long)]
    look_back: Option<u64>,
    /// Subsystem substring to match (case-insensitive); empty matches all
    #[arg(long)]
    subsystem: Option<String>,
    /// Write each batch on a single line
    #[arg(long)]
    compact: bool,
    /// Do not mirror batches to stdout
    #[arg(long)]
    quiet: bool,
    /// Cursor checkpoint file
    #[arg(long)]
    checkpoint: Option<PathBuf>,
}

impl CollectorArgs {
    fn into_config(self) -> Result<CollectorConfig> {
        let mut config = CollectorConfig::load(self.config.as_deref())
            .context("Failed to load collector config")?;

        if let Some(output) = self.output {
            config.output_path = output;
        }
        if let Some(interval) = self.interval {
            config.poll_interval_secs = interval;
        }
        if let Some(look_back) = self.look_back {
            config.look_back_secs = look_back;
        }
        if let Some(subsystem) = self.subsystem {
            config.subsystem_filter = subsystem;
        }
        if self.compact {
            config.output_style = OutputStyle::Compact;
        }
        if self.quiet {
            config.mirror_stdout = false;
        }
        if let Some(checkpoint) = self.checkpoint {
            config.checkpoint_path = Some(checkpoint);
        }

        config.validate().context("Invalid collector config")?;
        Ok(config)
    }
}

fn build_collector(config: &CollectorConfig) -> Result<Collector<UnifiedLogSource>> {
    let source = UnifiedLogSource::open(config.scope)
        .context("Failed to initialize XProtect risk collector")?;
    let collector = Collector::from_config(config, source, Arc::new(SystemClock))?;
    Ok(collector)
}

#[tokio::main]
async fn main() -> Result<()> {
    // 通过 RUST_LOG 控制日志级别，默认 info
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("xprotect_collector=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let config = args.into_config()?;
            let collector = build_collector(&config)?;
            info!(
                source = collector.source().name(),
                output = %config.output_path.display(),
                interval_secs = config.poll_interval_secs,
                cursor = %collector.cursor().position(),
                "XProtect risk collector starting"
            );

            let handle = PollScheduler::new(config.poll_interval()).start(collector);
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            info!("Shutdown requested, finishing current cycle");
            handle.stop().await.context("Poll loop panicked")?;
        }
        Commands::Once(args) => {
            let config = args.into_config()?;
            let mut collector = build_collector(&config)?;
            let outcome = collector.poll_once().context("Error polling logs")?;
            info!(
                window_start = %outcome.window_start,
                window_end = %outcome.window_end,
                fetched = outcome.fetched,
                emitted = outcome.emitted,
                "Poll cycle complete"
            );
        }
    }

    Ok(())
}
