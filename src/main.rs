//! Quadview: live mosaic of NVR channels

use std::path::PathBuf;

use clap::Parser;
use color_eyre::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use quadview::{Config, NvrEndpoint, StartPolicy};

#[derive(Parser, Debug)]
#[command(name = "quadview", version, about = "Tiled live view of NVR channels")]
struct Cli {
    /// NVR channel as HOST:PORT:CHANNEL[:SUBCHANNEL]; repeat for each tile
    #[arg(long = "nvr", value_name = "ENDPOINT")]
    nvr: Vec<NvrEndpoint>,

    #[arg(long, short = 'u')]
    user: Option<String>,

    #[arg(long, short = 'p')]
    pass: Option<String>,

    /// Canvas width in pixels
    #[arg(long)]
    width: Option<u32>,

    /// Canvas height in pixels
    #[arg(long)]
    height: Option<u32>,

    /// When to start compositor playback
    #[arg(long, value_name = "first-ready|all-ready")]
    policy: Option<StartPolicy>,

    /// TOML configuration file
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if !self.nvr.is_empty() {
            config.sources = self.nvr;
        }
        if let Some(user) = self.user {
            config.credentials.username = user;
        }
        if let Some(pass) = self.pass {
            config.credentials.password = pass;
        }
        if let Some(width) = self.width {
            config.display.width = width;
        }
        if let Some(height) = self.height {
            config.display.height = height;
        }
        if let Some(policy) = self.policy {
            config.pipeline.start_policy = policy;
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("quadview=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    info!(
        sources = config.sources.len(),
        width = config.display.width,
        height = config.display.height,
        policy = %config.pipeline.start_policy,
        "Quadview launching..."
    );

    run(config).await?;

    info!("Quadview shutting down");
    Ok(())
}

#[cfg(feature = "gstreamer-pipeline")]
async fn run(config: Config) -> Result<()> {
    use quadview::pipeline::gst_engine::GstEngine;
    use quadview::Orchestrator;

    let engine = GstEngine::new(&config)?;
    let orchestrator = Orchestrator::new(
        &engine,
        config.source_params(),
        &config.display,
        &config.pipeline,
    )?;
    orchestrator
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

#[cfg(not(feature = "gstreamer-pipeline"))]
async fn run(_config: Config) -> Result<()> {
    Err(color_eyre::eyre::eyre!(
        "built without a media engine; enable the `gstreamer-pipeline` feature"
    ))
}
