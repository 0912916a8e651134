//! Chariot Agent Host
//!
//! Runs a Chariot script with the plan/agent functions installed, streams
//! every agent lifecycle event to stdout as one JSON object per line, and
//! shuts all named agents down on Ctrl-C or when the deadline passes.

use anyhow::Context;
use chariot::runtime::Runtime;
use chariot_bdi::{
    load_scheduler_config, register_plan_functions, AgentEvent, EventBus, SchedulerConfig,
    ScriptRegistry,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser, Debug, Clone)]
#[command(name = "chariot-agent")]
#[command(about = "Run a Chariot script and host the agents it starts")]
struct Args {
    /// Script to run
    #[arg(long)]
    script: PathBuf,

    /// Scheduler configuration file (TOML format)
    #[arg(long = "config", env = "CHARIOT_AGENT_CONFIG")]
    config_path: Option<PathBuf>,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    run_for_secs: Option<u64>,

    /// Default dispatch slots per agent (overrides the config file)
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Default poll interval in seconds (overrides the config file)
    #[arg(long)]
    poll_seconds: Option<u64>,

    /// Do not print agent events
    #[arg(long, default_value = "false")]
    quiet_events: bool,
}

impl Args {
    /// Config file values (or defaults) with command-line overrides applied.
    fn scheduler_config(&self) -> anyhow::Result<SchedulerConfig> {
        let mut config = match &self.config_path {
            Some(path) => load_scheduler_config(path)?,
            None => SchedulerConfig::default(),
        };
        if let Some(max) = self.max_concurrent {
            config.max_concurrent = max;
        }
        if let Some(poll) = self.poll_seconds {
            config.poll_seconds = poll;
        }
        config.validate()?;
        Ok(config)
    }
}

async fn print_events(mut rx: mpsc::Receiver<AgentEvent>) {
    while let Some(event) = rx.recv().await {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Failed to serialize agent event: {}", e),
        }
    }
}

async fn wait_for_shutdown(run_for: Option<Duration>) -> anyhow::Result<()> {
    match run_for {
        Some(deadline) => {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => signal.context("failed to listen for Ctrl-C")?,
                _ = tokio::time::sleep(deadline) => info!("Run deadline reached"),
            }
        }
        None => tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chariot_agent=info".parse()?)
                .add_directive("chariot_bdi=info".parse()?),
        )
        .with_ansi(false)
        .init();

    let args = Args::parse();
    let config = args.scheduler_config()?;
    let source = std::fs::read_to_string(&args.script)
        .with_context(|| format!("failed to read script {}", args.script.display()))?;

    info!("Chariot agent host starting...");
    if let Some(path) = &args.config_path {
        info!("Using configuration: {}", path.display());
    }
    info!(
        "Defaults: max_concurrent={}, poll_seconds={}",
        config.max_concurrent, config.poll_seconds
    );

    let events = EventBus::new();
    let registry = Arc::new(ScriptRegistry::with_config(events.clone(), config.clone()));
    let runtime = Runtime::new();
    register_plan_functions(&runtime, &registry);

    let printer = if args.quiet_events {
        None
    } else {
        let (subscription, rx) = events.subscribe(config.event_buffer);
        Some((subscription, tokio::spawn(print_events(rx))))
    };

    let script_runtime = runtime.clone();
    let outcome = tokio::task::spawn_blocking(move || script_runtime.run_source(&source))
        .await
        .context("script task panicked")?;

    let result = match outcome {
        Ok(value) => {
            info!("Script finished: {}", value);
            info!("Named agents: {:?}", registry.list());
            wait_for_shutdown(args.run_for_secs.map(Duration::from_secs)).await
        }
        Err(e) => {
            error!("Script failed: {}", e);
            Err(anyhow::anyhow!("script {} failed: {}", args.script.display(), e))
        }
    };

    let stopped = registry.shutdown();
    info!("Stopped {} named agent(s)", stopped);
    events.close();
    if let Some((_subscription, task)) = printer {
        let _ = task.await;
    }
    result
}
