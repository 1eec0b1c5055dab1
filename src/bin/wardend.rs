use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};
use warden::{actors::engine::EngineHandle, config::read_config_file};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short, long)]
    file: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,

    /// Run a single poll cycle and exit
    #[arg(long)]
    once: bool,
}

fn init(level: LevelFilter) {
    let filter =
        filter::Targets::new().with_targets(vec![("warden", level), ("wardend", level)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init(args.log_level);
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)
        .with_context(|| format!("cannot load configuration from {}", args.file))?;

    let shutdown = CancellationToken::new();
    let mut engine = config.build_engine(shutdown.clone())?;

    if args.once {
        engine.poll_cycle().await;
        return Ok(());
    }

    info!(
        "warden daemon with pid [{}] awakened, polling every {}s",
        std::process::id(),
        config.poll_interval().as_secs()
    );
    let handle = EngineHandle::spawn(engine, config.poll_interval());

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("cannot listen for the shutdown signal: {e}");
            }
            info!("shutdown requested");
            shutdown.cancel();
        }
        _ = handle.closed() => {}
    }

    handle.closed().await;
    info!("warden daemon stopped");
    Ok(())
}
