use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use fiberwatch::config::Config;
use fiberwatch::nms::http::Client;
use fiberwatch::page::QueryEngine;
use fiberwatch::rollup::window::resolve_range;

/// Fiber-node channel utilization rollup over a CCAP topology.
#[derive(Parser)]
#[command(name = "fiberwatch", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Version) = &cli.command {
        println!("fiberwatch {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    let config_path = cli
        .config
        .context("--config is required (use --help for usage)")?;

    let cfg = Config::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(run(cfg))
}

async fn run(cfg: Config) -> Result<()> {
    let client = Client::new(&cfg.nms).context("building NMS client")?;
    let range = resolve_range(
        cfg.query.initial_time,
        cfg.query.final_time,
        chrono::Utc::now(),
    );

    tracing::info!(
        front_end = cfg.query.front_end_element,
        metric = ?cfg.query.metric,
        start = %range.start,
        end = %range.end,
        "starting rollup query",
    );

    let metric = cfg.query.metric;
    let engine = QueryEngine::new(client, cfg.query, range);
    let mut cursor = engine.cursor().await;

    let mut header = vec!["ID", "Fiber Node"];
    header.extend_from_slice(metric.value_columns());
    println!("{}", header.join("\t"));

    let mut pages = 0usize;
    let mut total_rows = 0usize;

    loop {
        let page = engine.next_page(&mut cursor).await;
        pages += 1;
        total_rows += page.rows.len();

        for row in &page.rows {
            let mut cells = vec![row.id.clone(), row.fiber_node.clone()];
            cells.extend(row.display_values());
            println!("{}", cells.join("\t"));
        }

        if !page.has_next {
            break;
        }
    }

    tracing::info!(pages, total_rows, "rollup query finished");

    Ok(())
}
