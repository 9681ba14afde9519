use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use picker_artifact::{RunRecord, StageStatus};
use picker_core::config::VectorSinkKind;
use picker_core::{BatchReport, Orchestrator, PipelineConfig, PipelineContext, RunOptions};
use picker_sinks::{Embedder, FsVectorIndex, HashingEmbedder, MemoryVectorIndex, VectorWriter};
use picker_symbol::Symbol;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("picker")
        .version(picker_core::VERSION)
        .about("Resumable signal pipeline for small-cap equities")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .default_value("picker.toml")
                .value_parser(value_parser!(PathBuf))
                .help("Pipeline configuration (TOML or YAML)"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .global(true)
                .default_value("pretty")
                .value_parser(["pretty", "json"])
                .help("Log output format"),
        )
        .subcommand(
            Command::new("run")
                .about("Run the pipeline for configured symbols")
                .arg(
                    Arg::new("symbols")
                        .long("symbols")
                        .value_delimiter(',')
                        .help("Comma-separated symbols (default: all configured)"),
                )
                .arg(
                    Arg::new("reuse-cache")
                        .long("reuse-cache")
                        .action(ArgAction::SetTrue)
                        .help("Reuse earlier outputs of non-idempotent stages"),
                ),
        )
        .subcommand(
            Command::new("retry")
                .about("Retry incomplete symbols from the latest runs")
                .arg(
                    Arg::new("report")
                        .long("report")
                        .value_parser(value_parser!(PathBuf))
                        .help("Batch report to retry instead of the latest stored runs"),
                ),
        )
        .subcommand(Command::new("validate").about("Validate configuration and stage graph"))
        .subcommand(
            Command::new("search")
                .about("Search documents of the latest complete runs")
                .arg(
                    Arg::new("query")
                        .long("query")
                        .short('q')
                        .required(true)
                        .help("Free-text query"),
                )
                .arg(
                    Arg::new("top-k")
                        .long("top-k")
                        .default_value("5")
                        .value_parser(value_parser!(usize))
                        .help("Number of matches to print"),
                ),
        )
}

fn init_tracing(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    let format = matches
        .get_one::<String>("log-format")
        .map_or("pretty", String::as_str);
    init_tracing(format);
    if dotenvy::dotenv().is_ok() {
        info!("loaded .env");
    }

    if let Err(e) = dispatch(&matches).await {
        error!(error = %format!("{e:#}"), "picker failed");
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn dispatch(matches: &ArgMatches) -> Result<()> {
    let path = matches
        .get_one::<PathBuf>("config")
        .context("missing --config")?;
    let config = PipelineConfig::load(path)
        .with_context(|| format!("loading {}", path.display()))?;

    match matches.subcommand() {
        Some(("run", args)) => run(config, args).await,
        Some(("retry", args)) => retry(config, args).await,
        Some(("validate", _)) => validate(config).await,
        Some(("search", args)) => search(config, args).await,
        _ => anyhow::bail!("unknown subcommand"),
    }
}

async fn orchestrator(config: PipelineConfig) -> Result<Orchestrator> {
    let ctx = PipelineContext::from_config(config)
        .await
        .context("building pipeline")?;
    Ok(Orchestrator::new(ctx))
}

/// Cancel on Ctrl-C; in-flight attempts finish, nothing new starts
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight work");
            trigger.cancel();
        }
    });
    cancel
}

async fn run(config: PipelineConfig, args: &ArgMatches) -> Result<()> {
    let symbols = args
        .get_many::<String>("symbols")
        .into_iter()
        .flatten()
        .map(|raw| Symbol::parse(raw).with_context(|| format!("invalid symbol {raw:?}")))
        .collect::<Result<Vec<_>>>()?;
    let reports_dir = config.reports_dir();
    let orchestrator = orchestrator(config).await?;
    let options = RunOptions::new()
        .with_cancel(cancel_on_ctrl_c())
        .reuse_cache(args.get_flag("reuse-cache"));

    let report = orchestrator.run_batch(&symbols, options).await?;
    finish(&report, &reports_dir).await
}

async fn retry(config: PipelineConfig, args: &ArgMatches) -> Result<()> {
    let reports_dir = config.reports_dir();
    let orchestrator = orchestrator(config).await?;
    let previous = match args.get_one::<PathBuf>("report") {
        Some(path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<BatchReport>(&text)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => orchestrator.latest_report(&[]).await?,
    };
    if previous.is_complete() {
        println!("nothing to retry: {} symbols complete", previous.records.len());
        return Ok(());
    }
    let options = RunOptions::new().with_cancel(cancel_on_ctrl_c());
    let report = orchestrator.retry_batch(&previous, options).await?;
    finish(&report, &reports_dir).await
}

async fn validate(config: PipelineConfig) -> Result<()> {
    let orchestrator = orchestrator(config).await?;
    let ctx = orchestrator.context();
    println!("configuration ok");
    println!("stages:");
    for (i, name) in ctx.pipeline.graph.order().iter().enumerate() {
        let upstreams = ctx.pipeline.graph.upstreams(name);
        if upstreams.is_empty() {
            println!("  {:>2}. {name}", i + 1);
        } else {
            println!("  {:>2}. {name} <- {}", i + 1, upstreams.join(", "));
        }
    }
    println!("sources: {}", ctx.pipeline.graph.roots().join(", "));
    println!("outputs: {}", ctx.pipeline.graph.terminal_stages().join(", "));
    let symbols: Vec<String> = ctx.symbols.symbols().iter().map(ToString::to_string).collect();
    println!("symbols: {}", symbols.join(", "));
    Ok(())
}

async fn search(config: PipelineConfig, args: &ArgMatches) -> Result<()> {
    let query = args.get_one::<String>("query").context("missing --query")?;
    let top_k = args.get_one::<usize>("top-k").copied().unwrap_or(5);
    let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(config.embedding.dimension)?);

    let durable = match config.vector_index.kind {
        VectorSinkKind::Fs => Some(
            FsVectorIndex::open(config.vector_path(), Arc::clone(&embedder))
                .await
                .with_context(|| format!("opening {}", config.vector_path().display()))?,
        ),
        VectorSinkKind::Memory => None,
    };
    let rebuilt;
    let index = match &durable {
        Some(fs) => fs.index(),
        None => {
            rebuilt = rebuild_index(config, embedder).await?;
            &rebuilt
        }
    };
    if index.is_empty() {
        println!("no indexed documents; run the pipeline first");
        return Ok(());
    }

    for hit in index.search(query, top_k).await? {
        let origin = hit
            .metadata
            .get("month")
            .or_else(|| hit.metadata.get("stage"))
            .map_or("", String::as_str);
        println!(
            "{:.3}  {:<10} {:<10} {}",
            hit.score,
            hit.symbol.to_string(),
            origin,
            preview(&hit.text, 100)
        );
    }
    Ok(())
}

/// Re-embed the vector deltas recorded by the latest runs
async fn rebuild_index(config: PipelineConfig, embedder: Arc<dyn Embedder>) -> Result<MemoryVectorIndex> {
    let orchestrator = orchestrator(config).await?;
    let index = MemoryVectorIndex::new(embedder);
    let latest = orchestrator.latest_report(&[]).await?;
    for record in &latest.records {
        if let Some(delta) = orchestrator.recorded_vector_delta(record).await? {
            index.apply(&delta).await?;
        }
    }
    Ok(index)
}

fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

fn stage_counts(record: &RunRecord) -> String {
    let done = record
        .stages
        .values()
        .filter(|s| s.status == StageStatus::Succeeded)
        .count();
    format!("{done}/{}", record.stages.len())
}

async fn finish(report: &BatchReport, reports_dir: &Path) -> Result<()> {
    println!(
        "{:<10} {:<9} {:<7} {:<14} {:<14} ERRORS",
        "SYMBOL", "STATE", "STAGES", "GRAPH", "VECTOR"
    );
    for record in &report.records {
        println!(
            "{:<10} {:<9} {:<7} {:<14} {:<14} {}",
            record.symbol.to_string(),
            record.terminal.to_string(),
            stage_counts(record),
            record.graph_writer.status.to_string(),
            record.vector_writer.status.to_string(),
            record.errors.len()
        );
    }
    let summary = report.summary();
    println!(
        "complete {}  partial {}  failed {}",
        summary.complete, summary.partial, summary.failed
    );

    tokio::fs::create_dir_all(reports_dir)
        .await
        .with_context(|| format!("creating {}", reports_dir.display()))?;
    let path = reports_dir.join(format!("{}.json", report.batch_id));
    tokio::fs::write(&path, report.to_json_pretty()?)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "report written");
    Ok(())
}
