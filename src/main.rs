use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use unitforge::batch::{BatchCoordinator, BatchOutcome, BatchReport};
use unitforge::config::{save_config, user_config_path, EngineConfig};
use unitforge::coverage::report::{render_markdown, render_text};
use unitforge::coverage::{find_record, load_record};
use unitforge::error::{BatchError, ConfigError};
use unitforge::llm::from_config;
use unitforge::logger;
use unitforge::repair::{LoopEvent, RepairLoop, RetryPolicy};
use unitforge::resolve::{ScopeSpec, TargetKind, TargetResolver};
use unitforge::testgen::materialize::materialize_test;
use unitforge::testgen::skeleton::crate_name;
use unitforge::testgen::CandidateGenerator;
use unitforge::verify::{CommandToolchain, VerificationPipeline};

const EXIT_FAILURE: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_PARTIAL: u8 = 10;

#[derive(Parser)]
#[command(
    name = "unitforge",
    version,
    about = "Generate unit tests with an AI backend, verify them in a scratch copy, and repair until they pass."
)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,

    #[arg(short, long, global = true, action = clap::ArgAction::Count, help = "More logging (-vv for everything)")]
    verbose: u8,

    #[arg(short, long, global = true, help = "Only log errors")]
    quiet: bool,

    #[arg(long, global = true, help = "Emit logs as JSON lines")]
    log_json: bool,

    #[arg(long, global = true, env = "UNITFORGE_CONFIG", help = "Path to a unitforge.toml")]
    config: Option<PathBuf>,

    #[arg(long, global = true, default_value = ".", help = "Project root")]
    project: PathBuf,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Generate, verify and repair tests for the given scopes
    Generate(GenerateArgs),
    /// List the targets a scope resolves to
    Targets(TargetsArgs),
    /// Summarize a coverage record
    Coverage(CoverageArgs),
    /// Print the effective configuration, or write it out with --init
    Config(ConfigArgs),
}

#[derive(Args, Debug, Clone)]
struct GenerateArgs {
    #[arg(help = "project | class:[file#]Name | method:[file#][Class::]name (default: project)")]
    scopes: Vec<ScopeSpec>,

    #[arg(long, help = "Loops running at once (overrides config)")]
    concurrency: Option<usize>,

    #[arg(long, help = "Attempts per target (overrides config)")]
    max_attempts: Option<u32>,

    #[arg(long, help = "Coverage record to compare against")]
    baseline: Option<PathBuf>,

    #[arg(long, default_value_t = false, help = "Skip the coverage pass")]
    no_coverage: bool,

    #[arg(long, default_value_t = false, help = "Print the batch report as JSON")]
    json: bool,

    #[arg(long, help = "Write a Markdown report to this file")]
    report: Option<PathBuf>,

    #[arg(
        long,
        default_value_t = false,
        help = "Copy accepted tests into the project (otherwise only the report is produced)"
    )]
    write: bool,
}

#[derive(Args, Debug, Clone)]
struct TargetsArgs {
    #[arg(help = "Scopes to resolve (default: project)")]
    scopes: Vec<ScopeSpec>,

    #[arg(long, default_value_t = false, help = "Print targets as JSON")]
    json: bool,
}

#[derive(Args, Debug, Clone)]
struct CoverageArgs {
    #[arg(help = "Record file, or a directory to search for one")]
    record: PathBuf,

    #[arg(long, default_value_t = false, conflicts_with = "markdown")]
    json: bool,

    #[arg(long, default_value_t = false)]
    markdown: bool,
}

#[derive(Args, Debug, Clone)]
struct ConfigArgs {
    #[arg(long, default_value_t = false, help = "Write the configuration to the user config path")]
    init: bool,

    #[arg(long, default_value_t = false, requires = "init", help = "Overwrite an existing file")]
    force: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logger::init(cli.quiet, cli.verbose, cli.log_json);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(if is_config_error(&e) {
                EXIT_CONFIG
            } else {
                EXIT_FAILURE
            })
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let root = project_root(&cli.project)?;

    match &cli.command {
        CliCommand::Generate(args) => generate(&cli, &root, args).await,
        CliCommand::Targets(args) => targets(&cli, &root, args),
        CliCommand::Coverage(args) => coverage(&root, args),
        CliCommand::Config(args) => config(&cli, &root, args),
    }
}

async fn generate(cli: &Cli, root: &Path, args: &GenerateArgs) -> Result<ExitCode> {
    let mut cfg = EngineConfig::load(cli.config.as_deref(), root)?;
    if let Some(n) = args.concurrency {
        cfg.concurrency_limit = n;
    }
    if let Some(n) = args.max_attempts {
        cfg.max_attempts = n;
    }
    if args.no_coverage {
        cfg.collect_coverage = false;
    }
    cfg.validate()?;

    let baseline = match &args.baseline {
        Some(path) => Some(
            load_record(path).with_context(|| format!("loading baseline {}", path.display()))?,
        ),
        None => None,
    };

    let backend = from_config(&cfg.backend)?;
    let generator = CandidateGenerator::new(backend, &cfg).with_crate_name(crate_name(root));
    tracing::info!(backend = %generator.backend_name(), project = %root.display(), "starting");

    let toolchain = Arc::new(CommandToolchain::new(cfg.toolchain.clone()));
    let pipeline = VerificationPipeline::new(root, toolchain, &cfg);

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let repair = RepairLoop::new(generator, pipeline, RetryPolicy::from_config(&cfg)).with_events(tx);

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());
    let progress = tokio::spawn(print_progress(rx, cli.quiet || args.json));

    let resolver = TargetResolver::new(root, cfg.include_accessors);
    let scopes = if args.scopes.is_empty() {
        vec![ScopeSpec::Project]
    } else {
        args.scopes.clone()
    };

    let limit = cfg.concurrency_limit;
    let coordinator = BatchCoordinator::new(repair, cfg, root)
        .with_cancel(cancel)
        .with_baseline(baseline);
    let report = coordinator.run_scopes(&resolver, &scopes, limit).await;

    // the event sender lives in the coordinator; dropping it ends the printer
    drop(coordinator);
    let _ = progress.await;
    let report = report?;

    if args.write {
        write_accepted(root, &report)?;
    }
    if let Some(path) = &args.report {
        fs::write(path, report.render_markdown())
            .with_context(|| format!("writing report {}", path.display()))?;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }

    Ok(match report.outcome() {
        BatchOutcome::AllAccepted => ExitCode::SUCCESS,
        BatchOutcome::Partial => ExitCode::from(EXIT_PARTIAL),
        BatchOutcome::NoneAccepted => ExitCode::from(EXIT_FAILURE),
    })
}

fn targets(cli: &Cli, root: &Path, args: &TargetsArgs) -> Result<ExitCode> {
    let cfg = EngineConfig::load(cli.config.as_deref(), root)?;
    let resolver = TargetResolver::new(root, cfg.include_accessors);
    let scopes = if args.scopes.is_empty() {
        vec![ScopeSpec::Project]
    } else {
        args.scopes.clone()
    };

    let mut all = Vec::new();
    for scope in &scopes {
        let found = resolver
            .resolve(scope)
            .with_context(|| format!("resolving `{scope}`"))?;
        all.extend(found);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&all)?);
        return Ok(ExitCode::SUCCESS);
    }

    for t in &all {
        let methods: Vec<&str> = t.method_names().collect();
        let kind = match t.kind {
            TargetKind::Method => "method",
            TargetKind::Class => "class",
        };
        println!("{kind:<6} {}  [{}]", t.id, methods.join(", "));
    }
    println!("{} target(s)", all.len());
    Ok(ExitCode::SUCCESS)
}

fn coverage(root: &Path, args: &CoverageArgs) -> Result<ExitCode> {
    let requested = if args.record.is_absolute() {
        args.record.clone()
    } else {
        std::env::current_dir()?.join(&args.record)
    };

    let path = if requested.is_dir() {
        match find_record(&requested).or_else(|| find_record(root)) {
            Some(p) => p,
            None => bail!("no coverage record under {}", requested.display()),
        }
    } else {
        requested
    };

    let report = load_record(&path).with_context(|| format!("reading {}", path.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if args.markdown {
        print!("{}", render_markdown(&report));
    } else {
        print!("{}", render_text(&report));
    }
    Ok(ExitCode::SUCCESS)
}

fn config(cli: &Cli, root: &Path, args: &ConfigArgs) -> Result<ExitCode> {
    let cfg = EngineConfig::load(cli.config.as_deref(), root)?;

    if !args.init {
        print!("{}", toml::to_string_pretty(&cfg)?);
        return Ok(ExitCode::SUCCESS);
    }

    let path = user_config_path();
    if path.exists() && !args.force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    save_config(&path, &cfg)?;
    println!("wrote {}", path.display());
    Ok(ExitCode::SUCCESS)
}

fn project_root(p: &Path) -> Result<PathBuf> {
    let root = fs::canonicalize(p).map_err(|_| ConfigError::ProjectRoot(p.to_path_buf()))?;
    if !root.is_dir() {
        return Err(ConfigError::ProjectRoot(root).into());
    }
    Ok(root)
}

fn is_config_error(e: &anyhow::Error) -> bool {
    e.chain().any(|c| {
        c.downcast_ref::<ConfigError>().is_some()
            || matches!(c.downcast_ref::<BatchError>(), Some(BatchError::Config(_)))
    })
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling batch");
            cancel.cancel();
        }
    });
}

async fn print_progress(mut rx: UnboundedReceiver<LoopEvent>, silent: bool) {
    while let Some(event) = rx.recv().await {
        if silent {
            continue;
        }
        match event {
            LoopEvent::Verified {
                target_id,
                attempt,
                outcome,
            } => eprintln!("  {target_id}  attempt {attempt}: {outcome}"),
            LoopEvent::GenerationRetry {
                target_id,
                retry,
                error,
                ..
            } => eprintln!("  {target_id}  generation retry {retry}: {error}"),
            LoopEvent::Finished { target_id, status } => eprintln!("= {target_id}  {status}"),
            LoopEvent::State { .. } => {}
        }
    }
}

fn write_accepted(root: &Path, report: &BatchReport) -> Result<()> {
    for session in &report.runs {
        let (Some(target), Some(candidate)) = (&session.target, session.accepted()) else {
            continue;
        };
        let rel = materialize_test(root, target, &candidate.source)
            .with_context(|| format!("writing test for {}", target.id))?;
        println!("wrote {}", rel.display());
    }
    Ok(())
}

fn print_summary(report: &BatchReport) {
    println!();
    for s in &report.sessions {
        println!("{:<32} {}", s.status.to_string(), s.target_id);
    }
    println!(
        "\n{} accepted, {} exhausted, {} abandoned in {} ms{}",
        report.accepted,
        report.exhausted,
        report.abandoned,
        report.elapsed_ms,
        if report.cancelled { " (cancelled)" } else { "" }
    );
    if !report.coverage.is_empty() {
        println!("coverage: {}", report.coverage_summary);
    }
    if let Some(d) = &report.delta {
        println!(
            "line coverage change: {:+.2} pp, branch: {:+.2} pp",
            d.delta.line * 100.0,
            d.delta.branch * 100.0
        );
    }
}
