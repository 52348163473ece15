//! `dsp-tck` command-line entrypoint.
//!
//! - `dsp-tck run` - run scenarios against a SUT (or the local connector)
//! - `dsp-tck list` - list the scenarios that would run
//!
//! Exit status: 0 when every scenario passed, 1 when any failed or errored,
//! 2 when the run could not start.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use dsp_protocol::Role;
use dsp_tck::{
    LocalConnector, LocalConnectorOptions, RunContext, Scenario, ScenarioManifest, ScenarioRegistry,
    TckConfig,
};
use tracing::info;

/// Conformance test engine for dataspace protocol contract negotiation.
#[derive(Parser)]
#[command(name = "dsp-tck")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scenarios and print a report.
    Run(RunArgs),

    /// List scenario names.
    List(ListArgs),
}

#[derive(Args)]
struct RunArgs {
    /// TOML configuration file.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Additional scenarios from a TOML manifest.
    #[arg(long, short)]
    manifest: Option<PathBuf>,

    /// Run only the named scenario; repeatable. Defaults to every scenario
    /// for the configured role.
    #[arg(long = "scenario", short = 's')]
    scenarios: Vec<String>,

    /// SUT protocol base URL (overrides config and environment).
    #[arg(long)]
    base_url: Option<String>,

    /// Role the engine plays: consumer or provider.
    #[arg(long)]
    role: Option<Role>,

    /// Run against an in-process conformant connector instead of a SUT.
    #[arg(long)]
    local_connector: bool,

    /// Write one JSON report line per scenario to this file.
    #[arg(long)]
    jsonl: Option<PathBuf>,

    /// Print the full run report as JSON instead of the text summary.
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ListArgs {
    /// Additional scenarios from a TOML manifest.
    #[arg(long, short)]
    manifest: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let result = match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::List(args) => list(&args).map(|()| ExitCode::SUCCESS),
    };
    result.unwrap_or_else(|err| {
        eprintln!("error: {err:#}");
        ExitCode::from(2)
    })
}

// Logs go to stderr so stdout stays clean for reports.
fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn registry(manifest: Option<&PathBuf>) -> anyhow::Result<ScenarioRegistry> {
    let registry = ScenarioRegistry::builtin();
    match manifest {
        Some(path) => {
            let manifest = ScenarioManifest::from_path(path)
                .with_context(|| format!("loading manifest {}", path.display()))?;
            Ok(registry.with_manifest(manifest)?)
        }
        None => Ok(registry),
    }
}

fn list(args: &ListArgs) -> anyhow::Result<()> {
    for scenario in registry(args.manifest.as_ref())?.all() {
        let role = scenario.role.map_or("any", Role::as_str);
        let description = scenario.description.as_deref().unwrap_or("");
        println!("{:<45} {:<9} {description}", scenario.name, role);
    }
    Ok(())
}

async fn run(args: RunArgs) -> anyhow::Result<ExitCode> {
    let mut config = match &args.config {
        Some(path) => TckConfig::from_path_unchecked(path)?,
        None => TckConfig::default(),
    };
    config.apply_env(|key| std::env::var(key).ok())?;
    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
    }
    if let Some(role) = args.role {
        config.role = role;
    }

    let local = if args.local_connector {
        let (connector, server) = LocalConnector::start(LocalConnectorOptions {
            offer_id: config.offer_id.clone(),
            ..LocalConnectorOptions::default()
        })
        .await
        .context("starting local connector")?;
        config.base_url = connector.url_for_engine(config.role);
        info!(base_url = %config.base_url, "running against the local connector");
        Some((connector, server))
    } else {
        None
    };
    config.validate()?;

    let registry = registry(args.manifest.as_ref())?;
    let selected: Vec<Scenario> = if args.scenarios.is_empty() {
        registry.for_role(config.role, config.role)
    } else {
        registry.select(&args.scenarios)?
    };

    let mut context = RunContext::start(config).await?;
    context.run_all(&selected).await;
    let report = context.finalize().await;
    if let Some((_, server)) = local {
        server.shutdown().await;
    }

    if let Some(path) = &args.jsonl {
        report
            .write_json_lines(path)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    if args.json {
        println!("{}", report.to_json_pretty()?);
    } else {
        println!("{}", report.summary());
    }

    Ok(if report.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
