//! `planbuild` command line: scenario replay and config check

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, Command};
use planbuild_cli::{parse_policy, simulate, Scenario};
use planbuild_core::BuildConfig;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn cli() -> Command {
    Command::new("planbuild")
        .version(planbuild_runtime::VERSION)
        .about("Per-path build coordinator for plan file edits")
        .subcommand_required(true)
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON on stderr"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Replay a scenario through the build coordinator")
                .arg(
                    Arg::new("scenario")
                        .long("scenario")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Scenario TOML file"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("Build configuration TOML file"),
                )
                .arg(
                    Arg::new("policy")
                        .long("policy")
                        .value_parser(["stall", "skip", "retry"])
                        .help("Override the failure policy"),
                )
                .arg(
                    Arg::new("max-attempts")
                        .long("max-attempts")
                        .default_value("3")
                        .value_parser(value_parser!(u32))
                        .help("Attempts per build with --policy retry"),
                )
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .default_value("30")
                        .value_parser(value_parser!(u64))
                        .help("Seconds to wait for all files to finish"),
                ),
        )
        .subcommand(
            Command::new("check-config")
                .about("Validate a build configuration file")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Build configuration TOML file"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<BuildConfig> {
    match path {
        Some(path) => BuildConfig::from_path(path).context("loading build configuration"),
        None => Ok(BuildConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json-logs"));

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let scenario_path = args
                .get_one::<PathBuf>("scenario")
                .context("--scenario is required")?;
            let scenario = Scenario::from_path(scenario_path)?;

            let mut config = load_config(args.get_one::<PathBuf>("config"))?;
            if let Some(name) = args.get_one::<String>("policy") {
                let max_attempts = args.get_one::<u32>("max-attempts").copied().unwrap_or(3);
                config.failure_policy = parse_policy(name, max_attempts)
                    .with_context(|| format!("unknown policy {name}"))?;
            }
            let patience = Duration::from_secs(args.get_one::<u64>("timeout").copied().unwrap_or(30));

            tracing::info!(scenario = %scenario_path.display(), policy = ?config.failure_policy, "simulating");

            let report = simulate(&scenario, config, patience, |msg| {
                match serde_json::to_string(msg) {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::error!(error = %e, "unprintable stream message"),
                }
            })
            .await?;

            for result in &report.results {
                let line = serde_json::json!({
                    "type": "Result",
                    "path": result.path,
                    "buildId": result.build_id.to_string(),
                    "replacements": result.replacements.len(),
                    "content": result.content,
                });
                println!("{line}");
            }
            for path in &report.stalled {
                println!("{}", serde_json::json!({ "type": "Stalled", "path": path }));
            }

            tracing::info!(
                plan = %report.plan,
                dispatched = report.dispatched,
                results = report.results.len(),
                failures = report.failures(),
                stalled = report.stalled.len(),
                "simulation finished"
            );
            std::process::exit(if report.succeeded() { 0 } else { 1 });
        }
        Some(("check-config", args)) => {
            let config = load_config(args.get_one::<PathBuf>("config"))?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        _ => Ok(()),
    }
}
