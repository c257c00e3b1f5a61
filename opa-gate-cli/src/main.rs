//! OPA Gate CLI - inspect and test policy decisions from the command line

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use opa_gate_core::{
    DecisionQuery, GateConfig, MissingAllow, PolicyClient, PolicyClientConfig, PolicyEvaluator,
    Verdict,
};
use serde_json::json;
use std::process::ExitCode;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "opa-gate")]
#[command(about = "OPA Gate - query a policy decision point the way the gate does")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the policy engine request body for a request
    Query {
        /// Request path, e.g. /v1/admin/users/alice
        #[arg(long)]
        path: String,

        /// Comma-separated roles, as sent in USER_ROLES
        #[arg(long)]
        roles: Option<String>,

        /// HTTP method
        #[arg(short, long, default_value = "GET")]
        method: String,
    },

    /// Ask the policy engine for a verdict (exit 0 allow, 1 deny, 2 engine failure)
    Check {
        /// Policy engine URL (defaults to OPA_SERVER_URL / config)
        #[arg(long)]
        url: Option<String>,

        /// Request path, e.g. /v1/admin/users/alice
        #[arg(long)]
        path: String,

        /// Comma-separated roles, as sent in USER_ROLES
        #[arg(long)]
        roles: Option<String>,

        /// HTTP method
        #[arg(short, long, default_value = "GET")]
        method: String,

        /// Timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Treat a response without result.allow as deny instead of an error
        #[arg(long)]
        lenient: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Print the effective gate configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("opa_gate=debug")
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Query {
            path,
            roles,
            method,
        } => query_command(&path, roles.as_deref(), &method),
        Commands::Check {
            url,
            path,
            roles,
            method,
            timeout_ms,
            lenient,
            format,
        } => {
            let query = build_query(&path, roles.as_deref(), &method);
            check_command(url, query, timeout_ms, lenient, format).await
        }
        Commands::Config => config_command(),
    }
}

fn build_query(path: &str, roles: Option<&str>, method: &str) -> DecisionQuery {
    DecisionQuery::from_request_parts(path, roles, &method.to_ascii_uppercase())
}

fn query_command(path: &str, roles: Option<&str>, method: &str) -> Result<ExitCode> {
    let query = build_query(path, roles, method);
    println!("{}", serde_json::to_string_pretty(&query.as_input())?);
    Ok(ExitCode::SUCCESS)
}

async fn check_command(
    url: Option<String>,
    query: DecisionQuery,
    timeout_ms: Option<u64>,
    lenient: bool,
    format: Format,
) -> Result<ExitCode> {
    let config = GateConfig::load().context("Failed to load configuration")?;

    let client = PolicyClient::new(PolicyClientConfig {
        endpoint: url.unwrap_or(config.policy_engine_url),
        timeout: Duration::from_millis(timeout_ms.unwrap_or(config.policy_timeout_ms)),
        missing_allow: if lenient {
            MissingAllow::Deny
        } else {
            config.missing_allow
        },
    })?;

    let start = Instant::now();
    let outcome = client.evaluate(&query).await;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    let verdict = Verdict::from(&outcome);

    match format {
        Format::Json => {
            let mut report = json!({
                "verdict": verdict.as_str(),
                "endpoint": client.endpoint(),
                "input": query,
                "elapsed_ms": elapsed_ms,
            });
            if let Err(e) = &outcome {
                report["kind"] = json!(e.kind());
                report["error"] = json!(e.to_string());
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Format::Text => {
            println!(
                "{} {} {} against {}",
                "→".blue(),
                query.method,
                query.path.join("/"),
                client.endpoint()
            );
            match &outcome {
                Ok(result) if result.allow => println!("{} Allowed", "✓".green().bold()),
                Ok(_) => println!("{} Denied", "✗".red().bold()),
                Err(e) => println!(
                    "{} Engine failure ({}): {}",
                    "!".yellow().bold(),
                    e.kind(),
                    e
                ),
            }
            println!("  {} {:.2}ms", "Time:".dimmed(), elapsed_ms);
        }
    }

    Ok(exit_code(verdict))
}

fn exit_code(verdict: Verdict) -> ExitCode {
    match verdict {
        Verdict::Allowed | Verdict::Bypassed => ExitCode::SUCCESS,
        Verdict::Denied => ExitCode::from(1),
        Verdict::EngineFailure(_) => ExitCode::from(2),
    }
}

fn config_command() -> Result<ExitCode> {
    match GateConfig::load() {
        Ok(config) => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{} {}", "✗".red().bold(), e);
            Ok(ExitCode::from(1))
        }
    }
}
