//! dependency-guard CLI
//!
//! Probes a dependency through the full invocation pipeline and inspects the
//! effective configuration.
//!
//! ```text
//! dependency-guard --config guard.toml probe -d catalogue -u http://localhost:8080 -p /items -n 20
//! dependency-guard --config guard.toml show-config -d catalogue
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use dependency_guard::config::watcher::ConfigWatcher;
use dependency_guard::config::{load_config, ConfigHandle, GuardConfig};
use dependency_guard::observability::{init_logging, init_metrics};
use dependency_guard::resilience::{CircuitSnapshot, FallbackRegistry, Invoker, Resolution};
use dependency_guard::transport::HttpDependency;

#[derive(Parser)]
#[command(name = "dependency-guard")]
#[command(about = "Guarded calls to downstream dependencies", long_about = None)]
struct Cli {
    /// TOML configuration file; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload the configuration file when it changes
    #[arg(long)]
    watch: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue guarded GET requests and print a JSON summary
    Probe {
        #[arg(short, long)]
        dependency: String,
        /// Base URL of the dependency
        #[arg(short, long)]
        url: String,
        #[arg(short, long, default_value = "/")]
        path: String,
        #[arg(short = 'n', long, default_value_t = 10)]
        count: u32,
    },
    /// Print the effective configuration as JSON
    ShowConfig {
        /// Print only the merged policy for this dependency
        #[arg(short, long)]
        dependency: Option<String>,
    },
}

#[derive(Debug, Serialize)]
struct ProbeSummary {
    dependency: String,
    requests: u32,
    succeeded: u32,
    fallbacks: u32,
    failures: BTreeMap<String, u32>,
    elapsed_ms: u128,
    circuit: CircuitSnapshot,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };
    init_logging(&config.observability)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        dependencies = config.dependencies.len(),
        "dependency-guard starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let handle = Arc::new(ConfigHandle::new(config));

    // Keep the watcher alive for the lifetime of the command.
    let _watcher = match (&cli.config, cli.watch) {
        (Some(path), true) => Some(ConfigWatcher::new(path, handle.clone()).run()?),
        (None, true) => {
            tracing::warn!("--watch ignored without --config");
            None
        }
        _ => None,
    };

    match cli.command {
        Commands::Probe {
            dependency,
            url,
            path,
            count,
        } => {
            let summary = probe(handle, dependency, &url, &path, count).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::ShowConfig { dependency } => {
            let config = handle.load();
            let json = match dependency {
                Some(key) => serde_json::to_string_pretty(&config.policy_for(&key))?,
                None => serde_json::to_string_pretty(&*config)?,
            };
            println!("{json}");
        }
    }

    Ok(())
}

async fn probe(
    handle: Arc<ConfigHandle>,
    dependency: String,
    url: &str,
    path: &str,
    count: u32,
) -> Result<ProbeSummary, Box<dyn std::error::Error>> {
    let transport = HttpDependency::new(url, &handle.load().transport)?;
    let invoker = Invoker::with_handle(handle);
    let fallbacks: FallbackRegistry<Value> = FallbackRegistry::new();

    let started = Instant::now();
    let mut summary = ProbeSummary {
        dependency: dependency.clone(),
        requests: count,
        succeeded: 0,
        fallbacks: 0,
        failures: BTreeMap::new(),
        elapsed_ms: 0,
        circuit: invoker.circuit_breaker().snapshot(&dependency),
    };

    for _ in 0..count {
        let result = invoker
            .invoke(&dependency, || transport.get_json::<Value>(path), &fallbacks)
            .await;
        match result {
            Ok(Resolution::Primary(_)) => summary.succeeded += 1,
            Ok(Resolution::Fallback { .. }) => summary.fallbacks += 1,
            Err(err) => {
                tracing::debug!(error = %err, "Probe call failed");
                *summary.failures.entry(err.kind.to_string()).or_default() += 1;
            }
        }
    }

    summary.elapsed_ms = started.elapsed().as_millis();
    summary.circuit = invoker.circuit_breaker().snapshot(&dependency);
    Ok(summary)
}
