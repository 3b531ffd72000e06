//! adaptive-breaker
//!
//! Command-line front end for the circuit breaker library.
//!
//! - `check-config <path>`: parse and validate a config file
//! - `simulate`: drive the configured breakers with synthetic traffic,
//!   reload the config on change and stop on Ctrl-C / SIGTERM

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use clap::{Parser, Subcommand};
use tokio::time::{self, MissedTickBehavior};

use adaptive_breaker::config::loader::load_config;
use adaptive_breaker::config::watcher::ConfigWatcher;
use adaptive_breaker::config::{CircuitBreakerConfig, ResilienceConfig};
use adaptive_breaker::lifecycle::{signals, startup, Runtime};
use adaptive_breaker::manager::CircuitBreakerManager;
use adaptive_breaker::resilience::fallback::StaticFallback;
use adaptive_breaker::resilience::ExecutionContext;

#[derive(Parser)]
#[command(name = "adaptive-breaker")]
#[command(about = "Adaptive circuit breakers with system health scoring", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a TOML config file
    CheckConfig {
        path: PathBuf,
    },
    /// Run synthetic traffic through the configured breakers
    Simulate {
        /// Config file; hot-reloaded on change
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Probability that a simulated call fails
        #[arg(long, default_value_t = 0.2)]
        failure_rate: f64,

        /// Calls per second across all breakers
        #[arg(long, default_value_t = 50)]
        rps: u64,

        /// Seconds between status reports
        #[arg(long, default_value_t = 10)]
        report_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig { path } => check_config(path),
        Commands::Simulate {
            config,
            failure_rate,
            rps,
            report_secs,
        } => simulate(config, failure_rate, rps, report_secs).await,
    }
}

fn check_config(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&path)?;
    println!(
        "{}: OK ({} circuits, {} dependencies)",
        path.display(),
        config.circuits.len(),
        config.dependencies.len()
    );
    for circuit in &config.circuits {
        println!(
            "  {:<24} threshold={}% volume={} timeout={}ms sleep={}ms",
            circuit.name,
            circuit.error_threshold_percentage,
            circuit.request_volume_threshold,
            circuit.timeout_ms,
            circuit.sleep_window_ms
        );
    }
    Ok(())
}

async fn simulate(
    path: Option<PathBuf>,
    failure_rate: f64,
    rps: u64,
    report_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let loaded = match &path {
        Some(path) => load_config(path)?,
        None => ResilienceConfig::default(),
    };
    let mut config = loaded.clone();
    if config.circuits.is_empty() {
        config.circuits.push(CircuitBreakerConfig::named("demo"));
    }

    startup::init_observability(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "adaptive-breaker starting");

    let runtime = Runtime::start(&config)?;
    install_fallbacks(&runtime.manager);

    // Keep the watcher alive for the lifetime of the simulation.
    let _watcher = match &path {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path, loaded);
            let watcher = watcher.run()?;
            let manager = Arc::clone(&runtime.manager);
            tokio::spawn(async move {
                while let Some(new_config) = updates.recv().await {
                    if let Err(errors) = manager.apply_config(&new_config) {
                        for e in errors {
                            tracing::error!(error = %e, "Config reload partially failed");
                        }
                    }
                    install_fallbacks(&manager);
                }
            });
            Some(watcher)
        }
        None => None,
    };

    tokio::spawn(signals::shutdown_on_signal(runtime.shutdown.clone()));

    let mut shutdown = runtime.shutdown.subscribe();
    let mut traffic = time::interval(Duration::from_micros(1_000_000 / rps.max(1)));
    traffic.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut report = time::interval(Duration::from_secs(report_secs.max(1)));
    report.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = traffic.tick() => {
                spawn_call(&runtime.manager, failure_rate);
            }
            _ = report.tick() => {
                let status = runtime.manager.system_status();
                tracing::info!(
                    closed = status.state_summary.closed,
                    open = status.state_summary.open,
                    half_open = status.state_summary.half_open,
                    status = %serde_json::to_string(&status.circuits).unwrap_or_default(),
                    "Circuit status"
                );
            }
            _ = shutdown.recv() => {
                tracing::info!("Shutdown signal received, stopping traffic");
                break;
            }
        }
    }

    runtime.stop(Duration::from_secs(5)).await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Give every breaker without a fallback a static one.
fn install_fallbacks(manager: &CircuitBreakerManager) {
    for name in manager.circuit_names() {
        if let Some(breaker) = manager.get_circuit_breaker(&name) {
            if breaker.snapshot().fallback_strategies.is_empty() {
                breaker.add_fallback_strategy(Arc::new(StaticFallback::new("cached", 0, String::from("cached"))));
            }
        }
    }
}

fn spawn_call(manager: &CircuitBreakerManager, failure_rate: f64) {
    let names = manager.circuit_names();
    if names.is_empty() {
        return;
    }
    let Some(breaker) = manager.get_circuit_breaker(&names[fastrand::usize(..names.len())]) else {
        return;
    };

    let latency = Duration::from_millis(fastrand::u64(1..50));
    let fail = fastrand::f64() < failure_rate;

    tokio::spawn(async move {
        let ctx = ExecutionContext::new();
        let result = breaker
            .execute_with_context(ctx, || async move {
                time::sleep(latency).await;
                if fail {
                    Err("simulated failure")
                } else {
                    Ok(String::from("live"))
                }
            })
            .await;
        if let Err(e) = result {
            tracing::debug!(circuit = %breaker.name(), error = %e, "Simulated call failed");
        }
    });
}
