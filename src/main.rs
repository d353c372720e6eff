use circuit_gate::config::GateConfig;
use circuit_gate::persistence::{JsonFileStore, PersistenceAdapter};
use circuit_gate::{init_tracing, CircuitState, Result};
use std::env;
use std::process;

const USAGE: &str = "Usage: circuit-gate [config_file] [reset <breaker>]";

fn main() {
    // Initialize tracing
    init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();

    // Get config file path from command line or use default
    let config_path = args
        .first()
        .cloned()
        .unwrap_or_else(|| "config/circuit-gate.yaml".to_string());

    // Load configuration
    let config = match GateConfig::from_file(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {}", config_path, e);
            eprintln!("{}", USAGE);
            process::exit(1);
        }
    };

    let result = match args.get(1).map(String::as_str) {
        None => print_status(&config),
        Some("reset") => match args.get(2) {
            Some(name) => reset(&config, name),
            None => {
                eprintln!("{}", USAGE);
                process::exit(2);
            }
        },
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            eprintln!("{}", USAGE);
            process::exit(2);
        }
    };

    if let Err(e) = result {
        eprintln!("circuit-gate error: {}", e);
        process::exit(1);
    }
}

fn open_store(config: &GateConfig) -> Result<JsonFileStore> {
    let persistence = config.persistence.clone().unwrap_or_default();
    JsonFileStore::new(persistence.dir)
}

/// Print one JSON line per persisted breaker
fn print_status(config: &GateConfig) -> Result<()> {
    let store = open_store(config)?;
    let registry = config.build_registry()?;
    registry.restore_all(&store)?;

    for status in registry.statuses() {
        println!("{}", serde_json::to_string(&status)?);
    }
    Ok(())
}

/// Close a persisted breaker and write it back
fn reset(config: &GateConfig, name: &str) -> Result<()> {
    let store = open_store(config)?;
    let registry = config.build_registry()?;
    registry.restore_all(&store)?;

    registry.reset(name)?;
    if let Some(breaker) = registry.lookup(name) {
        let now = registry.clock().now();
        store.save(name, &breaker.snapshot(now))?;
    }
    println!("Breaker '{}' reset to {}", name, CircuitState::Closed);
    Ok(())
}
