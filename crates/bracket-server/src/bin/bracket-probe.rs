//! Waits for a running bracket server to become ready.
//!
//! Reads the same configuration file as the server, polls the configured
//! address and exits with status 0 once `/health` answers, or 1 on timeout.
//! The database section is not validated; the probe never opens storage.

use std::process::ExitCode;

use bracket_server::config::Config;
use bracket_server::readiness::wait_for_backend;
use bracket_server::{config, init_tracing};

fn load() -> Result<Config, config::ConfigError> {
    let path = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
        .or_else(|| std::env::var("BRACKET_CONFIG_PATH").ok())
        .unwrap_or_else(|| "config.toml".to_string());
    config::read_config(Some(&path))
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("bracket-probe: {e}");
            return ExitCode::FAILURE;
        }
    };
    let _ = init_tracing(&config.logging);

    let addr = config.server_addr();
    tracing::info!(%addr, "waiting for backend");

    match wait_for_backend(addr, &config.probe_settings()).await {
        Ok(report) => {
            tracing::info!(
                attempts = report.attempts,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "backend ready"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "backend did not become ready");
            ExitCode::FAILURE
        }
    }
}
