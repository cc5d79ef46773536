//! vgfbctl: line-oriented control utility for a virtual framebuffer.
//!
//! Opens one device in an in-process registry and drives it with commands
//! read from stdin, one per line. Replies are printed as JSON.

mod command;
mod session;

use anyhow::{Context, Result};
use serde_json::json;
use session::Session;
use std::io::{self, BufRead, Write};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vgfb_device::RegistryConfig;

// Use mimalloc as the global allocator; screen memory comes from it too
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn load_config() -> Result<RegistryConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path))?;
            let config = RegistryConfig::from_json(&json)
                .with_context(|| format!("Invalid config file {}", path))?;
            info!(path = %path, "Loaded configuration");
            Ok(config)
        }
        None => Ok(RegistryConfig::default()),
    }
}

fn main() -> Result<()> {
    // Logs go to stderr so stdout stays JSON
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .init();

    let config = load_config()?;
    let mut session = Session::new(config).context("Failed to open device")?;
    info!("vgfbctl ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read stdin")?;

        let reply = match command::parse(&line) {
            Ok(None) => continue,
            Ok(Some(command)) => match session.execute(command) {
                Ok(Some(reply)) => reply,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Command failed");
                    json!({ "error": e.to_string() })
                }
            },
            Err(e) => json!({ "error": e.to_string() }),
        };

        serde_json::to_writer(&mut stdout, &reply)?;
        writeln!(stdout)?;
        stdout.flush()?;
    }

    info!("vgfbctl shutting down");
    Ok(())
}
