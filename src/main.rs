mod analytics;
mod calc;
mod config;
mod constraints;
mod db;
mod grading;
mod ipc;
mod report_cards;
mod results;

use std::io::{self, BufRead, Write};

use config::Config;

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_env("TERMRESULTSD_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))
}

fn main() {
    let (config, config_error) = match Config::load() {
        Ok(c) => (c, None),
        Err(e) => (Config::default(), Some(e)),
    };
    if let Err(e) = init_tracing(&config.log_level) {
        eprintln!("{e}");
    }
    if let Some(e) = config_error {
        tracing::warn!(error = %e, "config rejected; using defaults");
    }

    let mut state = ipc::AppState::new(config);
    if let Some(path) = state.config.workspace.clone() {
        if let Err(e) = ipc::select_workspace(&mut state, &path) {
            tracing::error!(workspace = %path.display(), error = ?e, "failed to open configured workspace");
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<serde_json::Value>(&line) {
            Ok(raw) => {
                let id = raw
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                match serde_json::from_value::<ipc::Request>(raw) {
                    Ok(req) => ipc::handle_request(&mut state, req),
                    Err(e) => ipc::err(&id, "bad_json", e.to_string(), None),
                }
            }
            Err(e) => ipc::err("", "bad_json", e.to_string(), None),
        };

        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
