mod academics;
mod ai;
mod backup;
mod classes;
mod config;
mod db;
mod institution;
mod inventory;
mod ipc;
mod paper;
mod question_bank;

use std::io::{self, BufRead, Write};

fn main() {
    // stdout carries the protocol, so logs go to stderr.
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("SCHOOLD_LOG", "info"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = config::AppConfig::from_env();
    log::info!(
        "schoold {} starting (AI endpoint {})",
        env!("CARGO_PKG_VERSION"),
        config.ai.base_url
    );
    let startup_workspace = config.startup_workspace.clone();
    let mut state = ipc::AppState::new(config);

    if let Some(path) = startup_workspace {
        match db::open_db(&path) {
            Ok(conn) => {
                log::info!("workspace opened at {}", path.to_string_lossy());
                state.workspace = Some(path);
                state.db = Some(conn);
            }
            Err(e) => log::error!(
                "failed to open startup workspace {}: {:#}",
                path.to_string_lossy(),
                e
            ),
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                log::error!("stdin read failed: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to answer to.
                log::warn!("dropping malformed request: {}", e);
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() },
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    log::info!("stdin closed; exiting");
}
