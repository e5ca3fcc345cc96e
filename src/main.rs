mod config;
mod db;
mod error;
mod export;
mod flush;
mod gateway;
mod ipc;
mod merge;
mod model;
mod session;
mod store;

use session::Event;
use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Instant;

fn write_line(stdout: &mut io::Stdout, value: &serde_json::Value) {
    let _ = writeln!(
        stdout,
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{\"ok\":false}".to_string())
    );
    let _ = stdout.flush();
}

fn main() {
    config::DaemonConfig::from_env().init_logging();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rollcalld starting");

    let (tx, rx) = mpsc::channel::<Event>();
    let mut state = ipc::AppState::new(tx.clone());

    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.send(Event::Line(line)).is_err() {
                return;
            }
        }
        let _ = tx.send(Event::InputClosed);
    });

    let mut stdout = io::stdout();
    loop {
        // Timers only fire between events; everything runs on this thread.
        let event = match state.next_wakeup() {
            Some(at) => {
                let wait = at.saturating_duration_since(Instant::now());
                match rx.recv_timeout(wait) {
                    Ok(ev) => Some(ev),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(ev) => Some(ev),
                Err(_) => break,
            },
        };

        match event {
            None => {}
            Some(Event::InputClosed) => break,
            Some(Event::Line(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let req: ipc::Request = match serde_json::from_str(&line) {
                    Ok(v) => v,
                    Err(e) => {
                        // Can't reply without id.
                        tracing::warn!(error = %e, "unparseable request line");
                        write_line(
                            &mut stdout,
                            &serde_json::json!({
                                "ok": false,
                                "error": { "code": "bad_json", "message": e.to_string() }
                            }),
                        );
                        continue;
                    }
                };
                tracing::debug!(id = %req.id, method = %req.method, "request");
                let resp = ipc::handle_request(&mut state, req);
                write_line(&mut stdout, &resp);
            }
            Some(worker) => state.on_worker_event(worker),
        }
        state.tick(Instant::now());
    }

    state.end_session();
    tracing::info!("rollcalld exiting");
}
