use crate::session::{Event, Session};
use rusqlite::Connection;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::time::Instant;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub session: Option<Session>,
    pub events: Sender<Event>,
    next_epoch: u64,
}

impl AppState {
    pub fn new(events: Sender<Event>) -> Self {
        Self {
            workspace: None,
            db: None,
            session: None,
            events,
            next_epoch: 1,
        }
    }

    pub fn take_epoch(&mut self) -> u64 {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        epoch
    }

    pub fn next_wakeup(&self) -> Option<Instant> {
        self.session.as_ref().and_then(|s| s.next_wakeup())
    }

    pub fn tick(&mut self, now: Instant) {
        if let (Some(conn), Some(session)) = (self.db.as_ref(), self.session.as_mut()) {
            session.tick(conn, now);
        }
    }

    /// Routes a worker result to the session that started it.
    pub fn on_worker_event(&mut self, event: Event) {
        let (Some(conn), Some(session)) = (self.db.as_ref(), self.session.as_mut()) else {
            return;
        };
        match event {
            Event::LoadDone { epoch, result } if epoch == session.epoch() => {
                session.on_load_done(conn, result);
            }
            Event::FlushDone {
                epoch,
                ticket,
                batch,
                result,
            } if epoch == session.epoch() => {
                session.on_flush_done(ticket, batch, result);
            }
            Event::LoadDone { epoch, .. } | Event::FlushDone { epoch, .. } => {
                tracing::debug!(epoch, "dropping result from an ended session");
            }
            Event::Line(_) | Event::InputClosed => {}
        }
    }

    /// Ends the active session, writing a still-pending window once.
    pub fn end_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.shutdown();
            tracing::info!(
                username = session.username(),
                group = session.store().group_key(),
                "session ended"
            );
        }
    }
}
