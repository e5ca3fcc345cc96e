use crate::config::SyncSettings;
use crate::db;
use crate::error::{GatewayError, StoreError};
use crate::flush::FlushScheduler;
use crate::gateway::SyncGateway;
use crate::model::{Snapshot, SyncPayload};
use crate::store::{AttendanceStore, Readiness, SyncBatch};
use rusqlite::Connection;
use serde_json::json;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Everything the main loop reacts to. Worker results carry the epoch of the
/// session that started them so results from a previous login are dropped.
#[derive(Debug)]
pub enum Event {
    Line(String),
    InputClosed,
    LoadDone {
        epoch: u64,
        result: Result<Snapshot, GatewayError>,
    },
    FlushDone {
        epoch: u64,
        ticket: u64,
        batch: SyncBatch,
        result: Result<(), GatewayError>,
    },
}

/// Work for the session's save worker.
enum SaveJob {
    Flush { ticket: u64, batch: SyncBatch },
    Final {
        payload: SyncPayload,
        done: Sender<Result<(), GatewayError>>,
    },
    /// Answers once every earlier job has finished.
    Barrier { done: Sender<Result<(), GatewayError>> },
}

/// Starts the single thread that talks to the remote store for a session.
/// Saves run one at a time, so a batch can never land after a newer one.
fn spawn_saver(
    gateway: Arc<dyn SyncGateway>,
    group_key: String,
    epoch: u64,
    events: Sender<Event>,
) -> Sender<SaveJob> {
    let (tx, rx) = mpsc::channel::<SaveJob>();
    std::thread::spawn(move || {
        for job in rx {
            match job {
                SaveJob::Flush { ticket, batch } => {
                    let result = gateway.save(&group_key, &batch.payload);
                    // The main loop may already be gone at shutdown; keep draining.
                    let _ = events.send(Event::FlushDone {
                        epoch,
                        ticket,
                        batch,
                        result,
                    });
                }
                SaveJob::Final { payload, done } => {
                    let _ = done.send(gateway.save(&group_key, &payload));
                }
                SaveJob::Barrier { done } => {
                    let _ = done.send(Ok(()));
                }
            }
        }
    });
    tx
}

/// One logged-in leader: the group's store, its flush timer, and the
/// optional remote side.
pub struct Session {
    username: String,
    epoch: u64,
    store: AttendanceStore,
    scheduler: FlushScheduler,
    gateway: Option<Arc<dyn SyncGateway>>,
    saver: Option<Sender<SaveJob>>,
    settings: SyncSettings,
    local: Snapshot,
    load_deadline: Option<Instant>,
    last_sync_error: Option<String>,
    flushed_batches: u64,
}

impl Session {
    /// Reads the local cache now and fetches the remote snapshot on a worker
    /// thread. Without a gateway the session is ready immediately.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        username: &str,
        group_key: &str,
        epoch: u64,
        settings: SyncSettings,
        gateway: Option<Arc<dyn SyncGateway>>,
        conn: &Connection,
        events: &Sender<Event>,
        now: Instant,
    ) -> Self {
        let mut store = AttendanceStore::new(group_key);
        store.begin_load();

        let local = match db::read_cache(conn, group_key) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(group = group_key, error = %e, "local cache unreadable; starting empty");
                Snapshot::default()
            }
        };

        if local.is_empty() {
            tracing::debug!(group = group_key, "no cached snapshot for group");
        }

        let scheduler = FlushScheduler::new(settings.debounce(), settings.remote_timeout());
        let saver = gateway
            .clone()
            .map(|gw| spawn_saver(gw, group_key.to_string(), epoch, events.clone()));
        let mut session = Self {
            username: username.to_string(),
            epoch,
            store,
            scheduler,
            gateway,
            saver,
            settings,
            local,
            load_deadline: None,
            last_sync_error: None,
            flushed_batches: 0,
        };

        match session.gateway.clone() {
            Some(gateway) => {
                session.load_deadline = Some(now + session.settings.remote_timeout());
                let tx = events.clone();
                let group = group_key.to_string();
                std::thread::spawn(move || {
                    let result = gateway.load(&group);
                    let _ = tx.send(Event::LoadDone { epoch, result });
                });
                tracing::info!(group = group_key, epoch, "session loading");
            }
            None => {
                tracing::info!(group = group_key, epoch, "session started without remote sync");
                session.finish_load(conn, Snapshot::default());
            }
        }
        session
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn store(&self) -> &AttendanceStore {
        &self.store
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    fn finish_load(&mut self, conn: &Connection, remote: Snapshot) {
        let local = std::mem::take(&mut self.local);
        if let Err(e) = self.store.finish_load(&local, &remote) {
            tracing::error!(error = %e, "merge attempted outside loading state");
            return;
        }
        self.load_deadline = None;
        tracing::info!(
            group = self.store.group_key(),
            roster = self.store.roster().len(),
            dates = self.store.attendance().len(),
            "session ready"
        );
        self.persist(conn);
    }

    pub fn on_load_done(&mut self, conn: &Connection, result: Result<Snapshot, GatewayError>) {
        if self.store.readiness() != Readiness::Loading {
            tracing::debug!(epoch = self.epoch, "late remote snapshot ignored");
            return;
        }
        let remote = match result {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "remote load failed; using local cache only");
                Snapshot::default()
            }
        };
        self.finish_load(conn, remote);
    }

    pub fn on_flush_done(&mut self, ticket: u64, batch: SyncBatch, result: Result<(), GatewayError>) {
        if !self.scheduler.finish(ticket) {
            tracing::debug!(ticket, "result for an abandoned flush");
        }
        match result {
            Ok(()) => {
                let cleared = self.store.acknowledge(&batch);
                self.flushed_batches += 1;
                self.last_sync_error = None;
                tracing::info!(
                    ticket,
                    cleared,
                    remaining = self.store.dirty_len(),
                    "flush complete"
                );
            }
            Err(e) => {
                // At most once per window: no retry until the next mutation re-arms.
                tracing::warn!(ticket, keys = batch.key_count(), error = %e, "flush failed");
                self.last_sync_error = Some(e.to_string());
            }
        }
    }

    fn persist(&self, conn: &Connection) {
        if let Err(e) = db::write_cache(conn, self.store.group_key(), &self.store.snapshot()) {
            tracing::error!(group = self.store.group_key(), error = %e, "failed to write local cache");
        }
    }

    /// Runs one store operation. Any state change is written to the local
    /// cache and re-arms the debounce timer.
    pub fn apply<T>(
        &mut self,
        conn: &Connection,
        now: Instant,
        op: impl FnOnce(&mut AttendanceStore) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let before = self.store.revision();
        let out = op(&mut self.store)?;
        if self.store.revision() != before {
            self.persist(conn);
            if self.gateway.is_some() {
                self.scheduler.arm(now);
            }
        }
        Ok(out)
    }

    /// Pulls the pending window forward. `false` when there is nothing to send.
    pub fn flush_now(&mut self, now: Instant) -> bool {
        if self.gateway.is_none() || !self.store.has_dirty() {
            return false;
        }
        self.scheduler.arm_now(now);
        true
    }

    pub fn next_wakeup(&self) -> Option<Instant> {
        let load = if self.store.readiness() == Readiness::Loading {
            self.load_deadline
        } else {
            None
        };
        match (load, self.scheduler.next_wakeup()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn tick(&mut self, conn: &Connection, now: Instant) {
        if self.store.readiness() == Readiness::Loading {
            if let Some(at) = self.load_deadline {
                if at <= now {
                    tracing::warn!(
                        timeout_ms = self.settings.remote_timeout_ms,
                        "remote load timed out; using local cache only"
                    );
                    self.finish_load(conn, Snapshot::default());
                }
            }
            return;
        }

        let Some(saver) = self.saver.as_ref() else {
            return;
        };
        let Some(ticket) = self.scheduler.poll(now) else {
            return;
        };
        let Some(batch) = self.store.take_batch() else {
            self.scheduler.cancel(ticket);
            return;
        };

        tracing::debug!(ticket, keys = batch.key_count(), "flush started");
        // An abandoned flight may still be running; this batch queues behind it.
        if saver.send(SaveJob::Flush { ticket, batch }).is_err() {
            tracing::error!(ticket, "save worker is gone");
            self.scheduler.cancel(ticket);
        }
    }

    /// Called on logout and when stdin closes. Waits for remote writes that
    /// are already running, and writes a window whose timer never got to fire
    /// once. Bounded by twice the remote timeout.
    pub fn shutdown(&mut self) {
        let Some(saver) = self.saver.take() else {
            return;
        };
        let deadline = Instant::now() + self.settings.remote_timeout() * 2;

        let pending = if self.store.readiness() == Readiness::Ready && self.scheduler.is_armed() {
            self.store.take_batch()
        } else {
            None
        };
        self.scheduler.disarm();

        let (done_tx, done_rx) = mpsc::channel();
        let job = match &pending {
            Some(batch) => SaveJob::Final {
                payload: batch.payload.clone(),
                done: done_tx,
            },
            None => SaveJob::Barrier { done: done_tx },
        };
        if saver.send(job).is_err() {
            tracing::error!("save worker is gone; pending changes remain local");
            return;
        }

        match (
            done_rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
            pending,
        ) {
            (Ok(Ok(())), Some(batch)) => {
                let cleared = self.store.acknowledge(&batch);
                tracing::info!(cleared, "final flush complete");
            }
            (Ok(Ok(())), None) => tracing::debug!("remote writes settled"),
            (Ok(Err(e)), _) => {
                tracing::warn!(error = %e, "final flush failed; changes remain local")
            }
            (Err(_), _) => tracing::warn!(
                timeout_ms = self.settings.remote_timeout_ms,
                "remote writes still running at shutdown"
            ),
        }
    }

    pub fn status_json(&self) -> serde_json::Value {
        json!({
            "state": self.store.readiness().as_str(),
            "username": self.username,
            "groupKey": self.store.group_key(),
            "remoteEnabled": self.gateway.is_some(),
            "dirtyCount": self.store.dirty_len(),
            "flushInFlight": self.scheduler.in_flight().is_some(),
            "flushPending": self.scheduler.is_armed(),
            "flushedBatches": self.flushed_batches,
            "lastSyncError": self.last_sync_error,
        })
    }
}

/// Builds the remote gateway for a workspace, if one is configured.
pub fn gateway_for(
    settings: &SyncSettings,
    workspace: &std::path::Path,
) -> Option<Arc<dyn SyncGateway>> {
    let path = settings.resolve_remote_path(workspace)?;
    let timeout = settings.remote_timeout().max(Duration::from_millis(1));
    let gateway = crate::gateway::SqliteGateway::new(path, timeout);
    tracing::debug!(remote = %gateway.path().display(), "remote store configured");
    Some(Arc::new(gateway))
}
