mod error;
mod mutations;
mod queries;
mod validate;

pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedWorkerState = Arc<RwLock<WorkerState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    /// One commit group: the events of a single mutation, written as one record.
    Append {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { events, response } => {
                let mut batch = vec![(events, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { events, response }) => {
                            batch.push((events, response));
                        }
                        Ok(other) => {
                            // Flush what we have before compacting or reporting.
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let results = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                for ((_, tx), result) in batch.into_iter().zip(results) {
                    let _ = tx.send(result);
                }

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

/// Buffer every group, then one fsync. A group that fails to encode is
/// skipped whole; a failed fsync fails every group in the batch.
fn flush_batch(
    wal: &mut Wal,
    batch: &[(Vec<Event>, oneshot::Sender<io::Result<()>>)],
) -> Vec<io::Result<()>> {
    let mut results: Vec<io::Result<()>> = batch
        .iter()
        .map(|(events, _)| wal.append_buffered(events))
        .collect();
    if let Err(e) = wal.flush_sync() {
        for result in results.iter_mut().filter(|r| r.is_ok()) {
            *result = Err(io::Error::new(e.kind(), e.to_string()));
        }
    }
    results
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// One tenant's workers, projects and assignments.
pub struct Engine {
    pub state: DashMap<Ulid, SharedWorkerState>,
    pub projects: DashMap<Ulid, Project>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: assignment id → worker id.
    pub(super) assignment_to_worker: DashMap<Ulid, Ulid>,
    /// Project → assignment ids.
    pub(super) project_assignments: DashMap<Ulid, Vec<Ulid>>,
    /// Project leader → team member ids.
    pub(super) team: DashMap<Ulid, Vec<Ulid>>,
    /// Shared by mutations that create or move references; exclusive for
    /// deletes, worker updates and compaction. Taken before any worker lock.
    pub(super) write_gate: RwLock<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            projects: DashMap::new(),
            wal_tx,
            notify,
            assignment_to_worker: DashMap::new(),
            project_assignments: DashMap::new(),
            team: DashMap::new(),
            write_gate: RwLock::new(()),
        };

        // We are the sole owner of every lock here, so try_write always succeeds.
        // Never block: this may run inside an async context (lazy tenant creation).
        for event in &events {
            match event {
                Event::WorkerCreated(worker) => engine.insert_worker_state(worker.clone()),
                Event::WorkerDeleted { id } => {
                    let leader = match engine.get_worker_state(id) {
                        Some(ws) => ws.try_read().map_err(replay_contended)?.worker.project_leader_id,
                        None => None,
                    };
                    engine.remove_worker_state(id, leader);
                }
                Event::ProjectCreated(project) | Event::ProjectUpdated(project) => {
                    engine.projects.insert(project.id, project.clone());
                }
                Event::ProjectDeleted { id } => {
                    engine.projects.remove(id);
                    engine.project_assignments.remove(id);
                }
                other => {
                    for worker_id in other.worker_ids() {
                        if let Some(ws) = engine.get_worker_state(&worker_id) {
                            let mut guard = ws.try_write().map_err(replay_contended)?;
                            engine.apply_to_worker(&mut guard, other);
                        }
                    }
                    engine.apply_to_indexes(other);
                }
            }
        }

        tracing::debug!(
            "replayed {} events: {} workers, {} projects",
            events.len(),
            engine.state.len(),
            engine.projects.len()
        );
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append_group(vec![event.clone()]).await
    }

    /// Write several events as one record: after a crash, replay sees all of them or none.
    async fn wal_append_group(&self, events: Vec<Event>) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_worker_state(&self, id: &Ulid) -> Option<SharedWorkerState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_worker_for_assignment(&self, assignment_id: &Ulid) -> Option<Ulid> {
        self.assignment_to_worker.get(assignment_id).map(|e| *e.value())
    }

    fn insert_worker_state(&self, worker: Worker) {
        if let Some(leader) = worker.project_leader_id {
            self.team.entry(leader).or_default().push(worker.id);
        }
        let id = worker.id;
        self.state.insert(id, Arc::new(RwLock::new(WorkerState::new(worker))));
    }

    fn remove_worker_state(&self, id: &Ulid, leader: Option<Ulid>) {
        self.state.remove(id);
        if let Some(leader) = leader {
            self.remove_team_member(&leader, id);
        }
        self.team.remove(id);
    }

    fn remove_team_member(&self, leader: &Ulid, member: &Ulid) {
        if let Some(mut members) = self.team.get_mut(leader) {
            members.retain(|m| m != member);
        }
    }

    /// Apply an event to one worker's state (no locking: caller holds the lock).
    fn apply_to_worker(&self, ws: &mut WorkerState, event: &Event) {
        let worker_id = ws.id();
        match event {
            Event::WorkerUpdated(worker) => {
                if ws.worker.project_leader_id != worker.project_leader_id {
                    if let Some(old) = ws.worker.project_leader_id {
                        self.remove_team_member(&old, &worker_id);
                    }
                    if let Some(new) = worker.project_leader_id {
                        self.team.entry(new).or_default().push(worker_id);
                    }
                }
                ws.worker = worker.clone();
            }
            Event::AssignmentCreated(assignment) if assignment.worker_id == worker_id => {
                ws.insert_assignment(*assignment);
            }
            Event::AssignmentUpdated {
                assignment,
                previous_worker_id,
                ..
            } => {
                if *previous_worker_id == worker_id {
                    ws.remove_assignment(assignment.id);
                }
                if assignment.worker_id == worker_id {
                    ws.insert_assignment(*assignment);
                }
            }
            Event::AssignmentDeleted { id, .. } => {
                ws.remove_assignment(*id);
            }
            _ => {}
        }
    }

    /// Keep the assignment lookups in step with an assignment event.
    fn apply_to_indexes(&self, event: &Event) {
        match event {
            Event::AssignmentCreated(a) => {
                self.assignment_to_worker.insert(a.id, a.worker_id);
                self.project_assignments.entry(a.project_id).or_default().push(a.id);
            }
            Event::AssignmentUpdated {
                assignment: a,
                previous_project_id,
                ..
            } => {
                self.assignment_to_worker.insert(a.id, a.worker_id);
                if *previous_project_id != a.project_id {
                    if let Some(mut ids) = self.project_assignments.get_mut(previous_project_id) {
                        ids.retain(|id| id != &a.id);
                    }
                    self.project_assignments.entry(a.project_id).or_default().push(a.id);
                }
            }
            Event::AssignmentDeleted { id, project_id, .. } => {
                self.assignment_to_worker.remove(id);
                if let Some(mut ids) = self.project_assignments.get_mut(project_id) {
                    ids.retain(|a| a != id);
                }
            }
            _ => {}
        }
    }

    /// WAL-append + apply + notify for an event touching a single worker.
    pub(super) async fn persist_and_apply(
        &self,
        ws: &mut WorkerState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_to_worker(ws, event);
        self.apply_to_indexes(event);
        self.notify.publish(event);
        Ok(())
    }

    /// Lookup assignment → worker, then acquire that worker's write lock.
    pub(super) async fn resolve_assignment_write(
        &self,
        assignment_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<WorkerState>, EngineError> {
        let worker_id = self
            .get_worker_for_assignment(assignment_id)
            .ok_or(EngineError::NotFound(*assignment_id))?;
        let ws = self
            .get_worker_state(&worker_id)
            .ok_or(EngineError::NotFound(worker_id))?;
        let guard = ws.write_owned().await;
        if guard.get_assignment(*assignment_id).is_none() {
            // Moved or deleted while we waited for the lock.
            return Err(EngineError::NotFound(*assignment_id));
        }
        Ok(guard)
    }
}

fn replay_contended(_: tokio::sync::TryLockError) -> io::Error {
    io::Error::other("worker lock held during replay")
}
