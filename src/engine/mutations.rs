use std::collections::{HashMap, HashSet};

use tokio::sync::oneshot;
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::validate::{validate_name, validate_project, validate_range};
use super::{Engine, EngineError, SharedWorkerState, WalCommand};

impl Engine {
    /// A leader reference must name an existing project leader other than `self_id`.
    async fn check_leader(&self, leader_id: Option<Ulid>, self_id: Ulid) -> Result<(), EngineError> {
        let Some(leader_id) = leader_id else {
            return Ok(());
        };
        if leader_id == self_id {
            return Err(EngineError::InvalidInput(format!(
                "{self_id} cannot be its own project leader"
            )));
        }
        let leader = self
            .get_worker_state(&leader_id)
            .ok_or(EngineError::NotFound(leader_id))?;
        let role = leader.read().await.worker.role;
        if role != WorkerRole::ProjectLeader {
            return Err(EngineError::InvalidInput(format!(
                "{leader_id} is not a project leader"
            )));
        }
        Ok(())
    }

    /// True if any team member or project still points at `leader_id`.
    fn is_referenced_leader(&self, leader_id: &Ulid) -> bool {
        let has_team = self
            .team
            .get(leader_id)
            .is_some_and(|members| !members.is_empty());
        has_team
            || self
                .projects
                .iter()
                .any(|p| p.project_leader_id.as_ref() == Some(leader_id))
    }

    // ── Workers ──────────────────────────────────────────────

    pub async fn create_worker(
        &self,
        id: Ulid,
        name: String,
        role: WorkerRole,
        project_leader_id: Option<Ulid>,
    ) -> Result<(), EngineError> {
        let _gate = self.write_gate.read().await;
        if self.state.len() >= MAX_WORKERS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many workers"));
        }
        validate_name(&name, "worker name")?;
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        self.check_leader(project_leader_id, id).await?;

        let worker = Worker { id, name, role, project_leader_id };
        let event = Event::WorkerCreated(worker.clone());
        self.wal_append(&event).await?;
        self.insert_worker_state(worker);
        self.notify.publish(&event);
        debug!("worker {id} created");
        Ok(())
    }

    pub async fn update_worker(
        &self,
        id: Ulid,
        name: String,
        role: WorkerRole,
        project_leader_id: Option<Ulid>,
    ) -> Result<(), EngineError> {
        validate_name(&name, "worker name")?;
        // Exclusive: a demotion must not race a new reference to this leader.
        let _gate = self.write_gate.write().await;
        let ws = self.get_worker_state(&id).ok_or(EngineError::NotFound(id))?;
        self.check_leader(project_leader_id, id).await?;

        let mut guard = ws.write().await;
        if guard.worker.role == WorkerRole::ProjectLeader
            && role != WorkerRole::ProjectLeader
            && self.is_referenced_leader(&id)
        {
            return Err(EngineError::InUse(id));
        }

        let event = Event::WorkerUpdated(Worker { id, name, role, project_leader_id });
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn delete_worker(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.write_gate.write().await;
        let ws = self.get_worker_state(&id).ok_or(EngineError::NotFound(id))?;
        let guard = ws.write().await;
        if !guard.assignments.is_empty() || self.is_referenced_leader(&id) {
            return Err(EngineError::InUse(id));
        }
        let leader = guard.worker.project_leader_id;

        let event = Event::WorkerDeleted { id };
        self.wal_append(&event).await?;
        self.remove_worker_state(&id, leader);
        drop(guard);
        self.notify.publish(&event);
        self.notify.remove(&id);
        debug!("worker {id} deleted");
        Ok(())
    }

    // ── Projects ─────────────────────────────────────────────

    pub async fn create_project(&self, project: Project) -> Result<(), EngineError> {
        let _gate = self.write_gate.read().await;
        if self.projects.len() >= MAX_PROJECTS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many projects"));
        }
        validate_project(&project)?;
        if self.projects.contains_key(&project.id) {
            return Err(EngineError::AlreadyExists(project.id));
        }
        self.check_leader(project.project_leader_id, project.id).await?;

        let event = Event::ProjectCreated(project.clone());
        self.wal_append(&event).await?;
        self.projects.insert(project.id, project);
        self.notify.publish(&event);
        Ok(())
    }

    pub async fn update_project(&self, project: Project) -> Result<(), EngineError> {
        validate_project(&project)?;
        let _gate = self.write_gate.read().await;
        if !self.projects.contains_key(&project.id) {
            return Err(EngineError::NotFound(project.id));
        }
        self.check_leader(project.project_leader_id, project.id).await?;

        let event = Event::ProjectUpdated(project.clone());
        self.wal_append(&event).await?;
        self.projects.insert(project.id, project);
        self.notify.publish(&event);
        Ok(())
    }

    pub async fn delete_project(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.write_gate.write().await;
        if !self.projects.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let in_use = self
            .project_assignments
            .get(&id)
            .is_some_and(|ids| !ids.is_empty());
        if in_use {
            return Err(EngineError::InUse(id));
        }

        let event = Event::ProjectDeleted { id };
        self.wal_append(&event).await?;
        self.projects.remove(&id);
        self.project_assignments.remove(&id);
        self.notify.publish(&event);
        self.notify.remove(&id);
        Ok(())
    }

    // ── Assignments ──────────────────────────────────────────

    fn check_assignment_refs(&self, project_id: Ulid, range: &DateRange) -> Result<(), EngineError> {
        validate_range(range)?;
        if !self.projects.contains_key(&project_id) {
            return Err(EngineError::NotFound(project_id));
        }
        Ok(())
    }

    pub async fn create_assignment(
        &self,
        id: Ulid,
        project_id: Ulid,
        worker_id: Ulid,
        range: DateRange,
    ) -> Result<(), EngineError> {
        let _gate = self.write_gate.read().await;
        self.check_assignment_refs(project_id, &range)?;
        if self.assignment_to_worker.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let ws = self
            .get_worker_state(&worker_id)
            .ok_or(EngineError::NotFound(worker_id))?;
        let mut guard = ws.write().await;
        if guard.assignments.len() >= MAX_ASSIGNMENTS_PER_WORKER {
            return Err(EngineError::LimitExceeded("too many assignments on worker"));
        }

        let event = Event::AssignmentCreated(Assignment { id, project_id, worker_id, range });
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Create several assignments. All-or-nothing: everything is validated
    /// first, then the whole batch goes to the WAL as one record. They may
    /// span different workers.
    pub async fn batch_create_assignments(
        &self,
        assignments: Vec<Assignment>,
    ) -> Result<(), EngineError> {
        if assignments.is_empty() {
            return Ok(());
        }
        if assignments.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        let _gate = self.write_gate.read().await;
        let mut seen = HashSet::new();
        for a in &assignments {
            self.check_assignment_refs(a.project_id, &a.range)?;
            if !seen.insert(a.id) || self.assignment_to_worker.contains_key(&a.id) {
                return Err(EngineError::AlreadyExists(a.id));
            }
        }

        // Acquire write locks in sorted order to prevent deadlocks.
        let mut worker_ids: Vec<Ulid> = assignments.iter().map(|a| a.worker_id).collect();
        worker_ids.sort();
        worker_ids.dedup();

        let mut per_worker: HashMap<Ulid, usize> = HashMap::new();
        for a in &assignments {
            *per_worker.entry(a.worker_id).or_default() += 1;
        }

        let mut guards = HashMap::with_capacity(worker_ids.len());
        for wid in &worker_ids {
            let ws = self.get_worker_state(wid).ok_or(EngineError::NotFound(*wid))?;
            let guard = ws.write_owned().await;
            if guard.assignments.len() + per_worker[wid] > MAX_ASSIGNMENTS_PER_WORKER {
                return Err(EngineError::LimitExceeded("too many assignments on worker"));
            }
            guards.insert(*wid, guard);
        }

        let events: Vec<Event> = assignments.into_iter().map(Event::AssignmentCreated).collect();
        self.wal_append_group(events.clone()).await?;
        for event in &events {
            for worker_id in event.worker_ids() {
                if let Some(guard) = guards.get_mut(&worker_id) {
                    self.apply_to_worker(guard, event);
                }
            }
            self.apply_to_indexes(event);
            self.notify.publish(event);
        }
        Ok(())
    }

    /// Change an assignment's dates, project or worker.
    pub async fn update_assignment(
        &self,
        id: Ulid,
        project_id: Ulid,
        worker_id: Ulid,
        range: DateRange,
    ) -> Result<(), EngineError> {
        let _gate = self.write_gate.read().await;
        self.check_assignment_refs(project_id, &range)?;
        let current_worker = self
            .get_worker_for_assignment(&id)
            .ok_or(EngineError::NotFound(id))?;
        let updated = Assignment { id, project_id, worker_id, range };

        if current_worker == worker_id {
            let mut guard = self.resolve_assignment_write(&id).await?;
            let previous_project_id = guard
                .get_assignment(id)
                .map(|a| a.project_id)
                .ok_or(EngineError::NotFound(id))?;
            let event = Event::AssignmentUpdated {
                assignment: updated,
                previous_worker_id: worker_id,
                previous_project_id,
            };
            return self.persist_and_apply(&mut guard, &event).await;
        }

        let from_ws = self
            .get_worker_state(&current_worker)
            .ok_or(EngineError::NotFound(current_worker))?;
        let to_ws = self
            .get_worker_state(&worker_id)
            .ok_or(EngineError::NotFound(worker_id))?;
        let (mut from, mut to) = lock_pair(current_worker, from_ws, worker_id, to_ws).await;

        let previous_project_id = from
            .get_assignment(id)
            .map(|a| a.project_id)
            .ok_or(EngineError::NotFound(id))?;
        if to.assignments.len() >= MAX_ASSIGNMENTS_PER_WORKER {
            return Err(EngineError::LimitExceeded("too many assignments on worker"));
        }

        let event = Event::AssignmentUpdated {
            assignment: updated,
            previous_worker_id: current_worker,
            previous_project_id,
        };
        self.wal_append(&event).await?;
        self.apply_to_worker(&mut from, &event);
        self.apply_to_worker(&mut to, &event);
        self.apply_to_indexes(&event);
        self.notify.publish(&event);
        debug!("assignment {id} moved from {current_worker} to {worker_id}");
        Ok(())
    }

    /// Returns the worker the assignment belonged to.
    pub async fn delete_assignment(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let _gate = self.write_gate.read().await;
        let mut guard = self.resolve_assignment_write(&id).await?;
        let worker_id = guard.id();
        let project_id = guard
            .get_assignment(id)
            .map(|a| a.project_id)
            .ok_or(EngineError::NotFound(id))?;
        let event = Event::AssignmentDeleted { id, worker_id, project_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(worker_id)
    }

    // ── Maintenance ──────────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current state.
    /// Leaders come before their team members, projects before assignments.
    /// Holds the write gate, so every acknowledged append is in the snapshot.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.write_gate.write().await;

        let mut workers = HashMap::with_capacity(self.state.len());
        let mut assignment_events = Vec::new();
        let states: Vec<SharedWorkerState> = self.state.iter().map(|e| e.value().clone()).collect();
        for ws in states {
            let guard = ws.read().await;
            assignment_events.extend(guard.assignments.iter().copied().map(Event::AssignmentCreated));
            workers.insert(guard.id(), guard.worker.clone());
        }

        let mut ids: Vec<Ulid> = workers.keys().copied().collect();
        ids.sort();
        let mut events = Vec::with_capacity(workers.len());
        let mut visited = HashSet::new();
        for id in ids {
            emit_worker(id, &workers, &mut events, &mut visited);
        }
        events.extend(self.projects.iter().map(|p| Event::ProjectCreated(p.value().clone())));
        events.extend(assignment_events);
        debug!("compacting WAL to {} events", events.len());

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Push `id`'s creation event, its leader's first.
fn emit_worker(
    id: Ulid,
    workers: &HashMap<Ulid, Worker>,
    events: &mut Vec<Event>,
    visited: &mut HashSet<Ulid>,
) {
    let Some(worker) = workers.get(&id) else {
        return;
    };
    if !visited.insert(id) {
        return;
    }
    if let Some(leader) = worker.project_leader_id {
        emit_worker(leader, workers, events, visited);
    }
    events.push(Event::WorkerCreated(worker.clone()));
}

/// Write-lock two distinct workers in id order. Returns `(a, b)` guards in argument order.
async fn lock_pair(
    a_id: Ulid,
    a: SharedWorkerState,
    b_id: Ulid,
    b: SharedWorkerState,
) -> (
    tokio::sync::OwnedRwLockWriteGuard<WorkerState>,
    tokio::sync::OwnedRwLockWriteGuard<WorkerState>,
) {
    if a_id < b_id {
        let ga = a.write_owned().await;
        let gb = b.write_owned().await;
        (ga, gb)
    } else {
        let gb = b.write_owned().await;
        let ga = a.write_owned().await;
        (ga, gb)
    }
}
