use ulid::Ulid;

use crate::lanes::{compute_lanes, LaneInterval};
use crate::model::*;

use super::validate::validate_window;
use super::{Engine, EngineError};

impl Engine {
    pub async fn get_worker(&self, id: Ulid) -> Option<Worker> {
        let ws = self.get_worker_state(&id)?;
        let guard = ws.read().await;
        Some(guard.worker.clone())
    }

    /// All workers, or one leader's team (the leader included). Sorted by name.
    pub async fn list_workers(&self, leader: Option<Ulid>) -> Vec<Worker> {
        let ids: Vec<Ulid> = match leader {
            Some(leader_id) => {
                let mut ids = self
                    .team
                    .get(&leader_id)
                    .map(|members| members.value().clone())
                    .unwrap_or_default();
                if self.state.contains_key(&leader_id) {
                    ids.push(leader_id);
                }
                ids
            }
            None => self.state.iter().map(|e| *e.key()).collect(),
        };

        let mut workers = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(worker) = self.get_worker(id).await {
                workers.push(worker);
            }
        }
        workers.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        workers
    }

    pub fn get_project(&self, id: Ulid) -> Option<Project> {
        self.projects.get(&id).map(|p| p.value().clone())
    }

    pub fn list_projects(&self, leader: Option<Ulid>, status: Option<ProjectStatus>) -> Vec<Project> {
        let mut projects: Vec<Project> = self
            .projects
            .iter()
            .filter(|p| leader.is_none_or(|l| p.project_leader_id == Some(l)))
            .filter(|p| status.is_none_or(|s| p.status == s))
            .map(|p| p.value().clone())
            .collect();
        projects.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        projects
    }

    pub async fn get_assignment(&self, id: Ulid) -> Option<Assignment> {
        let worker_id = self.get_worker_for_assignment(&id)?;
        let ws = self.get_worker_state(&worker_id)?;
        let guard = ws.read().await;
        guard.get_assignment(id).copied()
    }

    /// A worker's assignments in schedule order. Unknown worker → empty.
    pub async fn get_worker_assignments(&self, worker_id: Ulid) -> Vec<Assignment> {
        match self.get_worker_state(&worker_id) {
            Some(ws) => ws.read().await.assignments.clone(),
            None => Vec::new(),
        }
    }

    /// A project's assignments, sorted by start then worker. Unknown project → empty.
    pub async fn get_project_assignments(&self, project_id: Ulid) -> Vec<Assignment> {
        let ids = self
            .project_assignments
            .get(&project_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();

        let mut assignments = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(worker_id) = self.get_worker_for_assignment(&id) else {
                continue;
            };
            let Some(ws) = self.get_worker_state(&worker_id) else {
                continue;
            };
            if let Some(a) = ws.read().await.get_assignment(id) {
                assignments.push(*a);
            }
        }
        assignments.sort_by(|a, b| {
            a.range
                .start
                .cmp(&b.range.start)
                .then(a.worker_id.cmp(&b.worker_id))
        });
        assignments
    }

    /// Lay out one worker's calendar row for `window`: one row per visible
    /// assignment, ordered by lane then start date.
    pub async fn compute_worker_lanes(
        &self,
        worker_id: Ulid,
        window: DateRange,
    ) -> Result<Vec<LaneRow>, EngineError> {
        validate_window(&window)?;
        let ws = self
            .get_worker_state(&worker_id)
            .ok_or(EngineError::NotFound(worker_id))?;
        let visible: Vec<Assignment> = {
            let guard = ws.read().await;
            guard.overlapping(&window).copied().collect()
        };
        Ok(lane_rows(worker_id, &visible, &window))
    }

    /// Every worker's row (or one leader's team), each packed independently.
    /// Rows are grouped by worker, workers sorted by name.
    pub async fn compute_calendar(
        &self,
        window: DateRange,
        leader: Option<Ulid>,
    ) -> Result<Vec<LaneRow>, EngineError> {
        validate_window(&window)?;
        let mut rows = Vec::new();
        for worker in self.list_workers(leader).await {
            match self.compute_worker_lanes(worker.id, window).await {
                Ok(worker_rows) => rows.extend(worker_rows),
                // Deleted between listing and reading.
                Err(EngineError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(rows)
    }
}

fn lane_rows(worker_id: Ulid, visible: &[Assignment], window: &DateRange) -> Vec<LaneRow> {
    let intervals: Vec<LaneInterval<Ulid>> = visible
        .iter()
        .map(|a| LaneInterval::new(a.id, a.range.start, a.range.end))
        .collect();
    let slots = compute_lanes(&intervals, window.start, window.end);

    let mut rows: Vec<LaneRow> = visible
        .iter()
        .filter_map(|a| {
            let slot = slots.get(&a.id)?;
            Some(LaneRow {
                worker_id,
                assignment_id: a.id,
                project_id: a.project_id,
                range: a.range,
                lane: slot.lane,
                total_lanes: slot.total_lanes,
            })
        })
        .collect();
    rows.sort_by(|a, b| a.lane.cmp(&b.lane).then(a.range.start.cmp(&b.range.start)));
    rows
}
