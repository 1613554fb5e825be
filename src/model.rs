use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Inclusive day range `[start, end]`. No time-of-day component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DateRange start must not be after end");
        Self { start, end }
    }

    /// Number of calendar days covered, both ends included.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Inclusive: ranges sharing a single day overlap.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerRole {
    Worker,
    ProjectLeader,
}

impl WorkerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerRole::Worker => "worker",
            WorkerRole::ProjectLeader => "project-leader",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "worker" => Some(WorkerRole::Worker),
            "project-leader" | "project_leader" => Some(WorkerRole::ProjectLeader),
            _ => None,
        }
    }
}

/// How a project is invoiced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BillingType {
    /// Invoiced by percentage of the contract amount (`a_konto_percent`).
    AKonto,
    /// Invoiced manually.
    Manual,
}

impl BillingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingType::AKonto => "a-konto",
            BillingType::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "a-konto" | "akonto" | "a_konto" => Some(BillingType::AKonto),
            "manual" => Some(BillingType::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProjectStatus {
    Planned,
    Active,
    Completed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Planned => "planned",
            ProjectStatus::Active => "active",
            ProjectStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "planned" => Some(ProjectStatus::Planned),
            "active" => Some(ProjectStatus::Active),
            "completed" => Some(ProjectStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub id: Ulid,
    pub name: String,
    pub role: WorkerRole,
    /// Leader whose team this worker is on.
    pub project_leader_id: Option<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: Ulid,
    pub name: String,
    /// Contract value in minor currency units.
    pub amount: i64,
    pub a_konto_percent: u8,
    pub billing_type: BillingType,
    pub status: ProjectStatus,
    pub project_type: Option<String>,
    pub project_leader_id: Option<Ulid>,
}

/// A worker booked on a project for a range of days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Ulid,
    pub project_id: Ulid,
    pub worker_id: Ulid,
    pub range: DateRange,
}

/// One worker and its assignments.
#[derive(Debug, Clone)]
pub struct WorkerState {
    pub worker: Worker,
    /// Sorted by `range.start`; equal starts keep insertion order.
    pub assignments: Vec<Assignment>,
}

impl WorkerState {
    pub fn new(worker: Worker) -> Self {
        Self {
            worker,
            assignments: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.worker.id
    }

    /// Insert after every assignment with the same or an earlier start.
    pub fn insert_assignment(&mut self, assignment: Assignment) {
        let pos = self
            .assignments
            .partition_point(|a| a.range.start <= assignment.range.start);
        self.assignments.insert(pos, assignment);
    }

    pub fn remove_assignment(&mut self, id: Ulid) -> Option<Assignment> {
        let pos = self.assignments.iter().position(|a| a.id == id)?;
        Some(self.assignments.remove(pos))
    }

    pub fn get_assignment(&self, id: Ulid) -> Option<&Assignment> {
        self.assignments.iter().find(|a| a.id == id)
    }

    /// Assignments sharing at least one day with `window`, in schedule order.
    pub fn overlapping(&self, window: &DateRange) -> impl Iterator<Item = &Assignment> {
        // Everything from right_bound on starts after the window.
        let right_bound = self
            .assignments
            .partition_point(|a| a.range.start <= window.end);
        self.assignments[..right_bound]
            .iter()
            .filter(move |a| a.range.end >= window.start)
    }
}

/// The event types, flat. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    WorkerCreated(Worker),
    WorkerUpdated(Worker),
    WorkerDeleted {
        id: Ulid,
    },
    ProjectCreated(Project),
    ProjectUpdated(Project),
    ProjectDeleted {
        id: Ulid,
    },
    AssignmentCreated(Assignment),
    /// The previous ids differ from the new ones when the assignment moved
    /// to another worker or project.
    AssignmentUpdated {
        assignment: Assignment,
        previous_worker_id: Ulid,
        previous_project_id: Ulid,
    },
    AssignmentDeleted {
        id: Ulid,
        worker_id: Ulid,
        project_id: Ulid,
    },
}

impl Event {
    /// Workers whose state this event changes, previous worker first.
    pub fn worker_ids(&self) -> Vec<Ulid> {
        match self {
            Event::WorkerCreated(w) | Event::WorkerUpdated(w) => vec![w.id],
            Event::WorkerDeleted { id } => vec![*id],
            Event::AssignmentCreated(a) => vec![a.worker_id],
            Event::AssignmentUpdated {
                assignment,
                previous_worker_id,
                ..
            } => moved(*previous_worker_id, assignment.worker_id),
            Event::AssignmentDeleted { worker_id, .. } => vec![*worker_id],
            Event::ProjectCreated(_) | Event::ProjectUpdated(_) | Event::ProjectDeleted { .. } => {
                Vec::new()
            }
        }
    }

    /// Projects this event touches, previous project first.
    pub fn project_ids(&self) -> Vec<Ulid> {
        match self {
            Event::ProjectCreated(p) | Event::ProjectUpdated(p) => vec![p.id],
            Event::ProjectDeleted { id } => vec![*id],
            Event::AssignmentCreated(a) => vec![a.project_id],
            Event::AssignmentUpdated {
                assignment,
                previous_project_id,
                ..
            } => moved(*previous_project_id, assignment.project_id),
            Event::AssignmentDeleted { project_id, .. } => vec![*project_id],
            Event::WorkerCreated(_) | Event::WorkerUpdated(_) | Event::WorkerDeleted { .. } => {
                Vec::new()
            }
        }
    }
}

fn moved(from: Ulid, to: Ulid) -> Vec<Ulid> {
    if from == to { vec![to] } else { vec![from, to] }
}

// ── Query result types ───────────────────────────────────────────

/// One visible assignment placed on a calendar row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneRow {
    pub worker_id: Ulid,
    pub assignment_id: Ulid,
    pub project_id: Ulid,
    pub range: DateRange,
    pub lane: usize,
    pub total_lanes: usize,
}

#[cfg(test)]
pub(crate) fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}
