use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "bemanning_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "bemanning_query_duration_seconds";

/// Histogram: rows returned by a lane query.
pub const LANE_ROWS: &str = "bemanning_lane_rows";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "bemanning_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "bemanning_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "bemanning_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "bemanning_tenants_active";

/// Counter: connections that failed startup or tenant resolution.
pub const AUTH_FAILURES_TOTAL: &str = "bemanning_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "bemanning_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "bemanning_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metrics label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertWorker { .. } => "insert_worker",
        Command::UpdateWorker { .. } => "update_worker",
        Command::DeleteWorker { .. } => "delete_worker",
        Command::SelectWorkers { .. } => "select_workers",
        Command::InsertProject { .. } => "insert_project",
        Command::UpdateProject { .. } => "update_project",
        Command::DeleteProject { .. } => "delete_project",
        Command::SelectProjects { .. } => "select_projects",
        Command::InsertAssignment { .. } => "insert_assignment",
        Command::BatchInsertAssignments { .. } => "batch_insert_assignments",
        Command::UpdateAssignment { .. } => "update_assignment",
        Command::DeleteAssignment { .. } => "delete_assignment",
        Command::SelectAssignments { .. } => "select_assignments",
        Command::SelectLanes { .. } => "select_lanes",
    }
}
