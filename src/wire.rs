use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::BemanningAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{self, command_label};
use crate::sql::{self, AssignmentFilter, Command};
use crate::tenant::TenantManager;

pub struct BemanningHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<BemanningQueryParser>,
}

impl BemanningHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(BemanningQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// Parse, run and record metrics for one statement.
    async fn run_sql(&self, engine: &Engine, sql: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        if let Err(ref e) = result {
            tracing::debug!("{label} failed: {e}");
        }
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            // ── workers ──
            Command::InsertWorker {
                id,
                name,
                role,
                project_leader_id,
            } => {
                engine
                    .create_worker(id, name, role, project_leader_id)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateWorker { id, patch } => {
                let current = engine
                    .get_worker(id)
                    .await
                    .ok_or(EngineError::NotFound(id))
                    .map_err(engine_err)?;
                let worker = patch.apply(current);
                engine
                    .update_worker(id, worker.name, worker.role, worker.project_leader_id)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteWorker { id } => {
                engine.delete_worker(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectWorkers {
                id: Some(id),
                project_leader_id,
            } => {
                let workers: Vec<Worker> = engine
                    .get_worker(id)
                    .await
                    .filter(|w| project_leader_id.is_none_or(|l| w.project_leader_id == Some(l) || w.id == l))
                    .into_iter()
                    .collect();
                query_response(workers_schema(), &workers, encode_worker)
            }
            Command::SelectWorkers {
                id: None,
                project_leader_id,
            } => {
                let workers = engine.list_workers(project_leader_id).await;
                query_response(workers_schema(), &workers, encode_worker)
            }

            // ── projects ──
            Command::InsertProject { project } => {
                engine.create_project(project).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateProject { id, patch } => {
                let current = engine
                    .get_project(id)
                    .ok_or(EngineError::NotFound(id))
                    .map_err(engine_err)?;
                engine
                    .update_project(patch.apply(current))
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteProject { id } => {
                engine.delete_project(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectProjects {
                id,
                project_leader_id,
                status,
            } => {
                let projects: Vec<Project> = match id {
                    Some(id) => engine
                        .get_project(id)
                        .filter(|p| project_leader_id.is_none_or(|l| p.project_leader_id == Some(l)))
                        .filter(|p| status.is_none_or(|s| p.status == s))
                        .into_iter()
                        .collect(),
                    None => engine.list_projects(project_leader_id, status),
                };
                query_response(projects_schema(), &projects, encode_project)
            }

            // ── assignments ──
            Command::InsertAssignment { assignment } => {
                engine
                    .create_assignment(
                        assignment.id,
                        assignment.project_id,
                        assignment.worker_id,
                        assignment.range,
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::BatchInsertAssignments { assignments } => {
                let count = assignments.len();
                engine
                    .batch_create_assignments(assignments)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(count)))
            }
            Command::UpdateAssignment { id, patch } => {
                let current = engine
                    .get_assignment(id)
                    .await
                    .ok_or(EngineError::NotFound(id))
                    .map_err(engine_err)?;
                let a = patch.apply(current);
                engine
                    .update_assignment(id, a.project_id, a.worker_id, a.range)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteAssignment { id } => {
                engine.delete_assignment(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectAssignments { filter } => {
                let assignments = match filter {
                    AssignmentFilter::Id(id) => engine.get_assignment(id).await.into_iter().collect(),
                    AssignmentFilter::Worker(worker_id) => engine.get_worker_assignments(worker_id).await,
                    AssignmentFilter::Project(project_id) => {
                        engine.get_project_assignments(project_id).await
                    }
                };
                query_response(assignments_schema(), &assignments, encode_assignment)
            }

            // ── calendar ──
            Command::SelectLanes {
                worker_id,
                project_leader_id,
                window,
            } => {
                let rows = match worker_id {
                    Some(worker_id) => engine.compute_worker_lanes(worker_id, window).await,
                    None => engine.compute_calendar(window, project_leader_id).await,
                }
                .map_err(engine_err)?;
                metrics::histogram!(observability::LANE_ROWS).record(rows.len() as f64);
                query_response(lanes_schema(), &rows, encode_lane_row)
            }
        }
    }
}

// ── Result schemas and row encoders ──────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn workers_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("name"),
        text_field("role"),
        text_field("project_leader_id"),
    ]
}

fn projects_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("name"),
        int_field("amount", Type::INT8),
        int_field("a_konto_percent", Type::INT4),
        text_field("billing_type"),
        text_field("status"),
        text_field("project_type"),
        text_field("project_leader_id"),
    ]
}

/// Dates travel as `YYYY-MM-DD` text.
fn assignments_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("project_id"),
        text_field("worker_id"),
        text_field("start_date"),
        text_field("end_date"),
    ]
}

fn lanes_schema() -> Vec<FieldInfo> {
    vec![
        text_field("worker_id"),
        text_field("assignment_id"),
        text_field("project_id"),
        text_field("start_date"),
        text_field("end_date"),
        int_field("lane", Type::INT4),
        int_field("total_lanes", Type::INT4),
    ]
}

fn encode_worker(encoder: &mut DataRowEncoder, w: &Worker) -> PgWireResult<()> {
    encoder.encode_field(&w.id.to_string())?;
    encoder.encode_field(&w.name)?;
    encoder.encode_field(&w.role.as_str().to_string())?;
    encoder.encode_field(&w.project_leader_id.map(|id| id.to_string()))?;
    Ok(())
}

fn encode_project(encoder: &mut DataRowEncoder, p: &Project) -> PgWireResult<()> {
    encoder.encode_field(&p.id.to_string())?;
    encoder.encode_field(&p.name)?;
    encoder.encode_field(&p.amount)?;
    encoder.encode_field(&i32::from(p.a_konto_percent))?;
    encoder.encode_field(&p.billing_type.as_str().to_string())?;
    encoder.encode_field(&p.status.as_str().to_string())?;
    encoder.encode_field(&p.project_type)?;
    encoder.encode_field(&p.project_leader_id.map(|id| id.to_string()))?;
    Ok(())
}

fn encode_assignment(encoder: &mut DataRowEncoder, a: &Assignment) -> PgWireResult<()> {
    encoder.encode_field(&a.id.to_string())?;
    encoder.encode_field(&a.project_id.to_string())?;
    encoder.encode_field(&a.worker_id.to_string())?;
    encoder.encode_field(&a.range.start.to_string())?;
    encoder.encode_field(&a.range.end.to_string())?;
    Ok(())
}

fn encode_lane_row(encoder: &mut DataRowEncoder, r: &LaneRow) -> PgWireResult<()> {
    encoder.encode_field(&r.worker_id.to_string())?;
    encoder.encode_field(&r.assignment_id.to_string())?;
    encoder.encode_field(&r.project_id.to_string())?;
    encoder.encode_field(&r.range.start.to_string())?;
    encoder.encode_field(&r.range.end.to_string())?;
    encoder.encode_field(&(r.lane as i32))?;
    encoder.encode_field(&(r.total_lanes as i32))?;
    Ok(())
}

fn query_response<T>(
    schema: Vec<FieldInfo>,
    items: &[T],
    encode: fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<DataRow>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

/// Result columns for a statement, judged from the table after `FROM`.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.trim_start().starts_with("SELECT") {
        return vec![];
    }
    let table = upper
        .split_once(" FROM ")
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .map(|t| t.trim_matches(|c| c == '"' || c == ';'));
    match table {
        Some("WORKERS") => workers_schema(),
        Some("PROJECTS") => projects_schema(),
        Some("ASSIGNMENTS") => assignments_schema(),
        Some("LANES") => lanes_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for BemanningHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        Ok(vec![self.run_sql(&engine, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct BemanningQueryParser;

#[async_trait]
impl QueryParser for BemanningQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for BemanningHandler {
    type Statement = String;
    type QueryParser = BemanningQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        self.run_sql(&engine, &sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Replace `$1`, `$2`, ... with bound values as quoted text. Highest index
/// first so `$1` never eats the front of `$10`.
fn substitute_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut result = sql.to_string();
    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct BemanningFactory {
    handler: Arc<BemanningHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<BemanningAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl BemanningFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = BemanningAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(BemanningHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for BemanningFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(BemanningFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM workers"), 0);
        assert_eq!(count_params("DELETE FROM workers WHERE id = $1"), 1);
        assert_eq!(
            count_params("INSERT INTO assignments VALUES ($1, $2, $3, $4, $5)"),
            5
        );
        assert_eq!(count_params("SELECT $12, $3"), 12);
    }

    #[test]
    fn substitutes_and_escapes() {
        let params = vec![Some(b"O'Brien".to_vec()), None];
        let sql = substitute_params(
            "UPDATE workers SET name = $1, project_leader_id = $2 WHERE id = 'x'",
            &params,
        );
        assert_eq!(
            sql,
            "UPDATE workers SET name = 'O''Brien', project_leader_id = NULL WHERE id = 'x'"
        );
    }

    #[test]
    fn result_schema_by_table() {
        assert_eq!(result_schema("SELECT * FROM lanes WHERE worker_id = $1").len(), 7);
        assert_eq!(result_schema("select * from workers").len(), 4);
        assert_eq!(result_schema("SELECT * FROM projects;").len(), 8);
        assert!(result_schema("DELETE FROM workers WHERE id = $1").is_empty());
    }
}
