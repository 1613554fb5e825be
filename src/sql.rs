use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Partial worker update. `None` keeps the stored value.
#[derive(Debug, Default, PartialEq)]
pub struct WorkerPatch {
    pub name: Option<String>,
    pub role: Option<WorkerRole>,
    /// `Some(None)` clears the leader.
    pub project_leader_id: Option<Option<Ulid>>,
}

impl WorkerPatch {
    pub fn apply(self, mut worker: Worker) -> Worker {
        if let Some(name) = self.name {
            worker.name = name;
        }
        if let Some(role) = self.role {
            worker.role = role;
        }
        if let Some(leader) = self.project_leader_id {
            worker.project_leader_id = leader;
        }
        worker
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub amount: Option<i64>,
    pub a_konto_percent: Option<u8>,
    pub billing_type: Option<BillingType>,
    pub status: Option<ProjectStatus>,
    pub project_type: Option<Option<String>>,
    pub project_leader_id: Option<Option<Ulid>>,
}

impl ProjectPatch {
    pub fn apply(self, mut project: Project) -> Project {
        if let Some(name) = self.name {
            project.name = name;
        }
        if let Some(amount) = self.amount {
            project.amount = amount;
        }
        if let Some(pct) = self.a_konto_percent {
            project.a_konto_percent = pct;
        }
        if let Some(billing_type) = self.billing_type {
            project.billing_type = billing_type;
        }
        if let Some(status) = self.status {
            project.status = status;
        }
        if let Some(project_type) = self.project_type {
            project.project_type = project_type;
        }
        if let Some(leader) = self.project_leader_id {
            project.project_leader_id = leader;
        }
        project
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct AssignmentPatch {
    pub project_id: Option<Ulid>,
    pub worker_id: Option<Ulid>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl AssignmentPatch {
    /// The range is built unchecked; the engine rejects an inverted one.
    pub fn apply(self, mut assignment: Assignment) -> Assignment {
        if let Some(project_id) = self.project_id {
            assignment.project_id = project_id;
        }
        if let Some(worker_id) = self.worker_id {
            assignment.worker_id = worker_id;
        }
        if let Some(start) = self.start {
            assignment.range.start = start;
        }
        if let Some(end) = self.end {
            assignment.range.end = end;
        }
        assignment
    }
}

#[derive(Debug, PartialEq)]
pub enum AssignmentFilter {
    Id(Ulid),
    Worker(Ulid),
    Project(Ulid),
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertWorker {
        id: Ulid,
        name: String,
        role: WorkerRole,
        project_leader_id: Option<Ulid>,
    },
    UpdateWorker {
        id: Ulid,
        patch: WorkerPatch,
    },
    DeleteWorker {
        id: Ulid,
    },
    SelectWorkers {
        id: Option<Ulid>,
        project_leader_id: Option<Ulid>,
    },
    InsertProject {
        project: Project,
    },
    UpdateProject {
        id: Ulid,
        patch: ProjectPatch,
    },
    DeleteProject {
        id: Ulid,
    },
    SelectProjects {
        id: Option<Ulid>,
        project_leader_id: Option<Ulid>,
        status: Option<ProjectStatus>,
    },
    InsertAssignment {
        assignment: Assignment,
    },
    BatchInsertAssignments {
        assignments: Vec<Assignment>,
    },
    UpdateAssignment {
        id: Ulid,
        patch: AssignmentPatch,
    },
    DeleteAssignment {
        id: Ulid,
    },
    SelectAssignments {
        filter: AssignmentFilter,
    },
    /// One worker's row, one leader's team, or everyone.
    SelectLanes {
        worker_id: Option<Ulid>,
        project_leader_id: Option<Ulid>,
        window: DateRange,
    },
}

const WORKER_COLUMNS: &[&str] = &["id", "name", "role", "project_leader_id"];
const PROJECT_COLUMNS: &[&str] = &[
    "id",
    "name",
    "amount",
    "a_konto_percent",
    "billing_type",
    "status",
    "project_type",
    "project_leader_id",
];
const ASSIGNMENT_COLUMNS: &[&str] = &["id", "project_id", "worker_id", "start_date", "end_date"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    match table.as_str() {
        "workers" => {
            let row = single_row(insert, "workers", WORKER_COLUMNS)?;
            Ok(Command::InsertWorker {
                id: parse_ulid(row.required("id")?)?,
                name: parse_string(row.required("name")?)?,
                role: parse_role(row.required("role")?)?,
                project_leader_id: row.optional("project_leader_id").map_or(Ok(None), parse_ulid_or_null)?,
            })
        }
        "projects" => {
            let row = single_row(insert, "projects", PROJECT_COLUMNS)?;
            Ok(Command::InsertProject {
                project: Project {
                    id: parse_ulid(row.required("id")?)?,
                    name: parse_string(row.required("name")?)?,
                    amount: parse_i64(row.required("amount")?)?,
                    a_konto_percent: parse_percent(row.required("a_konto_percent")?)?,
                    billing_type: parse_billing_type(row.required("billing_type")?)?,
                    status: parse_status(row.required("status")?)?,
                    project_type: row.optional("project_type").map_or(Ok(None), parse_string_or_null)?,
                    project_leader_id: row.optional("project_leader_id").map_or(Ok(None), parse_ulid_or_null)?,
                },
            })
        }
        "assignments" => {
            let rows = named_rows(insert, "assignments", ASSIGNMENT_COLUMNS)?;
            let mut assignments = Vec::with_capacity(rows.len());
            for (i, row) in rows.iter().enumerate() {
                let assignment = parse_assignment_row(row)
                    .map_err(|e| if rows.len() > 1 { SqlError::Parse(format!("row {i}: {e}")) } else { e })?;
                assignments.push(assignment);
            }
            if assignments.len() == 1 {
                Ok(Command::InsertAssignment { assignment: assignments[0] })
            } else {
                Ok(Command::BatchInsertAssignments { assignments })
            }
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_assignment_row(row: &Row) -> Result<Assignment, SqlError> {
    Ok(Assignment {
        id: parse_ulid(row.required("id")?)?,
        project_id: parse_ulid(row.required("project_id")?)?,
        worker_id: parse_ulid(row.required("worker_id")?)?,
        range: DateRange {
            start: parse_date(row.required("start_date")?)?,
            end: parse_date(row.required("end_date")?)?,
        },
    })
}

/// One INSERT row with its values keyed by column name. Without an explicit
/// column list, values are taken in the table's declared column order.
struct Row {
    table: &'static str,
    values: Vec<(String, Expr)>,
}

impl Row {
    fn optional(&self, column: &str) -> Option<&Expr> {
        self.values.iter().find(|(c, _)| c == column).map(|(_, e)| e)
    }

    fn required(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.optional(column)
            .ok_or(SqlError::MissingColumn(self.table, column))
    }
}

fn named_rows(
    insert: &ast::Insert,
    table: &'static str,
    declared: &[&str],
) -> Result<Vec<Row>, SqlError> {
    let columns: Vec<String> = if insert.columns.is_empty() {
        declared.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    for column in &columns {
        if !declared.contains(&column.as_str()) {
            return Err(SqlError::UnknownColumn(table, column.clone()));
        }
    }

    extract_all_insert_rows(insert)?
        .into_iter()
        .map(|values| {
            if values.len() > columns.len() {
                return Err(SqlError::WrongArity(table, columns.len(), values.len()));
            }
            Ok(Row {
                table,
                values: columns.iter().cloned().zip(values).collect(),
            })
        })
        .collect()
}

fn single_row(insert: &ast::Insert, table: &'static str, declared: &[&str]) -> Result<Row, SqlError> {
    let mut rows = named_rows(insert, table, declared)?;
    if rows.len() != 1 {
        return Err(SqlError::Unsupported(format!("multi-row INSERT into {table}")));
    }
    Ok(rows.remove(0))
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;
    let mut sets = Vec::with_capacity(assignments.len());
    for a in assignments {
        let column = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        sets.push((column, &a.value));
    }

    match table.as_str() {
        "workers" => {
            let mut patch = WorkerPatch::default();
            for (column, value) in sets {
                match column.as_str() {
                    "name" => patch.name = Some(parse_string(value)?),
                    "role" => patch.role = Some(parse_role(value)?),
                    "project_leader_id" => patch.project_leader_id = Some(parse_ulid_or_null(value)?),
                    _ => return Err(SqlError::UnknownColumn("workers", column)),
                }
            }
            Ok(Command::UpdateWorker { id, patch })
        }
        "projects" => {
            let mut patch = ProjectPatch::default();
            for (column, value) in sets {
                match column.as_str() {
                    "name" => patch.name = Some(parse_string(value)?),
                    "amount" => patch.amount = Some(parse_i64(value)?),
                    "a_konto_percent" => patch.a_konto_percent = Some(parse_percent(value)?),
                    "billing_type" => patch.billing_type = Some(parse_billing_type(value)?),
                    "status" => patch.status = Some(parse_status(value)?),
                    "project_type" => patch.project_type = Some(parse_string_or_null(value)?),
                    "project_leader_id" => patch.project_leader_id = Some(parse_ulid_or_null(value)?),
                    _ => return Err(SqlError::UnknownColumn("projects", column)),
                }
            }
            Ok(Command::UpdateProject { id, patch })
        }
        "assignments" => {
            let mut patch = AssignmentPatch::default();
            for (column, value) in sets {
                match column.as_str() {
                    "project_id" => patch.project_id = Some(parse_ulid(value)?),
                    "worker_id" => patch.worker_id = Some(parse_ulid(value)?),
                    "start_date" => patch.start = Some(parse_date(value)?),
                    "end_date" => patch.end = Some(parse_date(value)?),
                    _ => return Err(SqlError::UnknownColumn("assignments", column)),
                }
            }
            Ok(Command::UpdateAssignment { id, patch })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "workers" => Ok(Command::DeleteWorker { id }),
        "projects" => Ok(Command::DeleteProject { id }),
        "assignments" => Ok(Command::DeleteAssignment { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

/// One `column op value` term of an AND-only WHERE clause.
struct Filter<'a> {
    column: String,
    op: FilterOp,
    value: &'a Expr,
}

#[derive(Clone, Copy, PartialEq)]
enum FilterOp {
    Eq,
    GtEq,
    LtEq,
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "workers" => {
            let (mut id, mut project_leader_id) = (None, None);
            for f in filters {
                match (f.column.as_str(), f.op) {
                    ("id", FilterOp::Eq) => id = Some(parse_ulid(f.value)?),
                    ("project_leader_id", FilterOp::Eq) => project_leader_id = Some(parse_ulid(f.value)?),
                    _ => return Err(SqlError::UnknownColumn("workers", f.column)),
                }
            }
            Ok(Command::SelectWorkers { id, project_leader_id })
        }
        "projects" => {
            let (mut id, mut project_leader_id, mut status) = (None, None, None);
            for f in filters {
                match (f.column.as_str(), f.op) {
                    ("id", FilterOp::Eq) => id = Some(parse_ulid(f.value)?),
                    ("project_leader_id", FilterOp::Eq) => project_leader_id = Some(parse_ulid(f.value)?),
                    ("status", FilterOp::Eq) => status = Some(parse_status(f.value)?),
                    _ => return Err(SqlError::UnknownColumn("projects", f.column)),
                }
            }
            Ok(Command::SelectProjects { id, project_leader_id, status })
        }
        "assignments" => {
            let mut filter = None;
            for f in filters {
                let parsed = match (f.column.as_str(), f.op) {
                    ("id", FilterOp::Eq) => AssignmentFilter::Id(parse_ulid(f.value)?),
                    ("worker_id", FilterOp::Eq) => AssignmentFilter::Worker(parse_ulid(f.value)?),
                    ("project_id", FilterOp::Eq) => AssignmentFilter::Project(parse_ulid(f.value)?),
                    _ => return Err(SqlError::UnknownColumn("assignments", f.column)),
                };
                if filter.replace(parsed).is_some() {
                    return Err(SqlError::Unsupported(
                        "assignments: filter on exactly one of id, worker_id, project_id".into(),
                    ));
                }
            }
            Ok(Command::SelectAssignments {
                filter: filter.ok_or(SqlError::MissingFilter("worker_id or project_id"))?,
            })
        }
        "lanes" => {
            let (mut worker_id, mut project_leader_id, mut start, mut end) = (None, None, None, None);
            for f in filters {
                match (f.column.as_str(), f.op) {
                    ("worker_id", FilterOp::Eq) => worker_id = Some(parse_ulid(f.value)?),
                    ("project_leader_id", FilterOp::Eq) => project_leader_id = Some(parse_ulid(f.value)?),
                    ("start_date", FilterOp::GtEq) => start = Some(parse_date(f.value)?),
                    ("end_date", FilterOp::LtEq) => end = Some(parse_date(f.value)?),
                    _ => return Err(SqlError::UnknownColumn("lanes", f.column)),
                }
            }
            if worker_id.is_some() && project_leader_id.is_some() {
                return Err(SqlError::Unsupported(
                    "lanes: filter by worker_id or project_leader_id, not both".into(),
                ));
            }
            Ok(Command::SelectLanes {
                worker_id,
                project_leader_id,
                window: DateRange {
                    start: start.ok_or(SqlError::MissingFilter("start_date"))?,
                    end: end.ok_or(SqlError::MissingFilter("end_date"))?,
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn collect_filters<'a>(expr: &'a Expr, out: &mut Vec<Filter<'a>>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, out),
        Expr::BinaryOp { left, op, right } => {
            let op = match op {
                ast::BinaryOperator::And => {
                    collect_filters(left, out)?;
                    return collect_filters(right, out);
                }
                ast::BinaryOperator::Eq => FilterOp::Eq,
                ast::BinaryOperator::GtEq => FilterOp::GtEq,
                ast::BinaryOperator::LtEq => FilterOp::LtEq,
                other => return Err(SqlError::Unsupported(format!("operator {other}"))),
            };
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
            out.push(Filter { column, op, value: right });
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid(right),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

/// Quoted string or bare number, as text.
fn value_text(expr: &Expr) -> Result<&str, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(s),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = value_text(expr)?;
    Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID '{s}': {e}")))
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_ulid(expr).map(Some)
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return parse_i64(expr)?
            .checked_neg()
            .ok_or_else(|| SqlError::Parse("i64 overflow".into()));
    }
    let s = value_text(expr)?;
    s.trim()
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad integer '{s}': {e}")))
}

fn parse_percent(expr: &Expr) -> Result<u8, SqlError> {
    let v = parse_i64(expr)?;
    u8::try_from(v).map_err(|_| SqlError::Parse(format!("{v} is not a percentage")))
}

/// `'YYYY-MM-DD'`.
fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = value_text(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date '{s}': {e}")))
}

fn parse_role(expr: &Expr) -> Result<WorkerRole, SqlError> {
    let s = value_text(expr)?;
    WorkerRole::parse(s).ok_or_else(|| SqlError::Parse(format!("bad role '{s}'")))
}

fn parse_billing_type(expr: &Expr) -> Result<BillingType, SqlError> {
    let s = value_text(expr)?;
    BillingType::parse(s).ok_or_else(|| SqlError::Parse(format!("bad billing type '{s}'")))
}

fn parse_status(expr: &Expr) -> Result<ProjectStatus, SqlError> {
    let s = value_text(expr)?;
    ProjectStatus::parse(s).ok_or_else(|| SqlError::Parse(format!("bad status '{s}'")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    MissingColumn(&'static str, &'static str),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing value for {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at most {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::day;

    const A: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const B: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";
    const C: &str = "01BX5ZZKBKACTAV9WEVGEMMVS0";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    #[test]
    fn parse_insert_worker() {
        let sql = format!("INSERT INTO workers (id, name, role) VALUES ('{A}', 'Ola Nordmann', 'worker')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertWorker {
                id: ulid(A),
                name: "Ola Nordmann".into(),
                role: WorkerRole::Worker,
                project_leader_id: None,
            }
        );
    }

    #[test]
    fn parse_insert_worker_with_leader_positional() {
        let sql = format!("INSERT INTO workers VALUES ('{A}', 'Kari', 'worker', '{B}')");
        match parse_sql(&sql).unwrap() {
            Command::InsertWorker { project_leader_id, .. } => {
                assert_eq!(project_leader_id, Some(ulid(B)));
            }
            cmd => panic!("expected InsertWorker, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_worker_columns_in_any_order() {
        let sql = format!(
            "INSERT INTO workers (role, project_leader_id, name, id) VALUES ('project-leader', NULL, 'Siri', '{A}')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertWorker { id, name, role, project_leader_id } => {
                assert_eq!(id, ulid(A));
                assert_eq!(name, "Siri");
                assert_eq!(role, WorkerRole::ProjectLeader);
                assert_eq!(project_leader_id, None);
            }
            cmd => panic!("expected InsertWorker, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_worker_bad_role() {
        let sql = format!("INSERT INTO workers (id, name, role) VALUES ('{A}', 'Ola', 'boss')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_insert_worker_missing_name() {
        let sql = format!("INSERT INTO workers (id, role) VALUES ('{A}', 'worker')");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingColumn("workers", "name"))
        ));
    }

    #[test]
    fn parse_insert_project() {
        let sql = format!(
            "INSERT INTO projects (id, name, amount, a_konto_percent, billing_type, status, project_type, project_leader_id) \
             VALUES ('{A}', 'Tilbygg', 1200000, 30, 'a-konto', 'active', 'renovation', '{B}')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertProject { project } => {
                assert_eq!(project.id, ulid(A));
                assert_eq!(project.amount, 1_200_000);
                assert_eq!(project.a_konto_percent, 30);
                assert_eq!(project.billing_type, BillingType::AKonto);
                assert_eq!(project.status, ProjectStatus::Active);
                assert_eq!(project.project_type.as_deref(), Some("renovation"));
                assert_eq!(project.project_leader_id, Some(ulid(B)));
            }
            cmd => panic!("expected InsertProject, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_project_percent_out_of_range() {
        let sql = format!(
            "INSERT INTO projects (id, name, amount, a_konto_percent, billing_type, status) \
             VALUES ('{A}', 'X', 1, 300, 'manual', 'planned')"
        );
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_insert_assignment() {
        let sql = format!(
            "INSERT INTO assignments (id, project_id, worker_id, start_date, end_date) \
             VALUES ('{A}', '{B}', '{C}', '2024-01-01', '2024-01-05')"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertAssignment {
                assignment: Assignment {
                    id: ulid(A),
                    project_id: ulid(B),
                    worker_id: ulid(C),
                    range: DateRange::new(day("2024-01-01"), day("2024-01-05")),
                }
            }
        );
    }

    #[test]
    fn parse_insert_assignment_keeps_inverted_range_for_engine() {
        let sql = format!(
            "INSERT INTO assignments VALUES ('{A}', '{B}', '{C}', '2024-02-01', '2024-01-01')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertAssignment { assignment } => {
                assert!(assignment.range.start > assignment.range.end);
            }
            cmd => panic!("expected InsertAssignment, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_assignment_bad_date() {
        let sql = format!(
            "INSERT INTO assignments VALUES ('{A}', '{B}', '{C}', '2024-13-01', '2024-12-01')"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_batch_insert_assignments() {
        let sql = format!(
            "INSERT INTO assignments (id, project_id, worker_id, start_date, end_date) VALUES \
             ('{A}', '{B}', '{C}', '2024-01-01', '2024-01-05'), \
             ('{B}', '{B}', '{C}', '2024-01-03', '2024-01-08')"
        );
        match parse_sql(&sql).unwrap() {
            Command::BatchInsertAssignments { assignments } => {
                assert_eq!(assignments.len(), 2);
                assert_eq!(assignments[0].id, ulid(A));
                assert_eq!(assignments[1].range.start, day("2024-01-03"));
            }
            cmd => panic!("expected BatchInsertAssignments, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_batch_error_names_row() {
        let sql = format!(
            "INSERT INTO assignments VALUES \
             ('{A}', '{B}', '{C}', '2024-01-01', '2024-01-05'), \
             ('{B}', '{B}', '{C}', 'soon', '2024-01-08')"
        );
        let err = parse_sql(&sql).unwrap_err();
        assert!(err.to_string().contains("row 1"), "{err}");
    }

    #[test]
    fn parse_update_worker_partial() {
        let sql = format!("UPDATE workers SET name = 'Ola N.', project_leader_id = NULL WHERE id = '{A}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateWorker {
                id: ulid(A),
                patch: WorkerPatch {
                    name: Some("Ola N.".into()),
                    role: None,
                    project_leader_id: Some(None),
                },
            }
        );
    }

    #[test]
    fn parse_update_project_status() {
        let sql = format!("UPDATE projects SET status = 'completed', amount = 5 WHERE id = '{A}'");
        match parse_sql(&sql).unwrap() {
            Command::UpdateProject { id, patch } => {
                assert_eq!(id, ulid(A));
                assert_eq!(patch.status, Some(ProjectStatus::Completed));
                assert_eq!(patch.amount, Some(5));
                assert_eq!(patch.name, None);
            }
            cmd => panic!("expected UpdateProject, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_assignment_move() {
        let sql = format!(
            "UPDATE assignments SET worker_id = '{B}', end_date = '2024-03-01' WHERE id = '{A}'"
        );
        match parse_sql(&sql).unwrap() {
            Command::UpdateAssignment { id, patch } => {
                assert_eq!(id, ulid(A));
                assert_eq!(patch.worker_id, Some(ulid(B)));
                assert_eq!(patch.end, Some(day("2024-03-01")));
                assert_eq!(patch.start, None);
            }
            cmd => panic!("expected UpdateAssignment, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_requires_id() {
        assert!(matches!(
            parse_sql("UPDATE workers SET name = 'x'"),
            Err(SqlError::MissingFilter("id"))
        ));
    }

    #[test]
    fn parse_update_unknown_column() {
        let sql = format!("UPDATE workers SET salary = 1 WHERE id = '{A}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn("workers", _))));
    }

    #[test]
    fn parse_deletes() {
        let cases = [
            ("workers", Command::DeleteWorker { id: ulid(A) }),
            ("projects", Command::DeleteProject { id: ulid(A) }),
            ("assignments", Command::DeleteAssignment { id: ulid(A) }),
        ];
        for (table, expected) in cases {
            let sql = format!("DELETE FROM {table} WHERE id = '{A}'");
            assert_eq!(parse_sql(&sql).unwrap(), expected);
        }
    }

    #[test]
    fn parse_select_workers() {
        assert_eq!(
            parse_sql("SELECT * FROM workers").unwrap(),
            Command::SelectWorkers { id: None, project_leader_id: None }
        );
        let sql = format!("SELECT * FROM workers WHERE project_leader_id = '{B}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectWorkers { id: None, project_leader_id: Some(ulid(B)) }
        );
    }

    #[test]
    fn parse_select_projects_filters() {
        let sql = format!("SELECT * FROM projects WHERE project_leader_id = '{B}' AND status = 'active'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectProjects {
                id: None,
                project_leader_id: Some(ulid(B)),
                status: Some(ProjectStatus::Active),
            }
        );
    }

    #[test]
    fn parse_select_assignments() {
        let sql = format!("SELECT * FROM assignments WHERE worker_id = '{C}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAssignments { filter: AssignmentFilter::Worker(ulid(C)) }
        );
        let sql = format!("SELECT * FROM assignments WHERE project_id = '{B}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAssignments { filter: AssignmentFilter::Project(ulid(B)) }
        );
        assert!(matches!(
            parse_sql("SELECT * FROM assignments"),
            Err(SqlError::MissingFilter(_))
        ));
    }

    #[test]
    fn parse_select_lanes_for_worker() {
        let sql = format!(
            "SELECT * FROM lanes WHERE worker_id = '{C}' AND start_date >= '2024-01-01' AND end_date <= '2024-01-31'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectLanes {
                worker_id: Some(ulid(C)),
                project_leader_id: None,
                window: DateRange::new(day("2024-01-01"), day("2024-01-31")),
            }
        );
    }

    #[test]
    fn parse_select_lanes_for_team() {
        let sql = format!(
            "SELECT * FROM lanes WHERE (project_leader_id = '{B}') AND start_date >= '2024-06-01' AND end_date <= '2024-06-30'"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectLanes { worker_id, project_leader_id, .. } => {
                assert_eq!(worker_id, None);
                assert_eq!(project_leader_id, Some(ulid(B)));
            }
            cmd => panic!("expected SelectLanes, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_lanes_requires_window() {
        let sql = format!("SELECT * FROM lanes WHERE worker_id = '{C}' AND start_date >= '2024-01-01'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("end_date"))));
    }

    #[test]
    fn parse_select_lanes_rejects_or() {
        let sql = "SELECT * FROM lanes WHERE start_date >= '2024-01-01' OR end_date <= '2024-01-31'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn quoted_numbers_accepted() {
        let sql = format!(
            "INSERT INTO projects VALUES ('{A}', 'X', '-500', '10', 'manual', 'planned', NULL, NULL)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertProject { project } => {
                assert_eq!(project.amount, -500);
                assert_eq!(project.a_konto_percent, 10);
            }
            cmd => panic!("expected InsertProject, got {cmd:?}"),
        }
    }

    #[test]
    fn patches_apply_only_set_fields() {
        let worker = Worker {
            id: ulid(A),
            name: "Ola".into(),
            role: WorkerRole::Worker,
            project_leader_id: Some(ulid(B)),
        };
        let patched = WorkerPatch { role: Some(WorkerRole::ProjectLeader), ..Default::default() }
            .apply(worker.clone());
        assert_eq!(patched.name, "Ola");
        assert_eq!(patched.role, WorkerRole::ProjectLeader);
        assert_eq!(patched.project_leader_id, Some(ulid(B)));

        let assignment = Assignment {
            id: ulid(A),
            project_id: ulid(B),
            worker_id: ulid(C),
            range: DateRange::new(day("2024-01-01"), day("2024-01-05")),
        };
        let moved = AssignmentPatch { start: Some(day("2024-01-02")), ..Default::default() }
            .apply(assignment);
        assert_eq!(moved.range, DateRange::new(day("2024-01-02"), day("2024-01-05")));
        assert_eq!(moved.worker_id, ulid(C));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{A}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
