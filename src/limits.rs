//! Hard caps that keep one tenant from exhausting the server.

use chrono::NaiveDate;

pub const MAX_WORKERS_PER_TENANT: usize = 10_000;
pub const MAX_PROJECTS_PER_TENANT: usize = 50_000;
pub const MAX_ASSIGNMENTS_PER_WORKER: usize = 10_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_PROJECT_TYPE_LEN: usize = 64;

/// Widest single assignment, in days (ten years).
pub const MAX_ASSIGNMENT_DAYS: i64 = 3_660;
/// Widest calendar window a lane query may ask for, in days.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 366;

pub const MAX_BATCH_SIZE: usize = 1_000;

pub const MAX_TENANTS: usize = 1_024;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub fn min_valid_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(NaiveDate::MIN)
}

pub fn max_valid_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(9999, 12, 31).unwrap_or(NaiveDate::MAX)
}
