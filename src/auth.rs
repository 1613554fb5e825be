use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};

use crate::observability;
use crate::tenant::wal_file_stem;

/// Single shared connection password, checked by pgwire's cleartext startup handler.
///
/// The database name picks the tenant, so a name that can never map to a
/// WAL file is refused here, before any query reaches the tenant manager.
#[derive(Debug)]
pub struct BemanningAuthSource {
    password: String,
}

impl BemanningAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for BemanningAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let database = login.database().unwrap_or("default");
        if let Err(e) = wal_file_stem(database) {
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
            tracing::warn!("refusing login to database {database:?}: {e}");
            return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                "FATAL".into(),
                "3D000".into(),
                format!("invalid database name: {e}"),
            ))));
        }
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
