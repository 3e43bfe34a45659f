use crate::backend::Database;
use crate::error::DbError;
use sqlbench_core::Engine;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

const SQLITE_DDL: &str = "CREATE TABLE IF NOT EXISTS kv (k TEXT NOT NULL, v BLOB);
CREATE UNIQUE INDEX IF NOT EXISTS kv_k ON kv(k);";

// NOTE: Bytewise collation keeps key order identical to the other engines.
const POSTGRES_DDL: &str = "CREATE TABLE IF NOT EXISTS kv (k TEXT COLLATE \"C\" NOT NULL, v BYTEA);
CREATE UNIQUE INDEX IF NOT EXISTS kv_k ON kv(k);";

pub fn ddl(engine: Engine) -> &'static str {
    match engine {
        Engine::Sqlite => SQLITE_DDL,
        Engine::Postgres => POSTGRES_DDL,
        Engine::Memory => "",
    }
}

/// Creates the `kv` table and its unique key index. Safe to run repeatedly.
#[instrument(name = "schema", skip_all, fields(engine = %db.engine()))]
pub async fn init(db: &dyn Database) -> Result<(), DbError> {
    let ddl = ddl(db.engine());
    if ddl.is_empty() {
        return Ok(());
    }
    db.execute_batch(ddl).await?;
    debug!("Schema ready");
    Ok(())
}
