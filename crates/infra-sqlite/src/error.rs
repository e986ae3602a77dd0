// sqlx::Error -> AppError
//
// Orphan rules forbid `impl From<sqlx::Error> for AppError` here, so every
// query maps through this helper.

use courier_core::error::AppError;

/// Connection-level failures become `StoreUnavailable` (caller retries);
/// constraint and row errors become `Database`.
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            // SQLite error codes: https://www.sqlite.org/rescode.html
            match db_err.code().as_deref() {
                Some("2067") | Some("1555") => AppError::Database(format!(
                    "Unique constraint violation: {}",
                    db_err.message()
                )),
                Some("275") => AppError::Database(format!(
                    "Check constraint violation: {}",
                    db_err.message()
                )),
                // SQLITE_BUSY, SQLITE_LOCKED, SQLITE_BUSY_SNAPSHOT
                Some("5") | Some("6") | Some("517") => AppError::StoreUnavailable(format!(
                    "Database locked: {}",
                    db_err.message()
                )),
                // SQLITE_IOERR, SQLITE_FULL, SQLITE_CANTOPEN
                Some("10") | Some("13") | Some("14") => {
                    AppError::StoreUnavailable(format!("Database I/O: {}", db_err.message()))
                }
                Some(code) => {
                    AppError::Database(format!("Database error [{}]: {}", code, db_err.message()))
                }
                None => AppError::Database(format!("Database error: {}", db_err.message())),
            }
        }
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            AppError::Database(format!("Decode error: {}", err))
        }
        // Connection, pool, IO, protocol errors
        _ => AppError::StoreUnavailable(err.to_string()),
    }
}
