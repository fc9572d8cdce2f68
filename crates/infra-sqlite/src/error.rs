// sqlx::Error -> AppError mapping
//
// A helper rather than a From impl: orphan rules forbid implementing
// From<sqlx::Error> for AppError in this crate.

use conveyor_core::error::AppError;

pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code() {
            // SQLite result codes: https://www.sqlite.org/rescode.html
            Some(code) => match code.as_ref() {
                "2067" | "1555" => AppError::Broker(format!(
                    "Unique constraint violation: {} ({})",
                    db_err.message(),
                    code
                )),
                "5" => AppError::Broker(format!(
                    "Database locked (SQLITE_BUSY): {}",
                    db_err.message()
                )),
                "13" => AppError::Broker(format!("Database full: {}", db_err.message())),
                other => AppError::Broker(format!(
                    "Database error [{}]: {}",
                    other,
                    db_err.message()
                )),
            },
            None => AppError::Broker(format!("Database error: {}", db_err.message())),
        },
        sqlx::Error::RowNotFound => AppError::Broker("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => AppError::Broker(format!("Column not found: {}", col)),
        _ => AppError::Broker(err.to_string()),
    }
}
