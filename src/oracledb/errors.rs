// ABOUTME: Maps Oracle error codes onto the capture error taxonomy
// ABOUTME: Snapshot-too-old is a consistency failure, missing objects during fetch are schema drift

use crate::error::CaptureError;

/// How an Oracle error code should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Consistency,
    SchemaDrift,
    Configuration,
    Cancelled,
    Transient,
}

/// Classify an `ORA-` error code.
///
/// Missing columns or tables only mean schema drift while fetching rows of an
/// already discovered table; elsewhere they are configuration problems.
pub fn classify_code(code: i32, during_fetch: bool) -> ErrorClass {
    match code {
        // snapshot too old, specified SCN/timestamp no longer valid,
        // invalid lower limit snapshot expression
        1555 | 8180 | 8181 | 30052 => ErrorClass::Consistency,
        // invalid identifier, table or view does not exist
        904 | 942 if during_fetch => ErrorClass::SchemaDrift,
        904 | 942 => ErrorClass::Configuration,
        // invalid credentials, insufficient privileges, no CREATE SESSION, locked account
        1017 | 1031 | 1045 | 28000 => ErrorClass::Configuration,
        1013 => ErrorClass::Cancelled,
        _ => ErrorClass::Transient,
    }
}

pub fn error_code(err: &oracle::Error) -> Option<i32> {
    match err {
        oracle::Error::OciError(db) | oracle::Error::DpiError(db) => Some(db.code()),
        _ => None,
    }
}

/// Convert a driver error raised while working on `table` (empty when none).
pub fn classify(err: oracle::Error, table: &str, during_fetch: bool) -> CaptureError {
    let message = err.to_string();
    let class = match error_code(&err) {
        Some(code) => classify_code(code, during_fetch),
        // Non-database errors come from the driver itself (type conversion,
        // pool exhaustion) and are retried.
        None => ErrorClass::Transient,
    };

    match class {
        ErrorClass::Consistency => CaptureError::consistency(table, message),
        ErrorClass::SchemaDrift => CaptureError::schema_drift(table, message),
        ErrorClass::Configuration if table.is_empty() => CaptureError::configuration(message),
        ErrorClass::Configuration => {
            CaptureError::configuration(format!("{}: {}", table, message))
        }
        ErrorClass::Cancelled => CaptureError::Cancelled,
        ErrorClass::Transient if table.is_empty() => CaptureError::transient(message),
        ErrorClass::Transient => CaptureError::transient(format!("{}: {}", table, message)),
    }
}
