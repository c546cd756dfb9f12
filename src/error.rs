// ABOUTME: Error taxonomy for flashback capture - configuration, transient, consistency, drift
// ABOUTME: Each error maps to an ErrorKind that tells the driver whether to retry, pause, or stop

use thiserror::Error;

/// How the driver must react to a failed fetch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operator must fix something; the table's session stops.
    Fatal,
    /// Retry the same chunk or window with backoff. State is unchanged.
    Retryable,
    /// Pause the table's session and re-discover it on the next cycle.
    Disruptive,
    /// Shutdown was requested while the call was in flight.
    Cancelled,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transient database error: {0}")]
    Transient(String),

    /// Flashback data needed for a read is no longer retained.
    #[error("consistency violation on {table}: {message}")]
    Consistency { table: String, message: String },

    #[error("schema drift on {table}: {message}")]
    SchemaDrift { table: String, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CaptureError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn consistency(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Consistency {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn schema_drift(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaDrift {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CaptureError::Configuration(_) | CaptureError::Consistency { .. } => ErrorKind::Fatal,
            CaptureError::SchemaDrift { .. } => ErrorKind::Disruptive,
            CaptureError::Cancelled => ErrorKind::Cancelled,
            // A failed sink write or state save is retried like a dropped connection
            CaptureError::Transient(_) | CaptureError::Io(_) => ErrorKind::Retryable,
            CaptureError::Serialization(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }

    /// Attach the table name to errors raised below the table-aware layers.
    pub fn for_table(self, table: &str) -> Self {
        match self {
            CaptureError::Consistency { table: t, message } if t.is_empty() => {
                CaptureError::consistency(table, message)
            }
            CaptureError::SchemaDrift { table: t, message } if t.is_empty() => {
                CaptureError::schema_drift(table, message)
            }
            other => other,
        }
    }
}

pub type Result<T, E = CaptureError> = std::result::Result<T, E>;
