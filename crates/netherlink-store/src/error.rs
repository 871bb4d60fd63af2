use netherlink_core::RelayError;
use rusqlite::ffi;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        table: &'static str,
        column: &'static str,
        detail: String,
    },

    #[error("IO error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl StoreError {
    /// Classify an insert failure: duplicate keys become `Conflict`, dangling
    /// references become `NotFound`.
    pub(crate) fn from_insert(e: rusqlite::Error, what: impl FnOnce() -> String) -> Self {
        if let rusqlite::Error::SqliteFailure(ref inner, _) = e {
            match inner.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    return StoreError::Conflict(what());
                }
                ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                    return StoreError::NotFound(what());
                }
                _ => {}
            }
        }
        e.into()
    }
}

impl From<StoreError> for RelayError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(msg) => RelayError::NotFound(msg),
            StoreError::Conflict(msg) => RelayError::Conflict(msg),
            other => RelayError::Store(other.to_string()),
        }
    }
}
