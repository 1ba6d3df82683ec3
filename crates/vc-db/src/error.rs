use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid event: {reason}")]
    InvalidEvent { reason: &'static str },
    #[error("invalid cursor: {reason}")]
    InvalidCursor { reason: &'static str },
    #[error("corrupt timestamp in column {column}: {value}")]
    CorruptTimestamp { column: &'static str, value: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn is_invalid_cursor(&self) -> bool {
        matches!(self, StoreError::InvalidCursor { .. })
    }
}
