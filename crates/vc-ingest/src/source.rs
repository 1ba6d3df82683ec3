use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use vc_core::event::EventType;

pub const DEFAULT_EVENT_BUFFER: usize = 64;
pub const DEFAULT_ERROR_BUFFER: usize = 16;

/// Raw parsed record from the log tail. `raw_line` must always be present;
/// the dedupe fingerprint is computed from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEvent {
    pub event_type: EventType,
    pub ts: DateTime<Utc>,
    pub player_name: String,
    pub player_id: String,
    pub world_id: String,
    pub world_name: String,
    pub instance_id: String,
    pub raw_line: String,
}

/// Non-fatal errors delivered on the source's error stream.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("parse error: {cause}")]
    Parse { line: String, cause: String },
    #[error("source io error: {0}")]
    Io(String),
}

/// Errors that prevent the source from starting at all.
#[derive(Debug, Error)]
pub enum SourceStartError {
    #[error("log directory not found: {0}")]
    LogDirNotFound(String),
    #[error("source start failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Producer of parsed log events. Both returned channels close when the
/// shutdown signal fires or the underlying input ends; they close
/// independently and the consumer must keep draining the other.
///
/// Implementations must never drop events on a full event channel (block
/// instead) and must never block on the error channel (drop with a counter).
#[async_trait]
pub trait EventSource: Send {
    async fn start(
        &mut self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<
        (mpsc::Receiver<SourceEvent>, mpsc::Receiver<SourceError>),
        SourceStartError,
    >;
}
