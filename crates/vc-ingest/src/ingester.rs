use crate::source::{EventSource, SourceError, SourceEvent, SourceStartError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, warn};
use vc_core::event::Event;
use vc_core::time::{system_clock, Clock};
use vc_db::store::{sha256_hex, NewEvent, Store};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("ingestion cancelled")]
    Cancelled,
    #[error(transparent)]
    Start(#[from] SourceStartError),
}

/// Callback invoked synchronously once per freshly inserted event, in insert
/// order. Downstream fan-out (derive, hub, notifier) hangs off this hook.
pub type OnInsert = Box<dyn Fn(&Event) + Send>;

pub struct IngesterOptions {
    pub clock: Arc<dyn Clock>,
    pub on_insert: Option<OnInsert>,
}

impl Default for IngesterOptions {
    fn default() -> Self {
        Self {
            clock: system_clock(),
            on_insert: None,
        }
    }
}

/// Single pass from an [`EventSource`] into the store. Runs on one task;
/// a failed insert drops that event and the stream continues.
pub struct Ingester<S: EventSource> {
    source: S,
    store: Store,
    clock: Arc<dyn Clock>,
    on_insert: Option<OnInsert>,
}

impl<S: EventSource> Ingester<S> {
    pub fn new(source: S, store: Store, options: IngesterOptions) -> Self {
        Self {
            source,
            store,
            clock: options.clock,
            on_insert: options.on_insert,
        }
    }

    /// Drain the source until shutdown fires (returns `Cancelled`) or both
    /// source channels close (returns `Ok`). The two channels terminate in
    /// arbitrary order; each is flagged off independently so trailing items
    /// on the survivor are never lost.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), IngestError> {
        let (mut events, mut errors) = self.source.start(shutdown.clone()).await?;

        debug!("ingestion started");
        let mut events_open = true;
        let mut errors_open = true;

        while events_open || errors_open {
            tokio::select! {
                event = events.recv(), if events_open => match event {
                    Some(event) => self.handle_event(event),
                    None => events_open = false,
                },
                err = errors.recv(), if errors_open => match err {
                    Some(err) => self.handle_error(err),
                    None => errors_open = false,
                },
                _ = shutdown.changed() => {
                    debug!("ingestion cancelled");
                    return Err(IngestError::Cancelled);
                }
            }
        }

        debug!("ingestion source closed");
        Ok(())
    }

    fn handle_event(&self, source_event: SourceEvent) {
        let new_event = normalize(source_event, self.clock.as_ref());

        match self.store.insert_event(&new_event) {
            Ok((id, true)) => {
                let event = new_event.into_event(id);
                debug!(id, event_type = %event.event_type, "event inserted");
                if let Some(on_insert) = &self.on_insert {
                    on_insert(&event);
                }
            }
            Ok((_, false)) => {
                // Already seen; replay overlap is expected.
            }
            Err(err) => {
                error!(error = %err, event_type = %new_event.event_type, "failed to insert event");
            }
        }
    }

    fn handle_error(&self, err: SourceError) {
        match err {
            SourceError::Parse { line, cause } => {
                match self
                    .store
                    .insert_parse_failure(&line, &cause, self.clock.now())
                {
                    Ok(true) => debug!(line_length = line.len(), "parse failure recorded"),
                    Ok(false) => {}
                    Err(err) => error!(error = %err, "failed to insert parse failure"),
                }
            }
            SourceError::Io(message) => {
                warn!(error = %message, "source error");
            }
        }
    }
}

fn normalize(event: SourceEvent, clock: &dyn Clock) -> NewEvent {
    NewEvent {
        ts: event.ts,
        event_type: event.event_type,
        player_name: some_if_not_empty(event.player_name),
        player_id: some_if_not_empty(event.player_id),
        world_id: some_if_not_empty(event.world_id),
        world_name: some_if_not_empty(event.world_name),
        instance_id: some_if_not_empty(event.instance_id),
        meta_json: None,
        dedupe_key: sha256_hex(&event.raw_line),
        ingested_at: clock.now(),
    }
}

fn some_if_not_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
