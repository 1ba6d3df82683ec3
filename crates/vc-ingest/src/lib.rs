pub mod ingester;
pub mod logwatch;
pub mod replay;
pub mod source;

pub use crate::ingester::{IngestError, Ingester, IngesterOptions};
pub use crate::logwatch::{LogDirSource, LogDirSourceConfig};
pub use crate::replay::calculate_replay_since;
pub use crate::source::{EventSource, SourceError, SourceEvent, SourceStartError};
