use crate::source::{
    EventSource, SourceError, SourceEvent, SourceStartError, DEFAULT_ERROR_BUFFER,
    DEFAULT_EVENT_BUFFER,
};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use vc_core::event::EventType;

const DIR_POLL_INTERVAL: Duration = Duration::from_secs(2);
const TAIL_POLL_INTERVAL: Duration = Duration::from_millis(500);
const LOG_FILE_PREFIX: &str = "output_log_";
const LOG_FILE_SUFFIX: &str = ".txt";
const LINE_TIME_FORMAT: &str = "%Y.%m.%d %H:%M:%S";
const BEHAVIOUR_MARKER: &str = "[Behaviour] ";

/// Configuration for the log-directory source.
#[derive(Debug, Clone)]
pub struct LogDirSourceConfig {
    /// Emit only events dated at or after this instant.
    pub replay_since: DateTime<Utc>,
    /// Explicit log directory. None auto-detects the game's default.
    pub log_dir: Option<PathBuf>,
    /// Wait for the directory to appear instead of failing fast. Defaults to
    /// wait when auto-detecting and fail-fast when a directory was given.
    pub wait_for_logs: Option<bool>,
    pub event_buffer: usize,
    pub error_buffer: usize,
}

impl LogDirSourceConfig {
    pub fn new(replay_since: DateTime<Utc>) -> Self {
        Self {
            replay_since,
            log_dir: None,
            wait_for_logs: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
            error_buffer: DEFAULT_ERROR_BUFFER,
        }
    }
}

/// Tails the newest session log in the game's log directory, parsing
/// join/leave/world lines into [`SourceEvent`]s. Rotation to a newer session
/// file is picked up automatically.
pub struct LogDirSource {
    config: LogDirSourceConfig,
}

impl LogDirSource {
    pub fn new(config: LogDirSourceConfig) -> Self {
        let mut config = config;
        if config.event_buffer < 1 {
            config.event_buffer = 1;
        }
        if config.error_buffer < 1 {
            config.error_buffer = 1;
        }
        Self { config }
    }
}

fn default_log_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("AppData")
        .join("LocalLow")
        .join("VRChat")
        .join("VRChat")
}

#[async_trait]
impl EventSource for LogDirSource {
    async fn start(
        &mut self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<
        (mpsc::Receiver<SourceEvent>, mpsc::Receiver<SourceError>),
        SourceStartError,
    > {
        let explicit = self.config.log_dir.is_some();
        let dir = self
            .config
            .log_dir
            .clone()
            .unwrap_or_else(default_log_dir);
        let wait = self.config.wait_for_logs.unwrap_or(!explicit);

        if !dir.is_dir() && !wait {
            return Err(SourceStartError::LogDirNotFound(
                dir.display().to_string(),
            ));
        }

        let (event_tx, event_rx) = mpsc::channel(self.config.event_buffer);
        let (err_tx, err_rx) = mpsc::channel(self.config.error_buffer);
        let replay_since = self.config.replay_since;

        tokio::spawn(tail_loop(dir, replay_since, event_tx, err_tx, shutdown));

        Ok((event_rx, err_rx))
    }
}

async fn tail_loop(
    dir: PathBuf,
    replay_since: DateTime<Utc>,
    event_tx: mpsc::Sender<SourceEvent>,
    err_tx: mpsc::Sender<SourceError>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut dropped_errors: u64 = 0;

    // Wait for the directory when the game has not started yet.
    while !dir.is_dir() {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(DIR_POLL_INTERVAL) => {}
        }
    }

    let mut current: Option<PathBuf> = None;
    let mut reader: Option<BufReader<tokio::fs::File>> = None;
    let mut parser = LineParser::new(replay_since);
    let mut at_eof = false;

    loop {
        if *shutdown.borrow() {
            break;
        }

        // Rotation is only checked while idle, not per line, so replaying a
        // large session file stays a straight read.
        if reader.is_none() || at_eof {
            match newest_log_file(&dir) {
                Some(path) if Some(&path) != current.as_ref() => {
                    info!(path = %path.display(), "tailing log file");
                    match tokio::fs::File::open(&path).await {
                        Ok(file) => {
                            current = Some(path);
                            reader = Some(BufReader::new(file));
                            parser.reset_session();
                        }
                        Err(err) => {
                            push_error(
                                &err_tx,
                                SourceError::Io(format!("open log file: {err}")),
                                &mut dropped_errors,
                            );
                        }
                    }
                }
                _ => {}
            }
            at_eof = false;
        }

        let Some(active) = reader.as_mut() else {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(DIR_POLL_INTERVAL) => continue,
            }
        };

        let mut line = String::new();
        match active.read_line(&mut line).await {
            Ok(0) => {
                // At EOF; wait for more output or a newer file.
                at_eof = true;
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(TAIL_POLL_INTERVAL) => {}
                }
            }
            Ok(_) => match parser.parse(line.trim_end()) {
                ParseOutcome::Event(event) => {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        sent = event_tx.send(event) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
                ParseOutcome::Failure(err) => {
                    push_error(&err_tx, err, &mut dropped_errors);
                }
                ParseOutcome::Skip => {}
            },
            Err(err) => {
                push_error(
                    &err_tx,
                    SourceError::Io(format!("read log file: {err}")),
                    &mut dropped_errors,
                );
                reader = None;
                current = None;
            }
        }
    }

    if dropped_errors > 0 {
        warn!(count = dropped_errors, "errors dropped due to full buffer");
    }
}

fn push_error(err_tx: &mpsc::Sender<SourceError>, err: SourceError, dropped: &mut u64) {
    // Never block ingest on a slow error consumer.
    if err_tx.try_send(err).is_err() {
        *dropped += 1;
    }
}

fn newest_log_file(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with(LOG_FILE_PREFIX) && name.ends_with(LOG_FILE_SUFFIX))
                .unwrap_or(false)
        })
        // Session log names embed their start time, so the lexicographic max
        // is the newest session.
        .max()
}

enum ParseOutcome {
    Event(SourceEvent),
    Failure(SourceError),
    Skip,
}

/// Stateful line parser. World joins arrive as two consecutive lines
/// (`Joining wrld_...` with the ids, then `Entering Room:` with the name),
/// so the ids are held until the room line completes them.
struct LineParser {
    replay_since: DateTime<Utc>,
    pending_world: Option<(String, String)>,
}

impl LineParser {
    fn new(replay_since: DateTime<Utc>) -> Self {
        Self {
            replay_since,
            pending_world: None,
        }
    }

    fn reset_session(&mut self) {
        self.pending_world = None;
    }

    fn parse(&mut self, line: &str) -> ParseOutcome {
        let Some(marker) = line.find(BEHAVIOUR_MARKER) else {
            return ParseOutcome::Skip;
        };
        let body = &line[marker + BEHAVIOUR_MARKER.len()..];

        let interesting = body.starts_with("OnPlayerJoined ")
            || body.starts_with("OnPlayerLeft ")
            || body.starts_with("Joining wrld_")
            || body.starts_with("Entering Room: ");
        if !interesting {
            return ParseOutcome::Skip;
        }

        let ts = match parse_line_timestamp(line) {
            Some(ts) => ts,
            None => {
                return ParseOutcome::Failure(SourceError::Parse {
                    line: line.to_string(),
                    cause: "unparseable timestamp".to_string(),
                });
            }
        };

        if let Some(rest) = body.strip_prefix("OnPlayerJoined ") {
            return self.player_event(EventType::PlayerJoin, ts, rest, line);
        }
        if let Some(rest) = body.strip_prefix("OnPlayerLeft ") {
            return self.player_event(EventType::PlayerLeft, ts, rest, line);
        }
        if let Some(rest) = body.strip_prefix("Joining ") {
            let (world_id, instance_id) = match rest.split_once(':') {
                Some((world, instance)) => (world.to_string(), instance.to_string()),
                None => (rest.to_string(), String::new()),
            };
            self.pending_world = Some((world_id, instance_id));
            return ParseOutcome::Skip;
        }
        if let Some(room) = body.strip_prefix("Entering Room: ") {
            if room.is_empty() {
                return ParseOutcome::Failure(SourceError::Parse {
                    line: line.to_string(),
                    cause: "empty room name".to_string(),
                });
            }
            let (world_id, instance_id) = self.pending_world.take().unwrap_or_default();
            if ts < self.replay_since {
                return ParseOutcome::Skip;
            }
            return ParseOutcome::Event(SourceEvent {
                event_type: EventType::WorldJoin,
                ts,
                player_name: String::new(),
                player_id: String::new(),
                world_id,
                world_name: room.to_string(),
                instance_id,
                raw_line: line.to_string(),
            });
        }

        ParseOutcome::Skip
    }

    fn player_event(
        &self,
        event_type: EventType,
        ts: DateTime<Utc>,
        rest: &str,
        line: &str,
    ) -> ParseOutcome {
        let (name, id) = split_player(rest);
        if name.is_empty() && id.is_empty() {
            return ParseOutcome::Failure(SourceError::Parse {
                line: line.to_string(),
                cause: "missing player identity".to_string(),
            });
        }
        if ts < self.replay_since {
            return ParseOutcome::Skip;
        }
        ParseOutcome::Event(SourceEvent {
            event_type,
            ts,
            player_name: name,
            player_id: id,
            world_id: String::new(),
            world_name: String::new(),
            instance_id: String::new(),
            raw_line: line.to_string(),
        })
    }
}

/// Log lines open with a local-time `YYYY.MM.DD HH:MM:SS` stamp.
fn parse_line_timestamp(line: &str) -> Option<DateTime<Utc>> {
    let prefix = line.get(..19)?;
    let naive = NaiveDateTime::parse_from_str(prefix, LINE_TIME_FORMAT).ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}

/// `Alice (usr_8f3a…)` → name + id; a bare name has no id suffix.
fn split_player(rest: &str) -> (String, String) {
    let trimmed = rest.trim();
    if let Some(open) = trimmed.rfind(" (usr_") {
        if let Some(inner) = trimmed[open + 2..].strip_suffix(')') {
            return (trimmed[..open].trim().to_string(), inner.to_string());
        }
    }
    (trimmed.to_string(), String::new())
}
