//! Session identity, file parsing, and the in-memory session store.
//!
//! One session is one JSONL file in the sessions directory, named
//! `{numeric_id}_{uuid}.jsonl`. Numeric id and uuid label are derived from
//! the file name only; the session id comes from the records themselves,
//! falling back to the file stem. Sessions are read-only views over the log
//! files and are reloaded wholesale when a file changes.

use crate::history::{self, LogRecord};
use crate::interactions::{build_interactions, Interaction};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// A parsed session: identity metadata plus its normalized interactions
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub file_name: String,
    pub numeric_id: Option<u64>,
    pub summary: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub interactions: Vec<Interaction>,
}

/// Listing row for a session (identity + counts, no interaction bodies)
#[derive(Debug, Clone, Serialize)]
pub struct SessionOverview {
    pub session_id: String,
    pub file_name: String,
    pub numeric_id: Option<u64>,
    pub uuid: Option<String>,
    pub interaction_count: usize,
    pub start_time: Option<DateTime<Utc>>,
    pub summary: Option<String>,
}

/// Extract the numeric id from a `{numeric_id}_{uuid}.jsonl` file name
pub fn numeric_id(file_name: &str) -> Option<u64> {
    let stem = file_name.strip_suffix(".jsonl").unwrap_or(file_name);
    let (prefix, _) = stem.split_once('_')?;
    prefix.parse().ok()
}

/// Extract the uuid label from a `{numeric_id}_{uuid}.jsonl` file name
pub fn uuid_label(file_name: &str) -> Option<&str> {
    let stem = file_name.strip_suffix(".jsonl").unwrap_or(file_name);
    let (_, uuid) = stem.split_once('_')?;
    if uuid.is_empty() {
        None
    } else {
        Some(uuid)
    }
}

/// Parse one session file: whole-file read, then tolerant per-line parse.
/// A malformed line degrades only itself; an unreadable file is the error.
pub fn parse_session_file(
    path: &Path,
) -> Result<Session, Box<dyn std::error::Error + Send + Sync>> {
    let content = fs::read_to_string(path)?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| format!("Not a session file path: {}", path.display()))?
        .to_string();
    let file_stem = file_name.strip_suffix(".jsonl").unwrap_or(&file_name);

    let records: Vec<LogRecord> = content.lines().filter_map(history::parse_record).collect();

    let id = records
        .iter()
        .find_map(|r| r.session_id())
        .unwrap_or(file_stem)
        .to_string();

    let summary = records.iter().find_map(|r| match r {
        LogRecord::Summary { summary } if !summary.is_empty() => Some(summary.clone()),
        _ => None,
    });

    let start_time = records.iter().filter_map(|r| r.timestamp()).min();

    let interactions = build_interactions(&records);

    Ok(Session {
        id,
        numeric_id: numeric_id(&file_name),
        file_name,
        summary,
        start_time,
        interactions,
    })
}

/// Session cache shared between HTTP handlers and the file watcher
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    pub sessions_dir: PathBuf,
}

impl SessionStore {
    pub fn new(sessions_dir: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            sessions_dir,
        })
    }

    /// Scan the sessions directory and load every `.jsonl` file.
    /// Returns the number of sessions loaded; unreadable files are skipped.
    pub fn load_all(&self) -> usize {
        let mut count = 0;
        let entries = match fs::read_dir(&self.sessions_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    "Cannot read sessions directory {}: {}",
                    self.sessions_dir.display(),
                    e
                );
                return 0;
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().map_or(false, |e| e == "jsonl"))
            .collect();
        paths.sort();

        for path in paths {
            match self.reload_file(&path) {
                Ok(Some(_)) => count += 1,
                Ok(None) => {}
                Err(e) => warn!("Skipping session file {}: {}", path.display(), e),
            }
        }
        count
    }

    /// Re-parse one session file into the cache.
    /// Returns the session id, or None for non-session paths.
    pub fn reload_file(
        &self,
        path: &Path,
    ) -> Result<Option<String>, Box<dyn std::error::Error + Send + Sync>> {
        if path.extension().map_or(true, |e| e != "jsonl") {
            return Ok(None);
        }
        let session = parse_session_file(path)?;
        let id = session.id.clone();
        debug!(
            "Loaded session {} ({} interactions)",
            id,
            session.interactions.len()
        );
        self.sessions.insert(id.clone(), session);
        Ok(Some(id))
    }

    /// Evict the session that came from a removed file
    pub fn remove_file(&self, path: &Path) {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            return;
        };
        self.sessions.retain(|_, s| s.file_name != file_name);
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).map(|r| r.clone())
    }

    /// Listing rows sorted by numeric id, highest (newest) first
    pub fn overviews(&self) -> Vec<SessionOverview> {
        let mut overviews: Vec<SessionOverview> = self
            .sessions
            .iter()
            .map(|r| {
                let s = r.value();
                SessionOverview {
                    session_id: s.id.clone(),
                    numeric_id: s.numeric_id,
                    uuid: uuid_label(&s.file_name).map(|u| u.to_string()),
                    file_name: s.file_name.clone(),
                    interaction_count: s.interactions.len(),
                    start_time: s.start_time,
                    summary: s.summary.clone(),
                }
            })
            .collect();
        overviews.sort_by(|a, b| b.numeric_id.unwrap_or(0).cmp(&a.numeric_id.unwrap_or(0)));
        overviews
    }

    /// (total sessions, total interactions)
    pub fn stats(&self) -> (usize, usize) {
        let total_sessions = self.sessions.len();
        let total_interactions = self
            .sessions
            .iter()
            .map(|r| r.value().interactions.len())
            .sum();
        (total_sessions, total_interactions)
    }
}
