//! Curated task annotations over session interactions.
//!
//! A task bundles a set of `(session_id, interaction_id)` references with a
//! description, category, and outcome. Tasks live in a JSONL file: one JSON
//! record per line, append-for-create, delete by rewriting the file without
//! the victim. Tasks are immutable once created; there is no update.

use crate::interactions::Interaction;
use crate::sessions::SessionStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Closed set of task categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskCategory {
    Proof,
    StateAndProve,
    Repair,
    Refactor,
    Query,
    Chore,
}

/// Closed set of task outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOutcome {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "success-with-human-NL")]
    SuccessWithHumanNl,
    #[serde(rename = "success-with-human-code")]
    SuccessWithHumanCode,
    #[serde(rename = "success-with-human-both")]
    SuccessWithHumanBoth,
    #[serde(rename = "partial")]
    Partial,
    #[serde(rename = "problem-identified")]
    ProblemIdentified,
    #[serde(rename = "failure")]
    Failure,
}

/// Reference to an interaction by session id and derived ordinal id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionRef {
    pub session_id: String,
    pub interaction_id: String,
}

/// A stored task annotation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub category: TaskCategory,
    pub outcome: TaskOutcome,
    pub interactions: Vec<InteractionRef>,
    pub created_at: DateTime<Utc>,
}

/// Creation payload; id and created_at are generated by the store
#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub description: String,
    pub category: TaskCategory,
    pub outcome: TaskOutcome,
    pub interactions: Vec<InteractionRef>,
}

/// One resolved task reference: the hydrated interaction plus enough session
/// context to render provenance
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedInteraction {
    pub session_id: String,
    pub session_numeric_id: Option<u64>,
    pub session_summary: Option<String>,
    pub interaction: Interaction,
}

/// Read-time projection of a task with hydrated interactions.
/// Built on demand, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct TaskWithDetails {
    pub id: String,
    pub description: String,
    pub category: TaskCategory,
    pub outcome: TaskOutcome,
    pub interactions: Vec<ResolvedInteraction>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum TaskError {
    /// Rejected at validation time; nothing was persisted
    Invalid(String),
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Invalid(msg) => write!(f, "{}", msg),
            TaskError::Io(e) => write!(f, "Task store I/O error: {}", e),
            TaskError::Json(e) => write!(f, "Task store serialization error: {}", e),
        }
    }
}

impl std::error::Error for TaskError {}

impl From<std::io::Error> for TaskError {
    fn from(e: std::io::Error) -> Self {
        TaskError::Io(e)
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(e: serde_json::Error) -> Self {
        TaskError::Json(e)
    }
}

/// JSONL-backed task store. Mutations are serialized behind one lock so a
/// concurrent create and delete cannot interleave their file rewrites.
pub struct TaskStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TaskStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// All tasks in file order. A corrupt line is skipped, not fatal.
    pub fn list(&self) -> Vec<Task> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("Cannot read task store {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };

        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<Task>(line) {
                Ok(task) => Some(task),
                Err(e) => {
                    warn!("Skipping corrupt task record: {}", e);
                    None
                }
            })
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.list().into_iter().find(|t| t.id == id)
    }

    /// Append a new task. Empty description or reference list is rejected
    /// before anything touches the file.
    pub fn create(&self, new: NewTask) -> Result<Task, TaskError> {
        if new.description.trim().is_empty() {
            return Err(TaskError::Invalid("Task description is empty".to_string()));
        }
        if new.interactions.is_empty() {
            return Err(TaskError::Invalid(
                "Task has no interaction references".to_string(),
            ));
        }

        let task = Task {
            id: uuid::Uuid::new_v4().to_string(),
            description: new.description,
            category: new.category,
            outcome: new.outcome,
            interactions: new.interactions,
            created_at: Utc::now(),
        };

        let line = serde_json::to_string(&task)?;

        let _guard = self.write_lock.lock().unwrap();
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;

        Ok(task)
    }

    /// Delete a task by id, preserving the order of the survivors.
    /// Returns false when no such task exists.
    pub fn delete(&self, id: &str) -> Result<bool, TaskError> {
        let _guard = self.write_lock.lock().unwrap();

        let tasks = self.list();
        if !tasks.iter().any(|t| t.id == id) {
            return Ok(false);
        }

        let mut out = String::new();
        for task in tasks.iter().filter(|t| t.id != id) {
            out.push_str(&serde_json::to_string(task)?);
            out.push('\n');
        }
        fs::write(&self.path, out)?;

        Ok(true)
    }
}

/// Hydrate a task's references against the live session store, in original
/// order. An unresolvable reference (missing session, stale ordinal) is
/// omitted; the shortened list is the caller-visible signal of the gap.
pub fn resolve_task(task: &Task, sessions: &SessionStore) -> TaskWithDetails {
    let mut resolved = Vec::with_capacity(task.interactions.len());

    for r in &task.interactions {
        let Some(session) = sessions.get(&r.session_id) else {
            debug!(
                "Task {}: session {} not found, reference omitted",
                task.id, r.session_id
            );
            continue;
        };
        let Some(interaction) = session
            .interactions
            .iter()
            .find(|i| i.id == r.interaction_id)
        else {
            debug!(
                "Task {}: interaction {} not in session {}, reference omitted",
                task.id, r.interaction_id, r.session_id
            );
            continue;
        };

        resolved.push(ResolvedInteraction {
            session_id: r.session_id.clone(),
            session_numeric_id: session.numeric_id,
            session_summary: session.summary.clone(),
            interaction: interaction.clone(),
        });
    }

    TaskWithDetails {
        id: task.id.clone(),
        description: task.description.clone(),
        category: task.category,
        outcome: task.outcome,
        interactions: resolved,
        created_at: task.created_at,
    }
}
