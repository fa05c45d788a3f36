//! # Document Model
//!
//! The versioned, timestamped document that both the local and remote stores
//! exchange. The entire application state (projects, regions, task
//! collections, team members, settings) lives in one aggregate that is
//! replaced wholesale on every write, never patched field-by-field.
//!
//! ## Conflict Detection
//!
//! [`compare`] defines the whole-document last-writer-wins policy: the side
//! with the strictly later timestamp wins; equal timestamps resolve to
//! [`SyncOutcome::Equal`] and perform no I/O. The sync engine never inspects
//! the payload's internals.
//!
//! ## Serialization
//!
//! A [`Document`] round-trips losslessly through a single self-describing
//! JSON blob with `schema_version` at the top level, so import tooling can
//! decide whether a migration is needed before touching the local store.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::Result;

/// Current document schema version.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Matrix columns shipped on first run.
const DEFAULT_REGIONS: [&str; 7] = ["UK&I", "DACH", "US", "EMEA", "APAC", "Canada", "NMK"];

/// Outcome of comparing a local document against its remote record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The local document is strictly newer; its payload should be uploaded
    LocalWins,
    /// The remote record is strictly newer; its payload should replace the local document
    RemoteWins,
    /// Timestamps are identical; nothing to do
    Equal,
}

/// Compare a local save timestamp against a remote update timestamp.
///
/// This is deliberately coarse: whole-document last-writer-wins on wall-clock
/// time. A finer per-field merge or a logical clock would plug in here if
/// multi-editor correctness ever demands it.
pub fn compare(local_saved_at: DateTime<Utc>, remote_updated_at: DateTime<Utc>) -> SyncOutcome {
    match local_saved_at.cmp(&remote_updated_at) {
        std::cmp::Ordering::Greater => SyncOutcome::LocalWins,
        std::cmp::Ordering::Less => SyncOutcome::RemoteWins,
        std::cmp::Ordering::Equal => SyncOutcome::Equal,
    }
}

/// Task priority levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

/// Task completion status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Todo
    }
}

/// A comment attached to a task or subtask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub author: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// A subtask nested under a task; the deepest nesting level is
/// task -> subtask -> comment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

/// A single task in one matrix cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Team member id of the assignee, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    /// Estimated effort in hours
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_estimate: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a task with defaults for all optional fields
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            notes: None,
            assignee: None,
            priority: None,
            due_date: None,
            status: TaskStatus::Todo,
            tags: Vec::new(),
            subtasks: Vec::new(),
            comments: Vec::new(),
            time_estimate: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A project row in the matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub color: String,
    pub order: u32,
}

/// A team member who can be assigned to tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMember {
    pub id: Uuid,
    pub name: String,
    pub initials: String,
    pub color: String,
}

/// A reusable task template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub id: Uuid,
    pub name: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A saved filter query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedFilter {
    pub id: Uuid,
    pub name: String,
    pub query: String,
}

/// User-facing settings persisted with the document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub dark_mode: bool,
    #[serde(default = "default_true")]
    pub notifications: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dark_mode: false,
            notifications: true,
        }
    }
}

/// The opaque structured content carried by a [`Document`].
///
/// The sync engine treats this as a unit to be replaced wholesale; only the
/// UI and export tooling look inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Payload {
    /// Matrix columns
    #[serde(default)]
    pub regions: Vec<String>,
    /// Matrix rows
    #[serde(default)]
    pub projects: Vec<Project>,
    /// Task collections keyed by `"{project_id}:{region}"`
    #[serde(default)]
    pub tasks: BTreeMap<String, Vec<Task>>,
    #[serde(default)]
    pub team_members: Vec<TeamMember>,
    #[serde(default)]
    pub templates: Vec<TaskTemplate>,
    #[serde(default)]
    pub saved_filters: Vec<SavedFilter>,
    #[serde(default)]
    pub settings: Settings,
}

impl Payload {
    /// Cell key for a (project, region) pair
    pub fn cell_key(project_id: Uuid, region: &str) -> String {
        format!("{}:{}", project_id, region)
    }
}

/// The entire local application state as a single versioned aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Gates migrations on import; plays no part in conflict resolution
    pub schema_version: String,
    /// Incremented on every persisted local mutation; informational only
    pub revision: u64,
    /// Timestamp of last local persistence; authoritative for conflict ordering
    pub last_saved_at: DateTime<Utc>,
    pub payload: Payload,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            revision: 0,
            last_saved_at: Utc::now(),
            payload: Payload {
                regions: DEFAULT_REGIONS.iter().map(|r| r.to_string()).collect(),
                ..Payload::default()
            },
        }
    }
}

impl Document {
    /// Serialize to the transport-neutral JSON blob
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Serialize to the pretty-printed export blob
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize from a JSON blob
    pub fn from_json(blob: &str) -> Result<Self> {
        Ok(serde_json::from_str(blob)?)
    }

    /// Compare this document against a remote update timestamp
    pub fn compare_to(&self, remote_updated_at: DateTime<Utc>) -> SyncOutcome {
        compare(self.last_saved_at, remote_updated_at)
    }
}
