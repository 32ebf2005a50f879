//! Audit log attached to an event.
//!
//! Operations append [`LogEntry`] records describing what changed. Deletions
//! that happen as a side effect of a larger edit (see
//! [`ensure_consistency`](crate::consistency::ensure_consistency)) are not
//! recorded, so the edit itself is the only record a user sees.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRealm {
    Event,
    Management,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Positive,
    Negative,
    Change,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub realm: LogRealm,
    pub kind: LogKind,
    /// Area of the application the record belongs to, e.g. `"Contributions"`.
    pub module: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventLog {
    entries: Vec<LogEntry>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        realm: LogRealm,
        kind: LogKind,
        module: &str,
        summary: impl Into<String>,
        data: Value,
    ) {
        self.entries.push(LogEntry {
            realm,
            kind,
            module: module.to_string(),
            summary: summary.into(),
            data,
        });
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Field diffs ─────────────────────────────────────────────────────────────

/// Contribution fields whose changes are tracked in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangedField {
    Title,
    Description,
    Duration,
    BoardNumber,
    Code,
    Keywords,
    Session,
}

impl ChangedField {
    /// Label shown to users in the log.
    pub fn title(self) -> &'static str {
        match self {
            ChangedField::Title => "Title",
            ChangedField::Description => "Description",
            ChangedField::Duration => "Duration",
            ChangedField::BoardNumber => "Board number",
            ChangedField::Code => "Program code",
            ChangedField::Keywords => "Keywords",
            ChangedField::Session => "Session",
        }
    }
}

/// One changed field with its rendered old and new values.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: ChangedField,
    pub old: Value,
    pub new: Value,
}

impl FieldChange {
    pub fn new(field: ChangedField, old: impl Into<Value>, new: impl Into<Value>) -> Self {
        Self {
            field,
            old: old.into(),
            new: new.into(),
        }
    }
}

/// Render changes as `{"Changes": {"<label>": {"old": .., "new": ..}}}`,
/// keeping the order in which the fields were changed.
pub fn make_diff_log(changes: &[FieldChange]) -> Value {
    let mut diff = Map::new();
    for change in changes {
        diff.insert(
            change.field.title().to_string(),
            json!({"old": change.old, "new": change.new}),
        );
    }
    json!({ "Changes": diff })
}
