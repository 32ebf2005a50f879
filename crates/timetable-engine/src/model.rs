//! Core domain types: sessions, blocks, contributions and timetable entries.
//!
//! Everything here is plain data. The [`Event`](crate::event::Event)
//! aggregate owns the values and maintains the indices between them.

use chrono::{DateTime, Duration, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

// ── Identifiers ─────────────────────────────────────────────────────────────

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(v: u64) -> Self {
                $name(v)
            }
        }
    };
}

define_id!(
    /// Identifier of a session (a named grouping of contributions).
    SessionId
);
define_id!(
    /// Identifier of a session block (one time slot of a session).
    SessionBlockId
);
define_id!(
    /// Identifier of a contribution.
    ContributionId
);
define_id!(SubContributionId);
define_id!(
    /// Identifier of a timetable entry.
    EntryId
);

// ── Sessions ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    /// Duration given to contributions created inside this session when the
    /// caller does not specify one.
    #[serde(default = "default_contribution_minutes")]
    pub default_contribution_duration_minutes: i64,
}

/// A block belongs to exactly one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBlock {
    pub id: SessionBlockId,
    pub session: SessionId,
    #[serde(default)]
    pub title: String,
}

pub(crate) fn default_contribution_minutes() -> i64 {
    20
}

/// Longest duration a contribution may have: one leap year.
pub const MAX_DURATION_MINUTES: i64 = 366 * 24 * 60;

/// `start + minutes`, or `None` when the result is out of range.
pub(crate) fn add_minutes(start: DateTime<Utc>, minutes: i64) -> Option<DateTime<Utc>> {
    start.checked_add_signed(TimeDelta::try_minutes(minutes)?)
}

// ── Contributions ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    pub id: ContributionId,
    /// Sequential, human-facing number unique within the event.
    pub friendly_id: u64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub duration_minutes: i64,
    #[serde(default)]
    pub session: Option<SessionId>,
    /// Only meaningful while the contribution is scheduled inside a block.
    #[serde(default)]
    pub session_block: Option<SessionBlockId>,
    #[serde(default)]
    pub board_number: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub subcontributions: Vec<SubContribution>,
}

impl Contribution {
    pub fn duration(&self) -> Duration {
        Duration::try_minutes(self.duration_minutes).unwrap_or(Duration::MAX)
    }

    /// Title used in log messages, e.g. `#12 (Opening talk)`.
    pub fn verbose_title(&self) -> String {
        format!("#{} ({})", self.friendly_id, self.title)
    }

    pub fn subcontribution(&self, id: SubContributionId) -> Option<&SubContribution> {
        self.subcontributions.iter().find(|s| s.id == id)
    }

    pub(crate) fn subcontribution_mut(
        &mut self,
        id: SubContributionId,
    ) -> Option<&mut SubContribution> {
        self.subcontributions.iter_mut().find(|s| s.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubContribution {
    pub id: SubContributionId,
    pub title: String,
    #[serde(default)]
    pub duration_minutes: i64,
    #[serde(default)]
    pub is_deleted: bool,
}

// ── Timetable entries ───────────────────────────────────────────────────────

/// What a timetable slot holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryObject {
    SessionBlock { block: SessionBlockId },
    Contribution { contribution: ContributionId },
    Break { title: String },
}

/// A node in the two-level timetable tree.
///
/// Top-level entries have no parent. Nested entries always hang below a
/// top-level [`EntryObject::SessionBlock`] entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimetableEntry {
    pub id: EntryId,
    #[serde(default)]
    pub parent: Option<EntryId>,
    pub start_dt: DateTime<Utc>,
    pub duration_minutes: i64,
    pub object: EntryObject,
}

impl TimetableEntry {
    /// Saturates at the latest representable instant.
    pub fn end_dt(&self) -> DateTime<Utc> {
        add_minutes(self.start_dt, self.duration_minutes).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }

    pub fn contribution(&self) -> Option<ContributionId> {
        match self.object {
            EntryObject::Contribution { contribution } => Some(contribution),
            _ => None,
        }
    }

    pub fn session_block(&self) -> Option<SessionBlockId> {
        match self.object {
            EntryObject::SessionBlock { block } => Some(block),
            _ => None,
        }
    }

    /// Whether `[start, start + minutes)` lies inside this entry.
    pub fn covers(&self, start: DateTime<Utc>, minutes: i64) -> bool {
        start >= self.start_dt
            && add_minutes(start, minutes).is_some_and(|end| end <= self.end_dt())
    }
}
