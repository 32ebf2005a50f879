//! The event aggregate: owns sessions, blocks, contributions, the timetable
//! and the audit log, and keeps the lookup indices between them.
//!
//! An [`Event`] is loaded from an [`EventSnapshot`] (its serialized form).
//! Loading checks the structural shape of the timetable: two levels deep,
//! every nested entry below a session-block entry, every reference resolvable.
//! It does *not* require contributions to agree with the block they sit in;
//! that is what [`crate::consistency`] detects and repairs.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TimetableError};
use crate::log::EventLog;
use crate::scheduling::out_of_range;
use crate::model::{
    add_minutes, default_contribution_minutes, Contribution, ContributionId, EntryId,
    EntryObject, Session, SessionBlock, SessionBlockId, SessionId, SubContributionId,
    TimetableEntry, MAX_DURATION_MINUTES,
};

/// Largest id a snapshot may carry. Ids are database keys and fit a signed
/// 64-bit column, which leaves room to allocate new ids above any loaded one.
const MAX_ID: u64 = i64::MAX as u64;

// ── Snapshot ────────────────────────────────────────────────────────────────

/// Serialized form of an [`Event`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSnapshot {
    pub title: String,
    /// IANA timezone the event is displayed in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub sessions: Vec<Session>,
    #[serde(default)]
    pub session_blocks: Vec<SessionBlock>,
    #[serde(default)]
    pub contributions: Vec<Contribution>,
    #[serde(default)]
    pub entries: Vec<TimetableEntry>,
    #[serde(default)]
    pub log: EventLog,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

// ── Event ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Event {
    pub(crate) title: String,
    pub(crate) timezone: Tz,
    pub(crate) sessions: BTreeMap<SessionId, Session>,
    pub(crate) blocks: BTreeMap<SessionBlockId, SessionBlock>,
    pub(crate) contributions: BTreeMap<ContributionId, Contribution>,
    pub(crate) entries: BTreeMap<EntryId, TimetableEntry>,
    pub(crate) contribution_entries: HashMap<ContributionId, EntryId>,
    pub(crate) block_entries: HashMap<SessionBlockId, EntryId>,
    pub(crate) log: EventLog,
    /// Duration for new contributions outside of any session.
    pub(crate) default_contribution_minutes: i64,
    next_id: u64,
    next_friendly_id: u64,
}

impl Event {
    /// Create an empty event.
    ///
    /// # Errors
    ///
    /// Returns [`TimetableError::InvalidTimezone`] if `timezone` is not an IANA name.
    pub fn new(title: &str, timezone: &str) -> Result<Self> {
        Ok(Self {
            title: title.to_string(),
            timezone: parse_timezone(timezone)?,
            sessions: BTreeMap::new(),
            blocks: BTreeMap::new(),
            contributions: BTreeMap::new(),
            entries: BTreeMap::new(),
            contribution_entries: HashMap::new(),
            block_entries: HashMap::new(),
            log: EventLog::new(),
            default_contribution_minutes: default_contribution_minutes(),
            next_id: 1,
            next_friendly_id: 1,
        })
    }

    /// Load an event from its snapshot, validating the timetable structure.
    ///
    /// # Errors
    ///
    /// Returns [`TimetableError::InvalidTimezone`] for a bad timezone and
    /// [`TimetableError::InvalidSnapshot`] for duplicate ids, dangling
    /// references, or a timetable that is not a two-level block tree.
    pub fn from_snapshot(snapshot: EventSnapshot) -> Result<Self> {
        let mut event = Event::new(&snapshot.title, &snapshot.timezone)?;
        event.log = snapshot.log;

        for session in snapshot.sessions {
            if event.sessions.insert(session.id, session.clone()).is_some() {
                return Err(invalid(format!("duplicate session id {}", session.id)));
            }
            event.bump_id(session.id.0)?;
        }

        for block in snapshot.session_blocks {
            if !event.sessions.contains_key(&block.session) {
                return Err(invalid(format!(
                    "session block {} references unknown session {}",
                    block.id, block.session
                )));
            }
            if event.blocks.insert(block.id, block.clone()).is_some() {
                return Err(invalid(format!("duplicate session block id {}", block.id)));
            }
            event.bump_id(block.id.0)?;
        }

        let mut friendly_ids = HashSet::new();
        for contrib in snapshot.contributions {
            if let Some(session) = contrib.session {
                if !event.sessions.contains_key(&session) {
                    return Err(invalid(format!(
                        "contribution {} references unknown session {}",
                        contrib.id, session
                    )));
                }
            }
            if let Some(block) = contrib.session_block {
                if !event.blocks.contains_key(&block) {
                    return Err(invalid(format!(
                        "contribution {} references unknown session block {}",
                        contrib.id, block
                    )));
                }
            }
            if !friendly_ids.insert(contrib.friendly_id) {
                return Err(invalid(format!(
                    "duplicate friendly id {}",
                    contrib.friendly_id
                )));
            }
            check_duration(contrib.duration_minutes)
                .map_err(|e| invalid(format!("contribution {}: {e}", contrib.id)))?;
            event.next_friendly_id = event
                .next_friendly_id
                .max(next_after(contrib.friendly_id, "friendly id")?);
            for sub in &contrib.subcontributions {
                check_sub_duration(sub.duration_minutes)
                    .map_err(|e| invalid(format!("subcontribution {}: {e}", sub.id)))?;
                event.bump_id(sub.id.0)?;
            }
            event.bump_id(contrib.id.0)?;
            let id = contrib.id;
            if event.contributions.insert(id, contrib).is_some() {
                return Err(invalid(format!("duplicate contribution id {id}")));
            }
        }

        for entry in &snapshot.entries {
            event.bump_id(entry.id.0)?;
            if event.entries.insert(entry.id, entry.clone()).is_some() {
                return Err(invalid(format!("duplicate entry id {}", entry.id)));
            }
        }
        for entry in &snapshot.entries {
            event.validate_entry(entry)?;
        }

        Ok(event)
    }

    fn validate_entry(&mut self, entry: &TimetableEntry) -> Result<()> {
        if entry.duration_minutes < 0 {
            return Err(invalid(format!("entry {} has a negative duration", entry.id)));
        }
        if add_minutes(entry.start_dt, entry.duration_minutes).is_none() {
            return Err(invalid(format!("entry {} ends out of range", entry.id)));
        }
        if let Some(parent_id) = entry.parent {
            let parent = self.entries.get(&parent_id).ok_or_else(|| {
                invalid(format!(
                    "entry {} references unknown parent {}",
                    entry.id, parent_id
                ))
            })?;
            if !parent.is_top_level() || parent.session_block().is_none() {
                return Err(invalid(format!(
                    "entry {} must be nested below a top-level session block entry",
                    entry.id
                )));
            }
        }
        match &entry.object {
            EntryObject::SessionBlock { block } => {
                if !entry.is_top_level() {
                    return Err(invalid(format!(
                        "session block entry {} cannot be nested",
                        entry.id
                    )));
                }
                if !self.blocks.contains_key(block) {
                    return Err(invalid(format!(
                        "entry {} references unknown session block {}",
                        entry.id, block
                    )));
                }
                if self.block_entries.insert(*block, entry.id).is_some() {
                    return Err(invalid(format!(
                        "session block {block} is scheduled more than once"
                    )));
                }
            }
            EntryObject::Contribution { contribution } => {
                if !self.contributions.contains_key(contribution) {
                    return Err(invalid(format!(
                        "entry {} references unknown contribution {}",
                        entry.id, contribution
                    )));
                }
                if self
                    .contribution_entries
                    .insert(*contribution, entry.id)
                    .is_some()
                {
                    return Err(invalid(format!(
                        "contribution {contribution} is scheduled more than once"
                    )));
                }
            }
            EntryObject::Break { .. } => {}
        }
        Ok(())
    }

    /// Serialize the event back into its snapshot form.
    pub fn to_snapshot(&self) -> EventSnapshot {
        EventSnapshot {
            title: self.title.clone(),
            timezone: self.timezone.name().to_string(),
            sessions: self.sessions.values().cloned().collect(),
            session_blocks: self.blocks.values().cloned().collect(),
            contributions: self.contributions.values().cloned().collect(),
            entries: self.entries.values().cloned().collect(),
            log: self.log.clone(),
        }
    }

    // ── Read API ────────────────────────────────────────────────────────────

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn session_block(&self, id: SessionBlockId) -> Option<&SessionBlock> {
        self.blocks.get(&id)
    }

    pub fn contribution(&self, id: ContributionId) -> Option<&Contribution> {
        self.contributions.get(&id)
    }

    /// All contributions that have not been deleted, ordered by id.
    pub fn contributions(&self) -> impl Iterator<Item = &Contribution> {
        self.contributions.values().filter(|c| !c.is_deleted)
    }

    pub fn entry(&self, id: EntryId) -> Option<&TimetableEntry> {
        self.entries.get(&id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &TimetableEntry> {
        self.entries.values()
    }

    pub fn entry_for_contribution(&self, id: ContributionId) -> Option<&TimetableEntry> {
        self.contribution_entries
            .get(&id)
            .and_then(|entry| self.entries.get(entry))
    }

    pub fn entry_for_block(&self, id: SessionBlockId) -> Option<&TimetableEntry> {
        self.block_entries
            .get(&id)
            .and_then(|entry| self.entries.get(entry))
    }

    /// The session block of `entry`'s parent, if the entry is nested.
    pub fn parent_block(&self, entry: &TimetableEntry) -> Option<&SessionBlock> {
        let parent = self.entries.get(&entry.parent?)?;
        self.blocks.get(&parent.session_block()?)
    }

    /// Entries nested below `parent`, ordered by start time.
    pub fn children(&self, parent: EntryId) -> Vec<&TimetableEntry> {
        let mut children: Vec<_> = self
            .entries
            .values()
            .filter(|e| e.parent == Some(parent))
            .collect();
        children.sort_by_key(|e| (e.start_dt, e.id));
        children
    }

    /// Render a UTC instant in the event's timezone.
    pub fn local_time(&self, dt: DateTime<Utc>) -> DateTime<Tz> {
        dt.with_timezone(&self.timezone)
    }

    // ── Building ────────────────────────────────────────────────────────────

    pub fn add_session(&mut self, title: &str) -> SessionId {
        let id = SessionId(self.allocate_id());
        self.sessions.insert(
            id,
            Session {
                id,
                title: title.to_string(),
                default_contribution_duration_minutes: default_contribution_minutes(),
            },
        );
        id
    }

    /// # Errors
    ///
    /// Returns [`TimetableError::UnknownSession`] if `session` does not exist.
    pub fn add_session_block(&mut self, session: SessionId, title: &str) -> Result<SessionBlockId> {
        if !self.sessions.contains_key(&session) {
            return Err(TimetableError::UnknownSession(session));
        }
        let id = SessionBlockId(self.allocate_id());
        self.blocks.insert(
            id,
            SessionBlock {
                id,
                session,
                title: title.to_string(),
            },
        );
        Ok(id)
    }

    /// Place a session block at the top level of the timetable.
    ///
    /// # Errors
    ///
    /// Returns [`TimetableError::UnknownSessionBlock`] if the block does not
    /// exist, [`TimetableError::InvalidField`] if it is already scheduled or
    /// the duration or end time is out of range.
    pub fn schedule_session_block(
        &mut self,
        block: SessionBlockId,
        start_dt: DateTime<Utc>,
        duration_minutes: i64,
    ) -> Result<EntryId> {
        if !self.blocks.contains_key(&block) {
            return Err(TimetableError::UnknownSessionBlock(block));
        }
        if self.block_entries.contains_key(&block) {
            return Err(TimetableError::InvalidField(format!(
                "session block {block} is already scheduled"
            )));
        }
        check_entry_span(start_dt, duration_minutes)?;
        let id = self.insert_entry(
            None,
            start_dt,
            duration_minutes,
            EntryObject::SessionBlock { block },
        );
        self.block_entries.insert(block, id);
        Ok(id)
    }

    /// Place a break at the top level of the timetable.
    pub fn add_break(
        &mut self,
        title: &str,
        start_dt: DateTime<Utc>,
        duration_minutes: i64,
    ) -> Result<EntryId> {
        check_entry_span(start_dt, duration_minutes)?;
        Ok(self.insert_entry(
            None,
            start_dt,
            duration_minutes,
            EntryObject::Break {
                title: title.to_string(),
            },
        ))
    }

    // ── Crate-internal mutation ─────────────────────────────────────────────

    pub(crate) fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn allocate_friendly_id(&mut self) -> u64 {
        let id = self.next_friendly_id;
        self.next_friendly_id += 1;
        id
    }

    /// Id counters, so a failed operation can hand back the ids it took.
    pub(crate) fn id_counters(&self) -> (u64, u64) {
        (self.next_id, self.next_friendly_id)
    }

    pub(crate) fn restore_id_counters(&mut self, (next_id, next_friendly_id): (u64, u64)) {
        self.next_id = next_id;
        self.next_friendly_id = next_friendly_id;
    }

    fn bump_id(&mut self, seen: u64) -> Result<()> {
        self.next_id = self.next_id.max(next_after(seen, "id")?);
        Ok(())
    }

    pub(crate) fn insert_entry(
        &mut self,
        parent: Option<EntryId>,
        start_dt: DateTime<Utc>,
        duration_minutes: i64,
        object: EntryObject,
    ) -> EntryId {
        let id = EntryId(self.allocate_id());
        self.entries.insert(
            id,
            TimetableEntry {
                id,
                parent,
                start_dt,
                duration_minutes,
                object,
            },
        );
        id
    }

    pub(crate) fn contribution_mut(&mut self, id: ContributionId) -> Result<&mut Contribution> {
        self.contributions
            .get_mut(&id)
            .ok_or(TimetableError::UnknownContribution(id))
    }

    /// Like [`Event::contribution_mut`] but also rejects deleted contributions.
    pub(crate) fn live_contribution_mut(
        &mut self,
        id: ContributionId,
    ) -> Result<&mut Contribution> {
        let contrib = self.contribution_mut(id)?;
        if contrib.is_deleted {
            return Err(TimetableError::ContributionDeleted(id));
        }
        Ok(contrib)
    }

    pub(crate) fn session_title(&self, id: Option<SessionId>) -> Option<String> {
        id.and_then(|id| self.sessions.get(&id))
            .map(|s| s.title.clone())
    }

    pub(crate) fn next_subcontribution_id(&mut self) -> SubContributionId {
        SubContributionId(self.allocate_id())
    }
}

/// Contribution durations are positive and at most [`MAX_DURATION_MINUTES`].
pub(crate) fn check_duration(minutes: i64) -> Result<()> {
    if minutes <= 0 {
        return Err(TimetableError::InvalidField(format!(
            "duration must be positive, got {minutes} minutes"
        )));
    }
    check_max_duration(minutes)
}

/// Subcontributions may have no duration at all.
pub(crate) fn check_sub_duration(minutes: i64) -> Result<()> {
    if minutes < 0 {
        return Err(TimetableError::InvalidField(format!(
            "duration must not be negative, got {minutes} minutes"
        )));
    }
    check_max_duration(minutes)
}

fn check_entry_span(start_dt: DateTime<Utc>, minutes: i64) -> Result<()> {
    check_duration(minutes)?;
    if add_minutes(start_dt, minutes).is_none() {
        return Err(out_of_range(start_dt, minutes));
    }
    Ok(())
}

fn check_max_duration(minutes: i64) -> Result<()> {
    if minutes > MAX_DURATION_MINUTES {
        return Err(TimetableError::InvalidField(format!(
            "duration must be at most {MAX_DURATION_MINUTES} minutes, got {minutes}"
        )));
    }
    Ok(())
}

fn next_after(seen: u64, what: &str) -> Result<u64> {
    if seen > MAX_ID {
        return Err(invalid(format!("{what} {seen} is larger than {MAX_ID}")));
    }
    Ok(seen + 1)
}

fn parse_timezone(s: &str) -> Result<Tz> {
    s.parse::<Tz>()
        .map_err(|_| TimetableError::InvalidTimezone(format!("'{}'", s)))
}

fn invalid(msg: String) -> TimetableError {
    TimetableError::InvalidSnapshot(msg)
}
