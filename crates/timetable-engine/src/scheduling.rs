//! Placing contributions in the timetable and removing entries again.
//!
//! [`Scheduler`] is the seam the contribution operations and the consistency
//! checker go through whenever they create, move or delete an entry.
//! [`Event`] is the in-memory implementation.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::debug;

use crate::error::{Result, TimetableError};
use crate::event::Event;
use crate::log::{LogKind, LogRealm};
use crate::model::{
    add_minutes, ContributionId, EntryId, EntryObject, SessionBlockId, TimetableEntry,
};

pub trait Scheduler {
    /// Create a timetable entry for `contribution` starting at `start_dt`.
    ///
    /// With a `session_block` the entry is nested in that block's entry and
    /// the contribution takes over the block and its session. A contribution
    /// that does not fit inside the block is rejected unless `extend_parent`
    /// is set, in which case the block grows to cover it.
    fn schedule_contribution(
        &mut self,
        contribution: ContributionId,
        start_dt: DateTime<Utc>,
        session_block: Option<SessionBlockId>,
        extend_parent: bool,
    ) -> Result<EntryId>;

    /// Remove an entry (and, for a block, everything nested in it).
    ///
    /// Only writes an audit record when `log` is true.
    fn delete_entry(&mut self, entry: EntryId, log: bool) -> Result<TimetableEntry>;

    /// Move an entry to a new start time.
    fn update_entry_start(&mut self, entry: EntryId, start_dt: DateTime<Utc>) -> Result<()>;
}

impl Scheduler for Event {
    fn schedule_contribution(
        &mut self,
        contribution: ContributionId,
        start_dt: DateTime<Utc>,
        session_block: Option<SessionBlockId>,
        extend_parent: bool,
    ) -> Result<EntryId> {
        let duration = self.live_contribution_mut(contribution)?.duration_minutes;
        if self.contribution_entries.contains_key(&contribution) {
            return Err(TimetableError::AlreadyScheduled(contribution));
        }
        if add_minutes(start_dt, duration).is_none() {
            return Err(out_of_range(start_dt, duration));
        }

        let parent = match session_block {
            Some(block_id) => {
                let session = self
                    .blocks
                    .get(&block_id)
                    .ok_or(TimetableError::UnknownSessionBlock(block_id))?
                    .session;
                let parent_id = *self
                    .block_entries
                    .get(&block_id)
                    .ok_or(TimetableError::BlockNotScheduled(block_id))?;
                let parent = self
                    .entries
                    .get_mut(&parent_id)
                    .ok_or(TimetableError::UnknownEntry(parent_id))?;

                if !parent.covers(start_dt, duration) {
                    if !extend_parent {
                        return Err(TimetableError::DoesNotFit {
                            contribution,
                            block: block_id,
                        });
                    }
                    stretch_to_cover(parent, start_dt, duration)?;
                    debug!(
                        block = %block_id,
                        start = %parent.start_dt,
                        minutes = parent.duration_minutes,
                        "extended session block to fit contribution"
                    );
                }

                let contrib = self.contribution_mut(contribution)?;
                contrib.session = Some(session);
                contrib.session_block = Some(block_id);
                Some(parent_id)
            }
            None => None,
        };

        let entry = self.insert_entry(
            parent,
            start_dt,
            duration,
            EntryObject::Contribution { contribution },
        );
        self.contribution_entries.insert(contribution, entry);
        debug!(
            contribution = %contribution,
            entry = %entry,
            parent = ?parent,
            start = %start_dt,
            "scheduled contribution"
        );
        Ok(entry)
    }

    fn delete_entry(&mut self, entry: EntryId, log: bool) -> Result<TimetableEntry> {
        let children: Vec<EntryId> = self.children(entry).iter().map(|e| e.id).collect();
        let removed = self
            .entries
            .remove(&entry)
            .ok_or(TimetableError::UnknownEntry(entry))?;

        for child in children {
            if let Some(child) = self.entries.remove(&child) {
                self.detach(&child);
            }
        }
        self.detach(&removed);
        debug!(entry = %entry, log, "deleted timetable entry");

        if log {
            let summary = match &removed.object {
                EntryObject::Contribution { contribution } => {
                    let title = self
                        .contributions
                        .get(contribution)
                        .map(|c| c.verbose_title())
                        .unwrap_or_else(|| contribution.to_string());
                    format!("Contribution {title} has been unscheduled")
                }
                EntryObject::SessionBlock { block } => {
                    let title = self
                        .blocks
                        .get(block)
                        .map(|b| b.title.clone())
                        .unwrap_or_else(|| block.to_string());
                    format!("Session block {title} has been unscheduled")
                }
                EntryObject::Break { title } => format!("Break {title} has been deleted"),
            };
            let start = self.local_time(removed.start_dt).to_rfc3339();
            self.log.record(
                LogRealm::Management,
                LogKind::Negative,
                "Timetable",
                summary,
                json!({ "Start": start }),
            );
        }
        Ok(removed)
    }

    fn update_entry_start(&mut self, entry: EntryId, start_dt: DateTime<Utc>) -> Result<()> {
        let current = self
            .entries
            .get(&entry)
            .ok_or(TimetableError::UnknownEntry(entry))?;
        let delta = start_dt - current.start_dt;
        let (parent, minutes) = (current.parent, current.duration_minutes);
        if add_minutes(start_dt, minutes).is_none() {
            return Err(out_of_range(start_dt, minutes));
        }

        // Nested entries travel with their block.
        let mut moved = Vec::new();
        for child in self.entries.values().filter(|e| e.parent == Some(entry)) {
            let start = child
                .start_dt
                .checked_add_signed(delta)
                .filter(|start| add_minutes(*start, child.duration_minutes).is_some())
                .ok_or_else(|| {
                    TimetableError::InvalidField(format!(
                        "moving entry {entry} would push entry {} out of range",
                        child.id
                    ))
                })?;
            moved.push((child.id, start));
        }

        if let Some(current) = self.entries.get_mut(&entry) {
            current.start_dt = start_dt;
        }
        for (child, start) in moved {
            if let Some(child) = self.entries.get_mut(&child) {
                child.start_dt = start;
            }
        }

        if let Some(parent) = parent.and_then(|p| self.entries.get_mut(&p)) {
            if !parent.covers(start_dt, minutes) {
                stretch_to_cover(parent, start_dt, minutes)?;
                debug!(entry = %parent.id, "extended session block to fit moved entry");
            }
        }
        Ok(())
    }
}

impl Event {
    /// Drop index references to a removed entry.
    fn detach(&mut self, removed: &TimetableEntry) {
        match removed.object {
            EntryObject::Contribution { contribution } => {
                self.contribution_entries.remove(&contribution);
                // Block membership only exists while scheduled inside the block.
                if let Some(contrib) = self.contributions.get_mut(&contribution) {
                    contrib.session_block = None;
                }
            }
            EntryObject::SessionBlock { block } => {
                self.block_entries.remove(&block);
            }
            EntryObject::Break { .. } => {}
        }
    }
}

/// Grow `entry` so that `[start_dt, start_dt + minutes)` lies inside it.
pub(crate) fn stretch_to_cover(
    entry: &mut TimetableEntry,
    start_dt: DateTime<Utc>,
    minutes: i64,
) -> Result<()> {
    let end = add_minutes(start_dt, minutes)
        .ok_or_else(|| out_of_range(start_dt, minutes))?
        .max(entry.end_dt());
    let start = start_dt.min(entry.start_dt);
    entry.start_dt = start;
    entry.duration_minutes = (end - start).num_minutes();
    Ok(())
}

pub(crate) fn out_of_range(start_dt: DateTime<Utc>, minutes: i64) -> TimetableError {
    TimetableError::InvalidField(format!(
        "{minutes} minutes from {start_dt} is out of the supported time range"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SessionId;
    use crate::operations::{create_contribution, NewContribution};
    use chrono::{Duration, TimeZone};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 16, h, m, 0).unwrap()
    }

    struct Fixture {
        event: Event,
        session: SessionId,
        block: SessionBlockId,
        block_entry: EntryId,
        talk: ContributionId,
    }

    fn fixture() -> Fixture {
        let mut event = Event::new("Workshop", "Europe/Zurich").unwrap();
        let session = event.add_session("Plenary");
        let block = event.add_session_block(session, "Morning").unwrap();
        let block_entry = event.schedule_session_block(block, at(9, 0), 60).unwrap();
        let talk = create_contribution(
            &mut event,
            NewContribution {
                title: "Keynote".into(),
                duration_minutes: Some(30),
                ..Default::default()
            },
        )
        .unwrap();
        Fixture {
            event,
            session,
            block,
            block_entry,
            talk,
        }
    }

    #[test]
    fn test_schedule_top_level() {
        let mut f = fixture();
        let entry = f
            .event
            .schedule_contribution(f.talk, at(11, 0), None, false)
            .unwrap();
        let entry = f.event.entry(entry).unwrap();
        assert!(entry.is_top_level());
        assert_eq!(entry.end_dt(), at(11, 30));
        assert_eq!(f.event.contribution(f.talk).unwrap().session, None);
    }

    #[test]
    fn test_schedule_in_block_adopts_block_and_session() {
        let mut f = fixture();
        let entry = f
            .event
            .schedule_contribution(f.talk, at(9, 15), Some(f.block), false)
            .unwrap();
        assert_eq!(f.event.entry(entry).unwrap().parent, Some(f.block_entry));
        let contrib = f.event.contribution(f.talk).unwrap();
        assert_eq!(contrib.session, Some(f.session));
        assert_eq!(contrib.session_block, Some(f.block));
    }

    #[test]
    fn test_schedule_rejects_contribution_that_does_not_fit() {
        let mut f = fixture();
        let err = f
            .event
            .schedule_contribution(f.talk, at(9, 45), Some(f.block), false)
            .unwrap_err();
        assert_eq!(
            err,
            TimetableError::DoesNotFit {
                contribution: f.talk,
                block: f.block
            }
        );
        assert!(f.event.entry_for_contribution(f.talk).is_none());
        assert_eq!(f.event.contribution(f.talk).unwrap().session_block, None);
    }

    #[test]
    fn test_schedule_extends_parent_when_asked() {
        let mut f = fixture();
        f.event
            .schedule_contribution(f.talk, at(9, 45), Some(f.block), true)
            .unwrap();
        let block_entry = f.event.entry(f.block_entry).unwrap();
        assert_eq!(block_entry.start_dt, at(9, 0));
        assert_eq!(block_entry.end_dt(), at(10, 15));
    }

    #[test]
    fn test_schedule_twice_is_rejected() {
        let mut f = fixture();
        f.event
            .schedule_contribution(f.talk, at(11, 0), None, false)
            .unwrap();
        let err = f
            .event
            .schedule_contribution(f.talk, at(12, 0), None, false)
            .unwrap_err();
        assert_eq!(err, TimetableError::AlreadyScheduled(f.talk));
    }

    #[test]
    fn test_schedule_into_unscheduled_block() {
        let mut f = fixture();
        let other = f.event.add_session_block(f.session, "Afternoon").unwrap();
        let err = f
            .event
            .schedule_contribution(f.talk, at(14, 0), Some(other), false)
            .unwrap_err();
        assert_eq!(err, TimetableError::BlockNotScheduled(other));
    }

    #[test]
    fn test_delete_without_log_writes_nothing() {
        let mut f = fixture();
        let entry = f
            .event
            .schedule_contribution(f.talk, at(9, 0), Some(f.block), false)
            .unwrap();
        let before = f.event.log().len();
        f.event.delete_entry(entry, false).unwrap();
        assert_eq!(f.event.log().len(), before);
        assert!(f.event.entry_for_contribution(f.talk).is_none());
        assert_eq!(f.event.contribution(f.talk).unwrap().session_block, None);
        // The session assignment outlives the entry.
        assert_eq!(f.event.contribution(f.talk).unwrap().session, Some(f.session));
    }

    #[test]
    fn test_delete_with_log_records_local_start() {
        let mut f = fixture();
        let entry = f
            .event
            .schedule_contribution(f.talk, at(11, 0), None, false)
            .unwrap();
        f.event.delete_entry(entry, true).unwrap();
        let record = f.event.log().last().unwrap();
        assert_eq!(record.kind, LogKind::Negative);
        assert_eq!(record.module, "Timetable");
        assert_eq!(record.summary, "Contribution #1 (Keynote) has been unscheduled");
        // 11:00 UTC is 12:00 in Zurich in March (CET).
        assert_eq!(record.data["Start"], "2026-03-16T12:00:00+01:00");
    }

    #[test]
    fn test_delete_block_removes_children() {
        let mut f = fixture();
        let entry = f
            .event
            .schedule_contribution(f.talk, at(9, 0), Some(f.block), false)
            .unwrap();
        f.event.delete_entry(f.block_entry, false).unwrap();
        assert!(f.event.entry(entry).is_none());
        assert!(f.event.entry_for_block(f.block).is_none());
        assert!(f.event.entry_for_contribution(f.talk).is_none());
    }

    #[test]
    fn test_delete_unknown_entry() {
        let mut f = fixture();
        assert_eq!(
            f.event.delete_entry(EntryId(999), false).unwrap_err(),
            TimetableError::UnknownEntry(EntryId(999))
        );
    }

    #[test]
    fn test_moving_block_moves_children() {
        let mut f = fixture();
        let entry = f
            .event
            .schedule_contribution(f.talk, at(9, 10), Some(f.block), false)
            .unwrap();
        f.event.update_entry_start(f.block_entry, at(10, 0)).unwrap();
        assert_eq!(f.event.entry(entry).unwrap().start_dt, at(10, 10));
    }

    #[test]
    fn test_scheduling_past_the_end_of_time_is_rejected() {
        let mut f = fixture();
        let late = DateTime::<Utc>::MAX_UTC - Duration::minutes(10);
        let before = f.event.to_snapshot();
        let err = f
            .event
            .schedule_contribution(f.talk, late, None, false)
            .unwrap_err();
        assert!(matches!(err, TimetableError::InvalidField(_)), "got: {err}");
        assert_eq!(f.event.to_snapshot(), before);
    }

    #[test]
    fn test_moving_block_out_of_range_changes_nothing() {
        let mut f = fixture();
        f.event
            .schedule_contribution(f.talk, at(9, 10), Some(f.block), false)
            .unwrap();
        let before = f.event.to_snapshot();
        let late = DateTime::<Utc>::MAX_UTC - Duration::minutes(60);
        // The block itself fits, but its nested talk would end past the limit.
        assert!(f.event.update_entry_start(f.block_entry, late).is_err());
        assert_eq!(f.event.to_snapshot(), before);
    }

    #[test]
    fn test_stretch_rejects_out_of_range_end() {
        let f = fixture();
        let mut block = f.event.entry(f.block_entry).unwrap().clone();
        assert!(stretch_to_cover(&mut block, at(9, 0), i64::MAX).is_err());
        assert_eq!(&block, f.event.entry(f.block_entry).unwrap());
        stretch_to_cover(&mut block, at(9, 30), 60).unwrap();
        assert_eq!(block.end_dt(), at(10, 30));
    }

    #[test]
    fn test_moving_nested_entry_outside_block_extends_it() {
        let mut f = fixture();
        let entry = f
            .event
            .schedule_contribution(f.talk, at(9, 0), Some(f.block), false)
            .unwrap();
        f.event.update_entry_start(entry, at(8, 30)).unwrap();
        let block_entry = f.event.entry(f.block_entry).unwrap();
        assert_eq!(block_entry.start_dt, at(8, 30));
        assert_eq!(block_entry.end_dt(), at(9, 0) + Duration::minutes(60));
    }
}
