//! Keeping contribution session assignments and the timetable in agreement.
//!
//! A contribution without a session may only sit at the top level of the
//! timetable. A contribution with a session may only sit inside a block of
//! that session, and the block it sits in must be the contribution's own
//! session block. Editing a contribution's session can break this; the
//! checker repairs it by unscheduling the contribution.
//!
//! The repair never writes an audit record: the edit that caused it is
//! logged by its caller, and the unscheduling is reported back through the
//! return value so the caller can offer to undo it.

use serde::Serialize;

use crate::event::Event;
use crate::model::{ContributionId, SessionBlockId, SessionId, TimetableEntry};
use crate::scheduling::Scheduler;

/// Why a scheduled contribution disagrees with its place in the timetable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Inconsistency {
    /// Top-level entry, but the contribution has a session or block set.
    SessionOnTopLevel,
    /// Nested entry, but the contribution has no session or no block.
    NotInSession,
    /// Nested entry in a block of a different session.
    WrongSession,
    /// Nested entry in the right session but another block of it.
    WrongBlock,
}

/// Classify the contribution's timetable placement without changing anything.
///
/// Returns `None` for unknown or unscheduled contributions and for
/// consistent placements.
pub fn check_consistency(event: &Event, contribution: ContributionId) -> Option<Inconsistency> {
    let contrib = event.contribution(contribution)?;
    let entry = event.entry_for_contribution(contribution)?;
    classify(event, entry, contrib.session, contrib.session_block)
}

fn classify(
    event: &Event,
    entry: &TimetableEntry,
    session: Option<SessionId>,
    session_block: Option<SessionBlockId>,
) -> Option<Inconsistency> {
    if entry.is_top_level() {
        return (session.is_some() || session_block.is_some())
            .then_some(Inconsistency::SessionOnTopLevel);
    }
    // A nested entry whose parent carries no block can never be consistent.
    let Some(parent) = event.parent_block(entry) else {
        return Some(Inconsistency::NotInSession);
    };
    match (session, session_block) {
        (None, _) | (_, None) => Some(Inconsistency::NotInSession),
        (Some(s), _) if s != parent.session => Some(Inconsistency::WrongSession),
        (_, Some(b)) if b != parent.id => Some(Inconsistency::WrongBlock),
        _ => None,
    }
}

/// Unschedule the contribution if its placement is inconsistent.
///
/// Returns `true` iff the timetable entry was removed. The entry is deleted
/// through [`Scheduler::delete_entry`] with logging disabled; the
/// contribution itself is kept. Calling this again right after it returned
/// `true` returns `false`, as there is no entry left to check.
pub fn ensure_consistency(event: &mut Event, contribution: ContributionId) -> bool {
    if check_consistency(event, contribution).is_none() {
        return false;
    }
    let Some(entry) = event.entry_for_contribution(contribution).map(|e| e.id) else {
        return false;
    };
    event.delete_entry(entry, false).is_ok()
}

/// Every live, scheduled contribution whose placement is inconsistent.
pub fn find_inconsistencies(event: &Event) -> Vec<(ContributionId, Inconsistency)> {
    event
        .contributions()
        .filter_map(|c| check_consistency(event, c.id).map(|kind| (c.id, kind)))
        .collect()
}
