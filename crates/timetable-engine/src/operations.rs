//! Contribution and subcontribution editing.
//!
//! Every operation validates its input before touching the event, so a
//! returned error leaves the event as it was. Successful operations write an
//! audit record to the event log and a `tracing` event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::consistency::ensure_consistency;
use crate::error::{Result, TimetableError};
use crate::event::{check_duration, check_sub_duration, Event};
use crate::log::{make_diff_log, ChangedField, FieldChange, LogKind, LogRealm};
use crate::model::{
    add_minutes, Contribution, ContributionId, EntryId, SessionBlockId, SessionId,
    SubContribution, SubContributionId,
};
use crate::scheduling::{out_of_range, stretch_to_cover, Scheduler};

const CONTRIBUTIONS: &str = "Contributions";
const SUBCONTRIBUTIONS: &str = "Subcontributions";

// ── Inputs and outputs ──────────────────────────────────────────────────────

/// Data for [`create_contribution`].
#[derive(Debug, Clone, Default)]
pub struct NewContribution {
    pub title: String,
    pub description: String,
    /// Falls back to the session's default duration, then the event's.
    pub duration_minutes: Option<i64>,
    pub session: Option<SessionId>,
    pub board_number: String,
    pub code: String,
    pub keywords: Vec<String>,
    /// Schedule the new contribution right away.
    pub start_dt: Option<DateTime<Utc>>,
    /// Block to schedule into; ignored without `start_dt`.
    pub session_block: Option<SessionBlockId>,
    pub extend_parent: bool,
}

/// Fields to change in [`update_contribution`]; `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct ContributionUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub duration_minutes: Option<i64>,
    /// `Some(None)` takes the contribution out of its session.
    pub session: Option<Option<SessionId>>,
    pub board_number: Option<String>,
    pub code: Option<String>,
    pub keywords: Option<Vec<String>>,
    /// Move the contribution's timetable entry.
    pub start_dt: Option<DateTime<Utc>>,
}

/// What a caller needs to put an unscheduled contribution back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoUnschedule {
    /// Previous start time, RFC 3339.
    pub start_dt: String,
    pub contribution_id: ContributionId,
    /// Block the contribution was in before the update, if any.
    pub session_block_id: Option<SessionBlockId>,
    /// Stretch the block if the contribution no longer fits.
    pub force: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateOutcome {
    /// The update left the contribution in a place it may not be, so it was
    /// removed from the timetable.
    pub unscheduled: bool,
    pub undo_unschedule: Option<UndoUnschedule>,
}

#[derive(Debug, Clone, Default)]
pub struct SubContributionUpdate {
    pub title: Option<String>,
    pub duration_minutes: Option<i64>,
}

// ── Contributions ───────────────────────────────────────────────────────────

/// Add a contribution to the event, optionally scheduling it.
///
/// # Errors
///
/// Validation errors for an empty title, an unknown session or a
/// non-positive duration; any scheduling error from
/// [`Scheduler::schedule_contribution`], in which case the contribution is
/// not created.
pub fn create_contribution(event: &mut Event, new: NewContribution) -> Result<ContributionId> {
    check_title(&new.title)?;
    let session_default = match new.session {
        Some(session) => Some(
            event
                .session(session)
                .ok_or(TimetableError::UnknownSession(session))?
                .default_contribution_duration_minutes,
        ),
        None => None,
    };
    let duration = new
        .duration_minutes
        .or(session_default)
        .unwrap_or(event.default_contribution_minutes);
    check_duration(duration)?;

    let counters = event.id_counters();
    let id = ContributionId(event.allocate_id());
    let friendly_id = event.allocate_friendly_id();
    event.contributions.insert(
        id,
        Contribution {
            id,
            friendly_id,
            title: new.title,
            description: new.description,
            duration_minutes: duration,
            session: new.session,
            session_block: None,
            board_number: new.board_number,
            code: new.code,
            keywords: new.keywords,
            is_deleted: false,
            subcontributions: Vec::new(),
        },
    );

    if let Some(start_dt) = new.start_dt {
        if let Err(err) =
            event.schedule_contribution(id, start_dt, new.session_block, new.extend_parent)
        {
            event.contributions.remove(&id);
            event.restore_id_counters(counters);
            return Err(err);
        }
    }

    let verbose = verbose_title(event, id);
    info!(contribution = %id, title = %verbose, "Contribution created");
    event.log.record(
        LogRealm::Management,
        LogKind::Positive,
        CONTRIBUTIONS,
        format!("Contribution {verbose} has been created"),
        Value::Null,
    );
    Ok(id)
}

/// Update a contribution.
///
/// When the update touches the session, the timetable placement is checked
/// with [`ensure_consistency`]. If that unschedules the contribution the
/// outcome carries an [`UndoUnschedule`] with the placement from before the
/// update, which [`apply_undo`] turns back into a timetable entry.
///
/// # Errors
///
/// Unknown or deleted contribution, unknown session, invalid field values,
/// or [`TimetableError::NotScheduled`] when moving an unscheduled
/// contribution.
pub fn update_contribution(
    event: &mut Event,
    id: ContributionId,
    update: ContributionUpdate,
) -> Result<UpdateOutcome> {
    let contrib = event
        .contribution(id)
        .ok_or(TimetableError::UnknownContribution(id))?;
    if contrib.is_deleted {
        return Err(TimetableError::ContributionDeleted(id));
    }
    if let Some(title) = &update.title {
        check_title(title)?;
    }
    if let Some(minutes) = update.duration_minutes {
        check_duration(minutes)?;
    }
    if let Some(Some(session)) = update.session {
        if event.session(session).is_none() {
            return Err(TimetableError::UnknownSession(session));
        }
    }
    let entry = event
        .entry_for_contribution(id)
        .map(|e| (e.id, e.start_dt, e.duration_minutes));
    if update.start_dt.is_some() && entry.is_none() {
        return Err(TimetableError::NotScheduled(id));
    }
    if let Some((_, start_dt, minutes)) = entry {
        let start_dt = update.start_dt.unwrap_or(start_dt);
        let minutes = update.duration_minutes.unwrap_or(minutes);
        if add_minutes(start_dt, minutes).is_none() {
            return Err(out_of_range(start_dt, minutes));
        }
    }
    let current_session_block = contrib.session_block;

    let mut changes = Vec::new();

    // A move is a timetable change and stays out of the contribution diff.
    if let (Some(start_dt), Some((entry_id, old_start, _))) = (update.start_dt, entry) {
        if start_dt != old_start {
            event.update_entry_start(entry_id, start_dt)?;
        }
    }

    if let Some(minutes) = update.duration_minutes {
        let contrib = event.contribution_mut(id)?;
        if contrib.duration_minutes != minutes {
            changes.push(FieldChange::new(
                ChangedField::Duration,
                contrib.duration_minutes,
                minutes,
            ));
            contrib.duration_minutes = minutes;
            if let Some((entry_id, _, _)) = entry {
                resize_entry(event, entry_id, minutes)?;
            }
        }
    }

    if let Some(session) = update.session {
        let old = event.contribution_mut(id)?.session;
        if old != session {
            changes.push(FieldChange::new(
                ChangedField::Session,
                event.session_title(old),
                event.session_title(session),
            ));
            event.contribution_mut(id)?.session = session;
        }
    }

    let contrib = event.contribution_mut(id)?;
    apply_text(&mut changes, ChangedField::Title, &mut contrib.title, update.title);
    apply_text(
        &mut changes,
        ChangedField::Description,
        &mut contrib.description,
        update.description,
    );
    apply_text(
        &mut changes,
        ChangedField::BoardNumber,
        &mut contrib.board_number,
        update.board_number,
    );
    apply_text(&mut changes, ChangedField::Code, &mut contrib.code, update.code);
    if let Some(keywords) = update.keywords {
        if contrib.keywords != keywords {
            changes.push(FieldChange::new(
                ChangedField::Keywords,
                json!(contrib.keywords),
                json!(keywords),
            ));
            contrib.keywords = keywords;
        }
    }

    let mut outcome = UpdateOutcome::default();
    if update.session.is_some() {
        let start_dt = event.entry_for_contribution(id).map(|e| e.start_dt);
        if let Some(start_dt) = start_dt {
            if ensure_consistency(event, id) {
                outcome.unscheduled = true;
                outcome.undo_unschedule = Some(UndoUnschedule {
                    start_dt: start_dt.to_rfc3339(),
                    contribution_id: id,
                    session_block_id: current_session_block,
                    force: true,
                });
                debug!(contribution = %id, "unscheduled contribution after session change");
            }
        }
    }

    if !changes.is_empty() {
        info!(contribution = %id, changes = changes.len(), "Contribution updated");
        log_contribution_update(event, id, &changes);
    }
    Ok(outcome)
}

/// Put a contribution back where it was before an update unscheduled it.
///
/// The contribution's session is reset to the one owning the previous
/// block (no session for a top-level placement) and it is scheduled again
/// at the previous start time, stretching the block when `force` is set.
///
/// # Errors
///
/// [`TimetableError::InvalidDatetime`] for a malformed start time, plus
/// any error from [`Scheduler::schedule_contribution`]. On error the
/// contribution's session is left unchanged.
pub fn apply_undo(event: &mut Event, undo: &UndoUnschedule) -> Result<EntryId> {
    let start_dt = DateTime::parse_from_rfc3339(&undo.start_dt)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TimetableError::InvalidDatetime(format!("'{}': {}", undo.start_dt, e)))?;
    let session = match undo.session_block_id {
        Some(block) => Some(
            event
                .session_block(block)
                .ok_or(TimetableError::UnknownSessionBlock(block))?
                .session,
        ),
        None => None,
    };

    let id = undo.contribution_id;
    let old_session = event.live_contribution_mut(id)?.session;
    event.contribution_mut(id)?.session = session;

    let entry = match event.schedule_contribution(id, start_dt, undo.session_block_id, undo.force)
    {
        Ok(entry) => entry,
        Err(err) => {
            event.contribution_mut(id)?.session = old_session;
            return Err(err);
        }
    };

    info!(contribution = %id, entry = %entry, "Contribution rescheduled");
    if old_session != session {
        let change = FieldChange::new(
            ChangedField::Session,
            event.session_title(old_session),
            event.session_title(session),
        );
        log_contribution_update(event, id, &[change]);
    }
    Ok(entry)
}

/// Mark a contribution deleted and remove it from the timetable.
///
/// The timetable removal is not logged separately.
pub fn delete_contribution(event: &mut Event, id: ContributionId) -> Result<()> {
    event.live_contribution_mut(id)?.is_deleted = true;
    if let Some(entry) = event.entry_for_contribution(id).map(|e| e.id) {
        event.delete_entry(entry, false)?;
    }
    let verbose = verbose_title(event, id);
    info!(contribution = %id, title = %verbose, "Contribution deleted");
    event.log.record(
        LogRealm::Management,
        LogKind::Negative,
        CONTRIBUTIONS,
        format!("Contribution {verbose} has been deleted"),
        Value::Null,
    );
    Ok(())
}

fn log_contribution_update(event: &mut Event, id: ContributionId, changes: &[FieldChange]) {
    let extra = match changes {
        [only] => format!(" ({})", only.field.title()),
        _ => String::new(),
    };
    let verbose = verbose_title(event, id);
    event.log.record(
        LogRealm::Management,
        LogKind::Change,
        CONTRIBUTIONS,
        format!("Contribution {verbose} has been updated{extra}"),
        make_diff_log(changes),
    );
}

// ── Subcontributions ────────────────────────────────────────────────────────

pub fn create_subcontribution(
    event: &mut Event,
    contribution: ContributionId,
    title: &str,
    duration_minutes: i64,
) -> Result<SubContributionId> {
    check_title(title)?;
    check_sub_duration(duration_minutes)?;
    event.live_contribution_mut(contribution)?;
    let id = event.next_subcontribution_id();
    event
        .live_contribution_mut(contribution)?
        .subcontributions
        .push(SubContribution {
            id,
            title: title.to_string(),
            duration_minutes,
            is_deleted: false,
        });
    info!(contribution = %contribution, subcontribution = %id, "Subcontribution created");
    log_subcontribution(event, LogKind::Positive, id, title, "created");
    Ok(id)
}

pub fn update_subcontribution(
    event: &mut Event,
    contribution: ContributionId,
    id: SubContributionId,
    update: SubContributionUpdate,
) -> Result<()> {
    if let Some(title) = &update.title {
        check_title(title)?;
    }
    if let Some(minutes) = update.duration_minutes {
        check_sub_duration(minutes)?;
    }
    let sub = live_subcontribution_mut(event, contribution, id)?;
    if let Some(title) = update.title {
        sub.title = title;
    }
    if let Some(minutes) = update.duration_minutes {
        sub.duration_minutes = minutes;
    }
    let title = sub.title.clone();
    info!(contribution = %contribution, subcontribution = %id, "Subcontribution updated");
    log_subcontribution(event, LogKind::Change, id, &title, "updated");
    Ok(())
}

pub fn delete_subcontribution(
    event: &mut Event,
    contribution: ContributionId,
    id: SubContributionId,
) -> Result<()> {
    let sub = live_subcontribution_mut(event, contribution, id)?;
    sub.is_deleted = true;
    let title = sub.title.clone();
    info!(contribution = %contribution, subcontribution = %id, "Subcontribution deleted");
    log_subcontribution(event, LogKind::Negative, id, &title, "deleted");
    Ok(())
}

fn live_subcontribution_mut(
    event: &mut Event,
    contribution: ContributionId,
    id: SubContributionId,
) -> Result<&mut SubContribution> {
    event
        .live_contribution_mut(contribution)?
        .subcontribution_mut(id)
        .filter(|s| !s.is_deleted)
        .ok_or(TimetableError::UnknownSubContribution(id))
}

fn log_subcontribution(
    event: &mut Event,
    kind: LogKind,
    id: SubContributionId,
    title: &str,
    verb: &str,
) {
    event.log.record(
        LogRealm::Management,
        kind,
        SUBCONTRIBUTIONS,
        format!("Subcontribution \"{title}\" has been {verb}"),
        json!({ "subcontribution_id": id }),
    );
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn check_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(TimetableError::InvalidField("title must not be empty".into()));
    }
    Ok(())
}

fn apply_text(
    changes: &mut Vec<FieldChange>,
    field: ChangedField,
    current: &mut String,
    new: Option<String>,
) {
    if let Some(new) = new {
        if *current != new {
            changes.push(FieldChange::new(field, current.as_str(), new.as_str()));
            *current = new;
        }
    }
}

fn resize_entry(event: &mut Event, entry: EntryId, minutes: i64) -> Result<()> {
    let Some(current) = event.entries.get_mut(&entry) else {
        return Ok(());
    };
    current.duration_minutes = minutes;
    let (parent, start_dt) = (current.parent, current.start_dt);
    if let Some(parent) = parent.and_then(|p| event.entries.get_mut(&p)) {
        if !parent.covers(start_dt, minutes) {
            stretch_to_cover(parent, start_dt, minutes)?;
        }
    }
    Ok(())
}

fn verbose_title(event: &Event, id: ContributionId) -> String {
    event
        .contribution(id)
        .map(|c| c.verbose_title())
        .unwrap_or_else(|| id.to_string())
}
