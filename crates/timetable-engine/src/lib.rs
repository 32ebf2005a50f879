//! # timetable-engine
//!
//! Conference timetable model with contribution editing.
//!
//! Contributions (talks, posters, ...) belong optionally to a session and are
//! placed in a two-level timetable: top-level slots, and slots nested inside
//! session blocks. Editing a contribution's session can leave it in a slot it
//! may no longer occupy; the consistency checker detects that and unschedules
//! it, handing back the data needed to undo the change.
//!
//! ## Modules
//!
//! - [`model`] — Identifiers, sessions, blocks, contributions, timetable entries
//! - [`event`] — The event aggregate and its serialized snapshot
//! - [`scheduling`] — Scheduling, moving and deleting timetable entries
//! - [`consistency`] — Session/timetable consistency checks
//! - [`operations`] — Audited contribution and subcontribution edits
//! - [`log`] — Event audit log
//! - [`error`] — Error types

pub mod consistency;
pub mod error;
pub mod event;
pub mod log;
pub mod model;
pub mod operations;
pub mod scheduling;

pub use consistency::{check_consistency, ensure_consistency, find_inconsistencies, Inconsistency};
pub use error::TimetableError;
pub use event::{Event, EventSnapshot};
pub use log::{EventLog, LogEntry, LogKind, LogRealm};
pub use model::{
    Contribution, ContributionId, EntryId, EntryObject, Session, SessionBlock, SessionBlockId,
    SessionId, SubContribution, SubContributionId, TimetableEntry,
};
pub use operations::{
    apply_undo, create_contribution, create_subcontribution, delete_contribution,
    delete_subcontribution, update_contribution, update_subcontribution, ContributionUpdate,
    NewContribution, SubContributionUpdate, UndoUnschedule, UpdateOutcome,
};
pub use scheduling::Scheduler;
