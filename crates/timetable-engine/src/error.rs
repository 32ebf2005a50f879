//! Error types for timetable-engine operations.

use thiserror::Error;

use crate::model::{ContributionId, EntryId, SessionBlockId, SessionId, SubContributionId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimetableError {
    #[error("Unknown contribution: {0}")]
    UnknownContribution(ContributionId),

    #[error("Unknown subcontribution: {0}")]
    UnknownSubContribution(SubContributionId),

    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("Unknown session block: {0}")]
    UnknownSessionBlock(SessionBlockId),

    #[error("Unknown timetable entry: {0}")]
    UnknownEntry(EntryId),

    #[error("Contribution {0} has been deleted")]
    ContributionDeleted(ContributionId),

    #[error("Contribution {0} is already scheduled")]
    AlreadyScheduled(ContributionId),

    #[error("Contribution {0} is not scheduled")]
    NotScheduled(ContributionId),

    #[error("Session block {0} is not scheduled")]
    BlockNotScheduled(SessionBlockId),

    #[error("Contribution {contribution} does not fit in session block {block}")]
    DoesNotFit {
        contribution: ContributionId,
        block: SessionBlockId,
    },

    #[error("Invalid field value: {0}")]
    InvalidField(String),

    #[error("Invalid datetime: {0}")]
    InvalidDatetime(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

pub type Result<T> = std::result::Result<T, TimetableError>;
