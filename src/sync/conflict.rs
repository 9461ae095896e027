//! Version-based conflict detection.
//!
//! Detection and resolution are separate: [`detect_conflict`] only says
//! whether two copies disagree, and [`Resolution::for_direction`] says which
//! copy a segment keeps. Pull keeps the remote copy, push keeps the local one,
//! so a record edited on both sides between syncs ends up with whichever
//! direction ran last. There is no field-level merge.

use super::record::SyncRecord;
use super::types::SyncDirection;

/// Returns true when the two copies carry different versions.
///
/// A missing or `null` version reads as 0, so 0 and absent agree but absent
/// and 3 do not. A malformed version never equals a well-formed one; callers
/// validate versions first when they need to report them as record errors.
pub fn detect_conflict(local: &SyncRecord, remote: &SyncRecord) -> bool {
    local.version().ok() != remote.version().ok()
}

/// Which copy a direction segment writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    KeepLocal,
    KeepRemote,
}

impl Resolution {
    pub fn for_direction(direction: SyncDirection) -> Resolution {
        match direction {
            SyncDirection::Push => Resolution::KeepLocal,
            // Bidirectional runs pull first, so remote wins the first segment.
            SyncDirection::Pull | SyncDirection::Bidirectional => Resolution::KeepRemote,
        }
    }
}
