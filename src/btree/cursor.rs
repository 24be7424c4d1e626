use crate::{page::PageNo, types::Tuple};

/// Where a cursor sits relative to the record it last pointed at —
/// needed so [`PersistentCursor::restore`] knows which neighbour to fall
/// back to if that exact record was purged (spec §3, §4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelPosition {
    Before,
    On,
    After,
}

/// A cursor's position after a descent: the leaf page, the slot within
/// it, and the match lengths the caller needs to decide duplicate-key
/// and modify-vs-insert questions without further comparisons (spec
/// §4.3).
#[derive(Clone, Debug)]
pub struct Cursor {
    pub page_no: PageNo,
    /// Slot of the record the cursor lands on (the first record
    /// matching the search mode); `None` means infimum/supremum, i.e.
    /// an empty leaf or a search that ran off one end.
    pub slot: Option<usize>,
    /// Number of leading fields of the search tuple that agree with
    /// the record at `slot`.
    pub low_match: usize,
    /// Number of leading fields of the search tuple that agree with
    /// the record immediately after `slot`.
    pub up_match: usize,
}

impl Cursor {
    pub fn is_on_user_record(&self) -> bool {
        self.slot.is_some()
    }
}

/// A logical position in an index surviving latch release (spec §3,
/// §4.3). `store()` copies the key at the cursor; `restore()` re-descends
/// to find it (or the nearest record in `relative_position`'s direction)
/// once latches have been reacquired.
#[derive(Clone, Debug)]
pub struct PersistentCursor {
    pub key: Tuple,
    pub relative_position: RelPosition,
}

impl PersistentCursor {
    pub fn store(key: Tuple, relative_position: RelPosition) -> PersistentCursor {
        PersistentCursor {
            key,
            relative_position,
        }
    }
}
