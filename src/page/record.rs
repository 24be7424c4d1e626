use cbordata::Cborize;

use crate::types::Tuple;

const RECORD_VER: u32 = 0x00010001;

/// Address of an undo record: which transaction wrote it and its offset
/// within that transaction's undo log (spec §3, Roll pointer).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Cborize)]
pub struct RollPtr {
    pub trx_id: u64,
    pub undo_offset: u64,
}

/// The three system columns every clustered record carries (spec §3).
/// `row_id` is `None` when the clustered key is itself user-unique.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Cborize)]
pub struct SystemFields {
    pub row_id: Option<u64>,
    pub trx_id: u64,
    pub roll_ptr: Option<RollPtr>,
}

impl SystemFields {
    pub const ID: u32 = RECORD_VER;

    pub fn new(trx_id: u64) -> SystemFields {
        SystemFields {
            row_id: None,
            trx_id,
            roll_ptr: None,
        }
    }
}

/// A single physical record stored in a page: a full tuple (row image for
/// clustered indexes, key + clustered-key reference for secondary ones),
/// a delete-mark bit, and — clustered records only — the system fields.
///
/// Secondary records carry no TRX_ID/ROLL_PTR; their delete-mark is the
/// sole mutation state (spec §3 invariants).
#[derive(Clone, Debug, PartialEq, Cborize)]
pub struct Record {
    pub tuple: Tuple,
    pub deleted: bool,
    pub sys: Option<SystemFields>,
}

impl Record {
    pub const ID: u32 = RECORD_VER;

    pub fn new_clustered(tuple: Tuple, sys: SystemFields) -> Record {
        Record {
            tuple,
            deleted: false,
            sys: Some(sys),
        }
    }

    pub fn new_secondary(tuple: Tuple) -> Record {
        Record {
            tuple,
            deleted: false,
            sys: None,
        }
    }

    pub fn get_deleted_flag(&self) -> bool {
        self.deleted
    }

    pub fn set_deleted_flag(&mut self, deleted: bool) {
        self.deleted = deleted;
    }

    pub fn get_n_fields(&self) -> usize {
        self.tuple.len()
    }

    pub fn get_nth_field(&self, i: usize) -> Option<&crate::types::Value> {
        self.tuple.field(i)
    }

    /// Whether a replacement tuple can be applied to this record in
    /// place — every field's encoded length must match (spec §4.2).
    pub fn same_footprint(&self, new_tuple: &Tuple) -> bool {
        if self.tuple.len() != new_tuple.len() {
            return false;
        }
        self.tuple
            .fields()
            .iter()
            .zip(new_tuple.fields().iter())
            .all(|(a, b)| a.length() == b.length())
    }

    pub fn trx_id(&self) -> Option<u64> {
        self.sys.map(|s| s.trx_id)
    }

    pub fn roll_ptr(&self) -> Option<RollPtr> {
        self.sys.and_then(|s| s.roll_ptr)
    }
}
