use crate::{dict::TableId, page::PageNo};

/// `(column_ref, prefix_len_or_zero)` — a nonzero prefix length means
/// only that many leading bytes of the column participate in the key
/// (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexField {
    pub column: usize,
    pub prefix_len: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKind {
    ClusteredUnique,
    ClusteredNonUnique,
    SecondaryUnique,
    SecondaryNonUnique,
}

impl IndexKind {
    pub fn is_clustered(&self) -> bool {
        matches!(self, IndexKind::ClusteredUnique | IndexKind::ClusteredNonUnique)
    }

    pub fn is_unique(&self) -> bool {
        matches!(self, IndexKind::ClusteredUnique | IndexKind::SecondaryUnique)
    }
}

pub type IndexId = usize;

/// An index definition (spec §3). `n_unique` is the number of leading
/// fields that define uniqueness: for a clustered index this is the
/// primary-key arity, for a secondary unique index it is the
/// user-declared uniqueness arity (the rest of `fields` is the
/// clustered-key reference appended for row lookups).
#[derive(Clone, Debug)]
pub struct Index {
    pub id: IndexId,
    pub name: String,
    pub table: TableId,
    pub kind: IndexKind,
    pub n_fields: usize,
    pub n_unique: usize,
    pub fields: Vec<IndexField>,
    pub tree_root_page: PageNo,
}

impl Index {
    pub fn prefix_lens(&self) -> Vec<usize> {
        self.fields.iter().map(|f| f.prefix_len).collect()
    }
}
