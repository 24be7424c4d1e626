//! Foreign-key cascade planning (spec §4.8 point 2, supplemented per
//! `row0upd.c`'s cascade-update-node construction, SPEC_FULL §C).
//!
//! This module only *plans* what must happen to a referencing table when
//! a referenced key is deleted or its key fields change; turning a plan
//! into actual child statements is the caller's job (`engine`), the same
//! way `que0que.c` roots cascade nodes under the statement that triggered
//! them rather than running them inline here.

use crate::dict::{Catalog, ForeignKeyId, TableId};

/// What must happen to a row in a referencing table (spec §4.8 point 2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CascadeKind {
    /// `ON DELETE/UPDATE CASCADE`: propagate the same operation.
    Cascade,
    /// No cascade flag set: the caller must verify no row still
    /// references the touched key, else reject with `RowIsReferenced`.
    Restrict,
}

#[derive(Clone, Copy, Debug)]
pub struct CascadeAction {
    pub fk: ForeignKeyId,
    pub referencing_table: TableId,
    pub kind: CascadeKind,
}

/// Build the cascade plan for modifying `table`'s referenced key fields
/// (spec §4.8 point 2: "for each foreign key referencing this table's
/// touched index, either the update leaves the referenced key fields
/// untouched, or a constraint check is scheduled").
pub fn plan(catalog: &Catalog, table: TableId, is_delete: bool) -> crate::Result<Vec<CascadeAction>> {
    let t = catalog.table(table)?;
    let mut actions = Vec::with_capacity(t.referenced_fks.len());
    for &fk_id in &t.referenced_fks {
        let fk = catalog.foreign_key(fk_id)?;
        let cascades = if is_delete { fk.cascade_delete } else { fk.cascade_update };
        actions.push(CascadeAction {
            fk: fk_id,
            referencing_table: fk.table,
            kind: if cascades { CascadeKind::Cascade } else { CascadeKind::Restrict },
        });
    }
    Ok(actions)
}

#[cfg(test)]
mod cascade_test {
    use super::*;
    use crate::{
        dict::Column,
        types::{PrType, TypeId},
    };

    #[test]
    fn test_plan_distinguishes_cascade_from_restrict() {
        let mut cat = Catalog::new();
        let parent = cat.create_table("parent", vec![Column::new("id", 0, TypeId::Int, PrType::new(false))]);
        let child = cat.create_table("child", vec![Column::new("parent_id", 0, TypeId::Int, PrType::new(false))]);
        cat.add_foreign_key(child, "fk_child_parent", parent, vec![0], vec![0], true, false);

        let actions = plan(&cat, parent, true).unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, CascadeKind::Cascade);

        let actions = plan(&cat, parent, false).unwrap();
        assert_eq!(actions[0].kind, CascadeKind::Restrict);
    }
}
