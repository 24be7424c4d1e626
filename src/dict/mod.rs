//! The table/column/index catalog (spec §3, §9).
//!
//! `table <-> index <-> column <-> foreign_key` naturally forms a web of
//! cyclic references in the original design; per spec §9 this is
//! replaced with an arena (`Catalog`) holding all definitions, with
//! plain integer ids for back-references instead of pointers/`Rc`.

mod column;
mod index;
mod table;

pub use column::Column;
pub use index::{Index, IndexField, IndexId, IndexKind};
pub use table::{ForeignKey, ForeignKeyId, Table, TableId};

use crate::{err_at, page::PageNo, Result};

/// `dict_sys`: the arena owning every table, index, and foreign-key
/// definition. Cloned handles (`Catalog` is not `Clone`; callers keep a
/// shared reference, e.g. behind an `Arc<RwLock<Catalog>>`, wired up by
/// `engine::Engine`) see a consistent snapshot of the schema.
#[derive(Default)]
pub struct Catalog {
    tables: Vec<Table>,
    indexes: Vec<Index>,
    foreign_keys: Vec<ForeignKey>,
}

impl Catalog {
    pub fn new() -> Catalog {
        Catalog::default()
    }

    pub fn create_table(&mut self, name: &str, columns: Vec<Column>) -> TableId {
        let id = self.tables.len();
        self.tables.push(Table {
            id,
            name: name.to_string(),
            columns,
            indexes: Vec::new(),
            referenced_fks: Vec::new(),
            outgoing_fks: Vec::new(),
        });
        id
    }

    pub fn add_index(
        &mut self,
        table: TableId,
        name: &str,
        kind: IndexKind,
        n_unique: usize,
        fields: Vec<IndexField>,
        tree_root_page: PageNo,
    ) -> Result<IndexId> {
        let n_fields = fields.len();
        let id = self.indexes.len();
        self.indexes.push(Index {
            id,
            name: name.to_string(),
            table,
            kind,
            n_fields,
            n_unique,
            fields,
            tree_root_page,
        });
        let t = self
            .tables
            .get_mut(table)
            .ok_or(())
            .map_err(|_| crate::Error::InvalidInput(file!().into(), line!(), "no such table".into()))?;
        t.indexes.push(id);
        Ok(id)
    }

    pub fn add_foreign_key(
        &mut self,
        table: TableId,
        name: &str,
        referenced_table: TableId,
        columns: Vec<usize>,
        referenced_columns: Vec<usize>,
        cascade_delete: bool,
        cascade_update: bool,
    ) -> ForeignKeyId {
        let id = self.foreign_keys.len();
        self.foreign_keys.push(ForeignKey {
            id,
            name: name.to_string(),
            table,
            referenced_table,
            columns,
            referenced_columns,
            cascade_delete,
            cascade_update,
        });
        self.tables[table].outgoing_fks.push(id);
        self.tables[referenced_table].referenced_fks.push(id);
        id
    }

    pub fn table(&self, id: TableId) -> Result<&Table> {
        self.tables
            .get(id)
            .ok_or(())
            .or_else(|_| err_at!(InvalidInput, msg: "no such table {}", id))
    }

    pub fn index(&self, id: IndexId) -> Result<&Index> {
        self.indexes
            .get(id)
            .ok_or(())
            .or_else(|_| err_at!(InvalidInput, msg: "no such index {}", id))
    }

    pub fn index_mut(&mut self, id: IndexId) -> Result<&mut Index> {
        self.indexes
            .get_mut(id)
            .ok_or(())
            .or_else(|_| err_at!(InvalidInput, msg: "no such index {}", id))
    }

    pub fn foreign_key(&self, id: ForeignKeyId) -> Result<&ForeignKey> {
        self.foreign_keys
            .get(id)
            .ok_or(())
            .or_else(|_| err_at!(InvalidInput, msg: "no such foreign key {}", id))
    }

    pub fn table_indexes(&self, table: TableId) -> &[IndexId] {
        &self.tables[table].indexes
    }
}

#[cfg(test)]
mod dict_test {
    use super::*;
    use crate::types::{PrType, TypeId};

    #[test]
    fn test_create_table_and_index() {
        let mut cat = Catalog::new();
        let cols = vec![
            Column::new("a", 0, TypeId::Int, PrType::new(false)),
            Column::new("b", 1, TypeId::Int, PrType::new(true)),
        ];
        let t = cat.create_table("t", cols);
        let idx = cat
            .add_index(
                t,
                "PRIMARY",
                IndexKind::ClusteredUnique,
                1,
                vec![IndexField { column: 0, prefix_len: 0 }],
                1,
            )
            .unwrap();
        assert_eq!(cat.table(t).unwrap().clustered_index(), idx);
    }
}
