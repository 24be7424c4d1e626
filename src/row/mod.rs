//! Row-level write path (spec §4.7, §4.8): the choreography between the
//! catalog, the per-index B-trees, the lock manager, and the undo log
//! that an INSERT/UPDATE/DELETE statement actually executes.

pub mod insert;
pub mod update;

pub use insert::{InsertDisposition, RowInsert};
pub use update::{RowDelete, RowUpdate};
