//! txnrow is the core row write-path of a transactional storage engine
//! of the kind embedded into an SQL server: clustered and secondary
//! B-tree indexes, a per-transaction undo log driving multi-version
//! concurrent reads, row-level locking with deadlock detection, and the
//! insert/update/delete choreography that ties them together.
//!
//! Out of scope: the SQL parser, the on-disk buffer pool / redo log /
//! file manager (stood in for by [`buffer`]), and query planning.
//!
//! Dependency order, leaves first: [`types`] and [`page`] describe the
//! physical record format; [`btree`] builds balanced trees out of pages;
//! [`lock`] and [`mvcc`] provide the transactional machinery the row
//! path in [`row`] choreographs; [`qgraph`] is the cooperative execution
//! skeleton a statement runs under; [`txn`] and [`engine`] wire
//! everything into something an embedder can actually call.

pub mod btree;
pub mod buffer;
pub mod dict;
mod error;
pub mod engine;
pub mod lock;
pub mod mvcc;
pub mod page;
pub mod qgraph;
pub mod row;
pub mod txn;
pub mod types;
pub mod util;

pub use crate::error::{Error, Result};
