//! Type descriptors, typed field values, and ordered tuples (spec §4.1).
//!
//! A [`Value`] is the unit both of a stored row's column image and of an
//! index key's field. [`Tuple`] composes values into the ordered sequence
//! used as either an index entry or a full row.

mod tuple;
mod value;

pub use tuple::Tuple;
pub use value::{Collation, PrType, TypeId, Value};
