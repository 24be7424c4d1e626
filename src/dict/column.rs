use crate::types::{PrType, TypeId};

/// A column definition (spec §3).
#[derive(Clone, Debug)]
pub struct Column {
    pub name: String,
    pub position: usize,
    pub type_id: TypeId,
    pub prtype: PrType,
    /// Position of this column within the clustered key, if it is part
    /// of one.
    pub clustered_key_pos: Option<usize>,
    /// True if this column participates in the key of any index.
    pub ord_part: bool,
}

impl Column {
    pub fn new(name: &str, position: usize, type_id: TypeId, prtype: PrType) -> Column {
        Column {
            name: name.to_string(),
            position,
            type_id,
            prtype,
            clustered_key_pos: None,
            ord_part: false,
        }
    }
}
