use cbordata::Cborize;

use std::cmp::Ordering;

const VALUE_VER: u32 = 0x00010001;

/// Type identifier for a column or a literal field value.
///
/// `SysRowId`, `SysTrxId`, `SysRollPtr` identify the three system columns
/// carried by every clustered record (spec §3, Table invariant).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Cborize)]
pub enum TypeId {
    Int,
    Varchar,
    Char,
    FixBinary,
    Binary,
    Blob,
    SysRowId,
    SysTrxId,
    SysRollPtr,
}

impl TypeId {
    pub const ID: u32 = VALUE_VER;

    /// Fields with a statically known width never need a length prefix
    /// when stored in a page.
    pub fn is_fixed_width(&self) -> bool {
        matches!(
            self,
            TypeId::Int
                | TypeId::Char
                | TypeId::FixBinary
                | TypeId::SysRowId
                | TypeId::SysTrxId
                | TypeId::SysRollPtr
        )
    }

    /// Whether this type's bytes compare under a collation (strings) or
    /// as unsigned bitwise binary (everything else).
    pub fn is_textual(&self) -> bool {
        matches!(self, TypeId::Varchar | TypeId::Char)
    }
}

/// Collation or charset identifier for textual types. `Binary` means
/// byte-for-byte unsigned comparison rather than locale collation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Cborize)]
pub enum Collation {
    Binary,
    Utf8Bin,
    Utf8GeneralCi,
}

impl Collation {
    pub const ID: u32 = VALUE_VER;

    fn cmp_bytes(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            Collation::Binary | Collation::Utf8Bin => a.cmp(b),
            Collation::Utf8GeneralCi => {
                let la = a.iter().map(u8::to_ascii_lowercase);
                let lb = b.iter().map(u8::to_ascii_lowercase);
                la.cmp(lb)
            }
        }
    }
}

/// `prtype`: nullability, signedness, and collation packed together the
/// way InnoDB's `dtype_t` packs them, kept as plain fields here since this
/// crate has no on-disk bit-packed format to match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Cborize)]
pub struct PrType {
    pub nullable: bool,
    pub unsigned: bool,
    pub collation: Collation,
}

impl PrType {
    pub const ID: u32 = VALUE_VER;

    pub fn new(nullable: bool) -> PrType {
        PrType {
            nullable,
            unsigned: false,
            collation: Collation::Binary,
        }
    }
}

/// A distinguished NULL has no bytes and a sentinel length; SQL NULL
/// sorts less than any non-NULL value of the same type (spec §4.1).
#[derive(Clone, Debug, PartialEq, Cborize)]
pub enum Value {
    Null { type_id: TypeId, prtype: PrType },
    Int { prtype: PrType, v: i64 },
    Bytes {
        type_id: TypeId,
        prtype: PrType,
        v: Vec<u8>,
    },
}

impl Value {
    pub const ID: u32 = VALUE_VER;

    pub fn null(type_id: TypeId, prtype: PrType) -> Value {
        Value::Null { type_id, prtype }
    }

    pub fn int(v: i64, prtype: PrType) -> Value {
        Value::Int { prtype, v }
    }

    pub fn bytes(type_id: TypeId, v: Vec<u8>, prtype: PrType) -> Value {
        Value::Bytes { type_id, prtype, v }
    }

    pub fn type_id(&self) -> TypeId {
        match self {
            Value::Null { type_id, .. } => *type_id,
            Value::Int { .. } => TypeId::Int,
            Value::Bytes { type_id, .. } => *type_id,
        }
    }

    pub fn prtype(&self) -> &PrType {
        match self {
            Value::Null { prtype, .. } => prtype,
            Value::Int { prtype, .. } => prtype,
            Value::Bytes { prtype, .. } => prtype,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null { .. })
    }

    /// Field length including the SQL-NULL sentinel (spec §4.1). A NULL's
    /// sentinel is distinct from any valid non-NULL length, here `usize::MAX`.
    pub fn length(&self) -> usize {
        match self {
            Value::Null { .. } => usize::MAX,
            Value::Int { .. } => 8,
            Value::Bytes { v, .. } => v.len(),
        }
    }

    /// Apply an optional key-prefix length: only the leading `n` bytes of
    /// a textual/binary value participate in the comparison (spec §3,
    /// `Index.fields[i].prefix_len_or_zero`).
    fn prefixed(&self, prefix_len: usize) -> &[u8] {
        match self {
            Value::Bytes { v, .. } if prefix_len > 0 => {
                let n = prefix_len.min(v.len());
                &v[..n]
            }
            Value::Bytes { v, .. } => v,
            _ => &[],
        }
    }

    /// Pairwise comparison of two field values under `prtype` collation
    /// (strings) or unsigned-bitwise order (binary types). NULLs sort
    /// less than any non-NULL value (spec §4.1).
    pub fn cmp_field(&self, other: &Value, prefix_len: usize) -> Ordering {
        match (self, other) {
            (Value::Null { .. }, Value::Null { .. }) => Ordering::Equal,
            (Value::Null { .. }, _) => Ordering::Less,
            (_, Value::Null { .. }) => Ordering::Greater,
            (Value::Int { v: a, .. }, Value::Int { v: b, .. }) => a.cmp(b),
            (Value::Bytes { .. }, Value::Bytes { .. }) => {
                let a = self.prefixed(prefix_len);
                let b = other.prefixed(prefix_len);
                self.prtype().collation.cmp_bytes(a, b)
            }
            // Mixed-type comparison never happens on a well-typed index;
            // treat as incomparable-but-total to keep cmp total.
            _ => Ordering::Equal,
        }
    }

    /// Binary equality under the declared collation-or-binary rule.
    pub fn eq_field(&self, other: &Value, prefix_len: usize) -> bool {
        self.cmp_field(other, prefix_len) == Ordering::Equal
    }
}
