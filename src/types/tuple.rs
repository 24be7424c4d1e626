use std::cmp::Ordering;

use crate::types::Value;

/// Per-field prefix length, zero meaning "whole field participates in the
/// key" (spec §3, `Index.fields[i]`).
pub type PrefixLens = Vec<usize>;

/// An ordered sequence of typed values, used both as an index entry (its
/// prefix is the comparison key) and as a full row image (spec §3).
#[derive(Clone, Debug, PartialEq)]
pub struct Tuple {
    fields: Vec<Value>,
    /// Number of leading fields considered for comparison; lets a short
    /// search tuple match the `n_unique` key fields of a longer stored
    /// record.
    n_fields_cmp: usize,
}

/// Outcome of [`Tuple::cmp_prefix`]: ordering plus how much of the two
/// tuples' leading fields matched, driving B-tree fast-path decisions
/// (spec §4.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CmpResult {
    pub ordering: Ordering,
    /// Count of leading fields that compared equal.
    pub matched_fields: usize,
    /// Byte length of the common prefix within the first mismatching
    /// field (0 if the mismatching field shares no prefix, e.g. differing
    /// integers).
    pub matched_bytes: usize,
}

impl Tuple {
    pub fn new(fields: Vec<Value>) -> Tuple {
        let n_fields_cmp = fields.len();
        Tuple {
            fields,
            n_fields_cmp,
        }
    }

    /// Build a search tuple that only compares its first `k` fields even
    /// though it may carry more (spec §3, "a short search tuple"); `k`
    /// is typically an index's `n_unique`.
    pub fn with_n_fields_cmp(fields: Vec<Value>, k: usize) -> Tuple {
        Tuple {
            n_fields_cmp: k.min(fields.len()),
            fields,
        }
    }

    pub fn n_fields_cmp(&self) -> usize {
        self.n_fields_cmp
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, i: usize) -> Option<&Value> {
        self.fields.get(i)
    }

    pub fn fields(&self) -> &[Value] {
        &self.fields
    }

    /// Tuple comparison contract (spec §4.1): compare `self` (the search
    /// tuple, `k = n_fields_cmp(self)` leading fields) against `other` (a
    /// stored record). Missing fields in `other` beyond its length
    /// compare *less* than any present field in `self`.
    pub fn cmp_prefix(&self, other: &Tuple, prefix_lens: &[usize]) -> CmpResult {
        let k = self.n_fields_cmp;
        let mut matched_fields = 0;
        for i in 0..k {
            let a = match self.field(i) {
                Some(v) => v,
                None => break,
            };
            let b = match other.field(i) {
                Some(v) => v,
                None => {
                    return CmpResult {
                        ordering: Ordering::Greater,
                        matched_fields,
                        matched_bytes: 0,
                    }
                }
            };
            let prefix_len = prefix_lens.get(i).copied().unwrap_or(0);
            match a.cmp_field(b, prefix_len) {
                Ordering::Equal => matched_fields += 1,
                ord => {
                    let matched_bytes = common_prefix_len(a, b, prefix_len);
                    return CmpResult {
                        ordering: ord,
                        matched_fields,
                        matched_bytes,
                    };
                }
            }
        }
        CmpResult {
            ordering: Ordering::Equal,
            matched_fields,
            matched_bytes: 0,
        }
    }

    /// Convenience wrapper returning only the ordering, for callers that
    /// don't need `matched_fields`/`matched_bytes`.
    pub fn cmp(&self, other: &Tuple, prefix_lens: &[usize]) -> Ordering {
        self.cmp_prefix(other, prefix_lens).ordering
    }
}

fn common_prefix_len(a: &Value, b: &Value, prefix_len: usize) -> usize {
    match (a, b) {
        (Value::Bytes { v: av, .. }, Value::Bytes { v: bv, .. }) => {
            let an = if prefix_len > 0 {
                av.len().min(prefix_len)
            } else {
                av.len()
            };
            let bn = if prefix_len > 0 {
                bv.len().min(prefix_len)
            } else {
                bv.len()
            };
            av[..an].iter().zip(bv[..bn].iter()).take_while(|(x, y)| x == y).count()
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tuple_test {
    use super::*;
    use crate::types::{Collation, PrType};

    fn pr() -> PrType {
        PrType::new(false)
    }

    #[test]
    fn test_cmp_equal_prefix() {
        let a = Tuple::with_n_fields_cmp(vec![Value::int(1, pr())], 1);
        let b = Tuple::new(vec![Value::int(1, pr()), Value::int(99, pr())]);
        let r = a.cmp_prefix(&b, &[0, 0]);
        assert_eq!(r.ordering, Ordering::Equal);
        assert_eq!(r.matched_fields, 1);
    }

    #[test]
    fn test_cmp_missing_field_is_less() {
        let a = Tuple::new(vec![Value::int(1, pr()), Value::int(2, pr())]);
        let b = Tuple::new(vec![Value::int(1, pr())]);
        let r = a.cmp_prefix(&b, &[0, 0]);
        assert_eq!(r.ordering, Ordering::Greater);
        assert_eq!(r.matched_fields, 1);
    }

    #[test]
    fn test_null_sorts_less() {
        let mut pr_null = pr();
        pr_null.nullable = true;
        let a = Tuple::new(vec![Value::null(crate::types::TypeId::Int, pr_null)]);
        let b = Tuple::new(vec![Value::int(0, pr())]);
        assert_eq!(a.cmp(&b, &[0]), Ordering::Less);
    }

    #[test]
    fn test_collation_ci() {
        let mut p = pr();
        p.collation = Collation::Utf8GeneralCi;
        let a = Tuple::new(vec![Value::bytes(crate::types::TypeId::Varchar, b"HELLO".to_vec(), p)]);
        let b = Tuple::new(vec![Value::bytes(crate::types::TypeId::Varchar, b"hello".to_vec(), pr())]);
        assert_eq!(a.cmp(&b, &[0]), Ordering::Equal);
    }
}
