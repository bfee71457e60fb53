//! Canonical structural hash of contexts.
//!
//! The hash is the only mechanism used to decide whether the context that
//! produced a cached resolution still matches the context in effect. It must be
//! a pure function of structural content: map iteration order never leaks in.
//!
//! # Encoding
//!
//! Keys are visited in lexicographic order at every nesting level. Each key is
//! fed as its length-prefixed UTF-8 bytes, followed by the value's tag byte and
//! payload:
//!
//! ```text
//! bool       TAG_BOOL      [0|1]
//! string     TAG_STRING    [len: u64 LE][utf-8]
//! int        TAG_INT       [i64 LE]
//! double     TAG_DOUBLE    [f64 bits LE]
//! date       TAG_DATE      [year: i32 LE][month: u8][day: u8]
//! timestamp  TAG_TIMESTAMP [secs: i64 LE][nanos: u32 LE]
//! list       TAG_LIST      [count: u64 LE] elements in original order
//! struct     TAG_STRUCT    [count: u64 LE] sorted entries
//! null       TAG_NULL
//! ```
//!
//! The digest is BLAKE3, rendered as lowercase hex.

use chrono::Datelike;

use crate::value::{Struct, Value};

const TAG_BOOL: u8 = 0x01;
const TAG_STRING: u8 = 0x02;
const TAG_INT: u8 = 0x03;
const TAG_DOUBLE: u8 = 0x04;
const TAG_DATE: u8 = 0x05;
const TAG_TIMESTAMP: u8 = 0x06;
const TAG_LIST: u8 = 0x07;
const TAG_STRUCT: u8 = 0x08;
const TAG_NULL: u8 = 0x00;

/// Hashes a context.
///
/// ```
/// use confidence::{hash_context, Struct, Value, TARGETING_KEY};
///
/// let mut a = Struct::new();
/// a.insert(TARGETING_KEY.into(), Value::from("u1"));
/// a.insert("country".into(), Value::from("SE"));
///
/// let mut entries: Vec<_> = a.clone().into_iter().collect();
/// entries.reverse();
/// let b: Struct = entries.into_iter().collect();
/// assert_eq!(hash_context(&a), hash_context(&b));
/// ```
#[must_use]
pub fn hash_context(context: &Struct) -> String {
    let mut hasher = blake3::Hasher::new();
    feed_entries(&mut hasher, context);
    hex::encode(hasher.finalize().as_bytes())
}

/// Hashes a single value with the same encoding used for context entries.
#[must_use]
pub fn hash_value(value: &Value) -> String {
    let mut hasher = blake3::Hasher::new();
    feed_value(&mut hasher, value);
    hex::encode(hasher.finalize().as_bytes())
}

fn feed_entries(hasher: &mut blake3::Hasher, fields: &Struct) {
    let mut keys: Vec<&String> = fields.keys().collect();
    keys.sort_unstable();
    for key in keys {
        feed_str(hasher, key);
        feed_value(hasher, &fields[key]);
    }
}

fn feed_str(hasher: &mut blake3::Hasher, s: &str) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn feed_value(hasher: &mut blake3::Hasher, value: &Value) {
    match value {
        Value::Bool(v) => {
            hasher.update(&[TAG_BOOL, u8::from(*v)]);
        }
        Value::String(v) => {
            hasher.update(&[TAG_STRING]);
            feed_str(hasher, v);
        }
        Value::Int(v) => {
            hasher.update(&[TAG_INT]);
            hasher.update(&v.to_le_bytes());
        }
        Value::Double(v) => {
            hasher.update(&[TAG_DOUBLE]);
            hasher.update(&v.to_bits().to_le_bytes());
        }
        Value::Date(v) => {
            hasher.update(&[TAG_DATE]);
            hasher.update(&v.year().to_le_bytes());
            #[allow(clippy::cast_possible_truncation)]
            hasher.update(&[v.month() as u8, v.day() as u8]);
        }
        Value::Timestamp(v) => {
            hasher.update(&[TAG_TIMESTAMP]);
            hasher.update(&v.timestamp().to_le_bytes());
            hasher.update(&v.timestamp_subsec_nanos().to_le_bytes());
        }
        Value::List(items) => {
            hasher.update(&[TAG_LIST]);
            hasher.update(&(items.len() as u64).to_le_bytes());
            for item in items {
                feed_value(hasher, item);
            }
        }
        Value::Struct(fields) => {
            hasher.update(&[TAG_STRUCT]);
            hasher.update(&(fields.len() as u64).to_le_bytes());
            feed_entries(hasher, fields);
        }
        Value::Null => {
            hasher.update(&[TAG_NULL]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn ctx(entries: &[(&str, Value)]) -> Struct {
        entries.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[test]
    fn test_hash_is_deterministic() {
        let c = ctx(&[("a", Value::Int(1)), ("b", Value::from("x"))]);
        assert_eq!(hash_context(&c), hash_context(&c));
        assert_eq!(hash_context(&c).len(), 64);
        assert!(hash_context(&c).chars().all(|ch| ch.is_ascii_hexdigit() && !ch.is_ascii_uppercase()));
    }

    #[test]
    fn test_hash_ignores_insertion_order() {
        let mut forward = Struct::new();
        let mut backward = Struct::new();
        let keys = ["k0", "k1", "k2", "k3", "k4", "k5", "k6", "k7"];
        for (i, k) in keys.iter().enumerate() {
            forward.insert((*k).to_string(), Value::Int(i as i64));
        }
        for (i, k) in keys.iter().enumerate().rev() {
            backward.insert((*k).to_string(), Value::Int(i as i64));
        }
        assert_eq!(hash_context(&forward), hash_context(&backward));
    }

    #[test]
    fn test_nested_struct_order_is_irrelevant() {
        let inner_a = ctx(&[("x", Value::Int(1)), ("y", Value::Int(2))]);
        let inner_b = ctx(&[("y", Value::Int(2)), ("x", Value::Int(1))]);
        let a = ctx(&[("user", Value::Struct(inner_a))]);
        let b = ctx(&[("user", Value::Struct(inner_b))]);
        assert_eq!(hash_context(&a), hash_context(&b));
    }

    #[test]
    fn test_nested_difference_changes_hash() {
        let a = ctx(&[("user", Value::Struct(ctx(&[("age", Value::Int(30))])))]);
        let b = ctx(&[("user", Value::Struct(ctx(&[("age", Value::Int(31))])))]);
        assert_ne!(hash_context(&a), hash_context(&b));
    }

    #[test]
    fn test_type_tag_distinguishes_equal_bytes() {
        let a = ctx(&[("v", Value::Int(1))]);
        let b = ctx(&[("v", Value::Double(f64::from_bits(1)))]);
        assert_ne!(hash_context(&a), hash_context(&b));

        let c = ctx(&[("v", Value::Null)]);
        let d = ctx(&[("v", Value::Bool(false))]);
        assert_ne!(hash_context(&c), hash_context(&d));
    }

    #[test]
    fn test_key_boundaries_are_unambiguous() {
        let a = ctx(&[("ab", Value::from("c"))]);
        let b = ctx(&[("a", Value::from("bc"))]);
        assert_ne!(hash_context(&a), hash_context(&b));
    }

    #[test]
    fn test_list_order_matters_and_empty_list_is_valid() {
        let a = ctx(&[("l", Value::list([1i64, 2]))]);
        let b = ctx(&[("l", Value::list([2i64, 1]))]);
        assert_ne!(hash_context(&a), hash_context(&b));

        let empty = ctx(&[("l", Value::list(Vec::<i64>::new()))]);
        assert_eq!(hash_context(&empty), hash_context(&empty.clone()));
        assert_ne!(hash_context(&empty), hash_context(&ctx(&[("l", Value::Null)])));
    }

    #[test]
    fn test_dates_and_timestamps_hash_by_content() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let a = ctx(&[("d", Value::Date(day))]);
        let b = ctx(&[("d", Value::Date(day.succ_opt().unwrap()))]);
        assert_ne!(hash_context(&a), hash_context(&b));

        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(
            hash_context(&ctx(&[("t", Value::Timestamp(t))])),
            hash_context(&ctx(&[("t", Value::Timestamp(t))]))
        );
    }

    #[test]
    fn test_empty_context_hash_is_stable() {
        assert_eq!(hash_context(&Struct::new()), hash_context(&Struct::new()));
        assert_eq!(hash_value(&Value::Null), hash_value(&Value::Null));
    }
}
