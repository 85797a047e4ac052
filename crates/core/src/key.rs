//! Typed composite keys and their total order
//!
//! Keys are one of: integer, timestamp, string, byte sequence, or a finite
//! ordered list of keys. Two sentinels `Min` and `Max` compare below and
//! above every other key; they never occur in stored rows and exist so that
//! compound-prefix ranges can be closed off.
//!
//! The inter-type ranking is fixed: integer < timestamp < string < bytes <
//! list. Within a type the order is the natural one; lists compare
//! element-wise with shorter prefixes smaller. This matches the published
//! IndexedDB key-compare semantics so migrated clients see no behavioral
//! surprise.

use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Bound;

/// A database key.
///
/// The derived `Ord` is exactly the order above: variants are declared in
/// rank order, and the per-variant payloads (`i64`, `DateTime`, `String`,
/// `Vec<u8>`, `Vec<Key>`) all order naturally, with `Vec` comparing
/// element-wise and shorter prefixes first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Key {
    /// Sentinel below every other key. Never stored.
    Min,
    /// 64-bit signed integer key
    Int(i64),
    /// Timestamp key (UTC)
    Timestamp(DateTime<Utc>),
    /// String key
    Text(String),
    /// Byte-sequence key
    Bytes(Vec<u8>),
    /// Compound key: an ordered list of keys
    List(Vec<Key>),
    /// Sentinel above every other key. Never stored.
    Max,
}

impl Key {
    /// Convert a storable value into a key, if its branch is key-typed.
    ///
    /// Null, bool, float and map values are not valid keys; a list is a
    /// valid key only if every element is.
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Int(i) => Some(Key::Int(*i)),
            Value::Timestamp(t) => Some(Key::Timestamp(*t)),
            Value::Text(s) => Some(Key::Text(s.clone())),
            Value::Bytes(b) => Some(Key::Bytes(b.clone())),
            Value::List(items) => items
                .iter()
                .map(Key::from_value)
                .collect::<Option<Vec<Key>>>()
                .map(Key::List),
            _ => None,
        }
    }

    /// Render the key back into a storable value.
    ///
    /// Sentinels have no value form and return `None`.
    pub fn to_value(&self) -> Option<Value> {
        match self {
            Key::Min | Key::Max => None,
            Key::Int(i) => Some(Value::Int(*i)),
            Key::Timestamp(t) => Some(Value::Timestamp(*t)),
            Key::Text(s) => Some(Value::Text(s.clone())),
            Key::Bytes(b) => Some(Value::Bytes(b.clone())),
            Key::List(items) => items
                .iter()
                .map(Key::to_value)
                .collect::<Option<Vec<Value>>>()
                .map(Value::List),
        }
    }

    /// True for the `Min`/`Max` sentinels and for lists containing them.
    pub fn has_sentinel(&self) -> bool {
        match self {
            Key::Min | Key::Max => true,
            Key::List(items) => items.iter().any(Key::has_sentinel),
            _ => false,
        }
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Key::Int(v)
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Key::Text(v.to_string())
    }
}

impl From<String> for Key {
    fn from(v: String) -> Self {
        Key::Text(v)
    }
}

/// A contiguous interval of keys, used by index range matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    /// Lower bound of the interval
    pub lower: Bound<Key>,
    /// Upper bound of the interval
    pub upper: Bound<Key>,
}

impl KeyRange {
    /// The full key space.
    pub fn all() -> Self {
        KeyRange {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    /// The singleton interval `[key, key]`.
    pub fn equals(key: Key) -> Self {
        KeyRange {
            lower: Bound::Included(key.clone()),
            upper: Bound::Included(key),
        }
    }

    /// `(key, +inf)` or `[key, +inf)` depending on `inclusive`.
    pub fn above(key: Key, inclusive: bool) -> Self {
        KeyRange {
            lower: if inclusive {
                Bound::Included(key)
            } else {
                Bound::Excluded(key)
            },
            upper: Bound::Unbounded,
        }
    }

    /// `(-inf, key)` or `(-inf, key]` depending on `inclusive`.
    pub fn below(key: Key, inclusive: bool) -> Self {
        KeyRange {
            lower: Bound::Unbounded,
            upper: if inclusive {
                Bound::Included(key)
            } else {
                Bound::Excluded(key)
            },
        }
    }

    /// Interval between two keys with per-end inclusivity.
    pub fn between(lower: Key, upper: Key, lower_inclusive: bool, upper_inclusive: bool) -> Self {
        KeyRange {
            lower: if lower_inclusive {
                Bound::Included(lower)
            } else {
                Bound::Excluded(lower)
            },
            upper: if upper_inclusive {
                Bound::Included(upper)
            } else {
                Bound::Excluded(upper)
            },
        }
    }

    /// Borrowing view of the lower bound.
    pub fn start_bound(&self) -> Bound<&Key> {
        self.lower.as_ref()
    }

    /// Borrowing view of the upper bound.
    pub fn end_bound(&self) -> Bound<&Key> {
        self.upper.as_ref()
    }

    /// Membership test.
    pub fn contains(&self, key: &Key) -> bool {
        let lower_ok = match &self.lower {
            Bound::Unbounded => true,
            Bound::Included(l) => key >= l,
            Bound::Excluded(l) => key > l,
        };
        let upper_ok = match &self.upper {
            Bound::Unbounded => true,
            Bound::Included(u) => key <= u,
            Bound::Excluded(u) => key < u,
        };
        lower_ok && upper_ok
    }
}

impl std::ops::RangeBounds<Key> for KeyRange {
    fn start_bound(&self) -> Bound<&Key> {
        KeyRange::start_bound(self)
    }

    fn end_bound(&self) -> Bound<&Key> {
        KeyRange::end_bound(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::cmp::Ordering;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    // === Inter-type ranking ===

    #[test]
    fn test_type_ranking() {
        let ordered = vec![
            Key::Min,
            Key::Int(i64::MAX),
            Key::Timestamp(ts(0)),
            Key::Text("".into()),
            Key::Bytes(vec![]),
            Key::List(vec![]),
            Key::Max,
        ];
        for window in ordered.windows(2) {
            assert!(window[0] < window[1], "{:?} !< {:?}", window[0], window[1]);
        }
    }

    #[test]
    fn test_sentinels_bound_everything() {
        let keys = [
            Key::Int(i64::MIN),
            Key::Text("zzz".into()),
            Key::List(vec![Key::Max]),
        ];
        for key in &keys {
            assert!(Key::Min < *key);
            assert!(*key < Key::Max);
        }
    }

    // === Within-type order ===

    #[test]
    fn test_int_order() {
        assert!(Key::Int(-1) < Key::Int(0));
        assert!(Key::Int(0) < Key::Int(1));
    }

    #[test]
    fn test_text_order_is_lexicographic() {
        assert!(Key::Text("a".into()) < Key::Text("ab".into()));
        assert!(Key::Text("ab".into()) < Key::Text("b".into()));
    }

    #[test]
    fn test_bytes_order() {
        assert!(Key::Bytes(vec![1]) < Key::Bytes(vec![1, 0]));
        assert!(Key::Bytes(vec![1, 0]) < Key::Bytes(vec![2]));
    }

    #[test]
    fn test_list_order_elementwise_prefix_smaller() {
        let short = Key::List(vec![Key::Int(1)]);
        let long = Key::List(vec![Key::Int(1), Key::Int(0)]);
        let other = Key::List(vec![Key::Int(2)]);
        assert!(short < long);
        assert!(long < other);
    }

    #[test]
    fn test_list_mixed_types_use_rank() {
        let ints = Key::List(vec![Key::Int(99)]);
        let texts = Key::List(vec![Key::Text("a".into())]);
        assert!(ints < texts);
    }

    // === Conversions ===

    #[test]
    fn test_from_value_key_branches() {
        assert_eq!(Key::from_value(&Value::Int(4)), Some(Key::Int(4)));
        assert_eq!(
            Key::from_value(&Value::Text("k".into())),
            Some(Key::Text("k".into()))
        );
        assert_eq!(
            Key::from_value(&Value::List(vec![Value::Int(1), Value::Text("x".into())])),
            Some(Key::List(vec![Key::Int(1), Key::Text("x".into())]))
        );
    }

    #[test]
    fn test_from_value_non_key_branches() {
        assert_eq!(Key::from_value(&Value::Null), None);
        assert_eq!(Key::from_value(&Value::Bool(true)), None);
        assert_eq!(Key::from_value(&Value::Float(1.0)), None);
        assert_eq!(Key::from_value(&Value::record([("a", Value::Int(1))])), None);
        // A list is poisoned by any non-key element
        assert_eq!(
            Key::from_value(&Value::List(vec![Value::Int(1), Value::Null])),
            None
        );
    }

    #[test]
    fn test_to_value_round_trip() {
        let key = Key::List(vec![Key::Int(1), Key::Bytes(vec![3])]);
        let value = key.to_value().unwrap();
        assert_eq!(Key::from_value(&value), Some(key));
    }

    #[test]
    fn test_sentinels_have_no_value() {
        assert_eq!(Key::Min.to_value(), None);
        assert_eq!(Key::List(vec![Key::Max]).to_value(), None);
        assert!(Key::List(vec![Key::Int(1), Key::Min]).has_sentinel());
        assert!(!Key::List(vec![Key::Int(1)]).has_sentinel());
    }

    // === Ranges ===

    #[test]
    fn test_range_contains() {
        let range = KeyRange::between(Key::Int(1), Key::Int(5), true, false);
        assert!(!range.contains(&Key::Int(0)));
        assert!(range.contains(&Key::Int(1)));
        assert!(range.contains(&Key::Int(4)));
        assert!(!range.contains(&Key::Int(5)));
    }

    #[test]
    fn test_range_equals_is_singleton() {
        let range = KeyRange::equals(Key::Text("x".into()));
        assert!(range.contains(&Key::Text("x".into())));
        assert!(!range.contains(&Key::Text("y".into())));
    }

    #[test]
    fn test_range_open_ends() {
        assert!(KeyRange::above(Key::Int(3), false).contains(&Key::Int(4)));
        assert!(!KeyRange::above(Key::Int(3), false).contains(&Key::Int(3)));
        assert!(KeyRange::below(Key::Int(3), true).contains(&Key::Int(3)));
        assert!(KeyRange::all().contains(&Key::Max));
    }

    // === Property tests ===

    fn arb_key() -> impl Strategy<Value = Key> {
        let leaf = prop_oneof![
            any::<i64>().prop_map(Key::Int),
            (-1_000_000_000i64..1_000_000_000).prop_map(|s| Key::Timestamp(ts(s))),
            "[a-z]{0,6}".prop_map(Key::Text),
            proptest::collection::vec(any::<u8>(), 0..4).prop_map(Key::Bytes),
        ];
        leaf.prop_recursive(3, 16, 4, |inner| {
            proptest::collection::vec(inner, 0..4).prop_map(Key::List)
        })
    }

    proptest! {
        #[test]
        fn prop_clone_compares_equal(key in arb_key()) {
            prop_assert_eq!(key.clone().cmp(&key), Ordering::Equal);
        }

        #[test]
        fn prop_order_is_antisymmetric(a in arb_key(), b in arb_key()) {
            let forward = a.cmp(&b);
            let backward = b.cmp(&a);
            prop_assert_eq!(forward, backward.reverse());
        }

        #[test]
        fn prop_order_is_transitive(mut keys in proptest::collection::vec(arb_key(), 3)) {
            keys.sort();
            prop_assert!(keys[0] <= keys[1] && keys[1] <= keys[2] && keys[0] <= keys[2]);
        }

        #[test]
        fn prop_value_round_trip(key in arb_key()) {
            let value = key.to_value().unwrap();
            prop_assert_eq!(Key::from_value(&value), Some(key));
        }
    }
}
