//! Range matching against primary and secondary indices
//!
//! A matcher describes which keys of an index to visit. The table engine
//! turns it into an effective key range for the backing ordered map:
//! a full-compound equals collapses to a singleton range, and a prefix
//! match on a compound index is closed off with the `Min`/`Max` sentinels
//! in the remaining slots.

use std::ops::Bound;
use tessera_core::{Key, KeyRange};

/// What to match within one index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    /// Exactly this key (or compound prefix).
    Equals(Key),
    /// All keys within the range (bounds are in prefix space for prefix
    /// matches).
    Range(KeyRange),
}

impl Matcher {
    /// Compute the range to scan on an index with `total_len` key paths,
    /// of which the reference covers the first `prefix_len`.
    pub fn effective_range(&self, prefix_len: usize, total_len: usize) -> KeyRange {
        let pad = total_len - prefix_len;
        match self {
            Matcher::Equals(key) => {
                if pad == 0 {
                    KeyRange::equals(key.clone())
                } else {
                    KeyRange {
                        lower: Bound::Included(extend(key, prefix_len, pad, Key::Min)),
                        upper: Bound::Included(extend(key, prefix_len, pad, Key::Max)),
                    }
                }
            }
            Matcher::Range(range) => {
                if pad == 0 {
                    return range.clone();
                }
                let lower = match &range.lower {
                    Bound::Unbounded => Bound::Unbounded,
                    // At-or-above a prefix starts at its smallest extension
                    Bound::Included(k) => Bound::Included(extend(k, prefix_len, pad, Key::Min)),
                    // Strictly above a prefix starts past its largest extension
                    Bound::Excluded(k) => Bound::Excluded(extend(k, prefix_len, pad, Key::Max)),
                };
                let upper = match &range.upper {
                    Bound::Unbounded => Bound::Unbounded,
                    Bound::Included(k) => Bound::Included(extend(k, prefix_len, pad, Key::Max)),
                    Bound::Excluded(k) => Bound::Excluded(extend(k, prefix_len, pad, Key::Min)),
                };
                KeyRange { lower, upper }
            }
        }
    }
}

/// Extend a prefix key into full-compound space with `pad` sentinels.
fn extend(prefix: &Key, prefix_len: usize, pad: usize, fill: Key) -> Key {
    let mut parts = if prefix_len == 1 {
        vec![prefix.clone()]
    } else {
        match prefix {
            Key::List(items) => items.clone(),
            other => vec![other.clone()],
        }
    };
    parts.extend(std::iter::repeat(fill).take(pad));
    Key::List(parts)
}
