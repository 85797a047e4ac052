//! Weight-balanced tree internals
//!
//! Balancing follows the bounded-balance scheme with DELTA = 3 and
//! RATIO = 2: a node is balanced when neither subtree holds more than
//! DELTA times the other (trees of combined size <= 1 are exempt).
//! `balance` restores the invariant after a single-element change on one
//! side; `join` concatenates trees of arbitrary relative size.

use std::cmp::Ordering;
use std::sync::Arc;

/// Rebalance threshold: one side may be at most DELTA times the other.
pub(crate) const DELTA: usize = 3;
/// Rotation selector: single vs double rotation.
pub(crate) const RATIO: usize = 2;

pub(crate) type Link<K, V> = Option<Arc<Node<K, V>>>;

#[derive(Debug)]
pub(crate) struct Node<K, V> {
    pub(crate) size: usize,
    pub(crate) key: K,
    pub(crate) value: V,
    pub(crate) left: Link<K, V>,
    pub(crate) right: Link<K, V>,
}

#[inline]
pub(crate) fn size<K, V>(link: &Link<K, V>) -> usize {
    link.as_ref().map_or(0, |n| n.size)
}

#[inline]
pub(crate) fn node<K, V>(key: K, value: V, left: Link<K, V>, right: Link<K, V>) -> Link<K, V> {
    Some(Arc::new(Node {
        size: 1 + size(&left) + size(&right),
        key,
        value,
        left,
        right,
    }))
}

#[inline]
pub(crate) fn leaf<K, V>(key: K, value: V) -> Link<K, V> {
    node(key, value, None, None)
}

fn single_left<K: Clone, V: Clone>(key: K, value: V, left: Link<K, V>, right: Link<K, V>) -> Link<K, V> {
    let r = right.expect("single_left on empty right subtree");
    node(
        r.key.clone(),
        r.value.clone(),
        node(key, value, left, r.left.clone()),
        r.right.clone(),
    )
}

fn single_right<K: Clone, V: Clone>(key: K, value: V, left: Link<K, V>, right: Link<K, V>) -> Link<K, V> {
    let l = left.expect("single_right on empty left subtree");
    node(
        l.key.clone(),
        l.value.clone(),
        l.left.clone(),
        node(key, value, l.right.clone(), right),
    )
}

fn double_left<K: Clone, V: Clone>(key: K, value: V, left: Link<K, V>, right: Link<K, V>) -> Link<K, V> {
    let r = right.expect("double_left on empty right subtree");
    let rl = r.left.clone().expect("double_left needs right.left");
    node(
        rl.key.clone(),
        rl.value.clone(),
        node(key, value, left, rl.left.clone()),
        node(r.key.clone(), r.value.clone(), rl.right.clone(), r.right.clone()),
    )
}

fn double_right<K: Clone, V: Clone>(key: K, value: V, left: Link<K, V>, right: Link<K, V>) -> Link<K, V> {
    let l = left.expect("double_right on empty left subtree");
    let lr = l.right.clone().expect("double_right needs left.right");
    node(
        lr.key.clone(),
        lr.value.clone(),
        node(l.key.clone(), l.value.clone(), l.left.clone(), lr.left.clone()),
        node(key, value, lr.right.clone(), right),
    )
}

/// Smart constructor restoring balance after a one-element change on either
/// side.
pub(crate) fn balance<K: Clone, V: Clone>(
    key: K,
    value: V,
    left: Link<K, V>,
    right: Link<K, V>,
) -> Link<K, V> {
    let (ls, rs) = (size(&left), size(&right));
    if ls + rs <= 1 {
        return node(key, value, left, right);
    }
    if rs > DELTA * ls {
        let r = right.as_ref().expect("heavy right subtree is non-empty");
        if size(&r.left) < RATIO * size(&r.right) {
            return single_left(key, value, left, right);
        }
        return double_left(key, value, left, right);
    }
    if ls > DELTA * rs {
        let l = left.as_ref().expect("heavy left subtree is non-empty");
        if size(&l.right) < RATIO * size(&l.left) {
            return single_right(key, value, left, right);
        }
        return double_right(key, value, left, right);
    }
    node(key, value, left, right)
}

fn push_min<K: Clone, V: Clone>(key: K, value: V, link: &Link<K, V>) -> Link<K, V> {
    match link {
        None => leaf(key, value),
        Some(n) => balance(
            n.key.clone(),
            n.value.clone(),
            push_min(key, value, &n.left),
            n.right.clone(),
        ),
    }
}

fn push_max<K: Clone, V: Clone>(key: K, value: V, link: &Link<K, V>) -> Link<K, V> {
    match link {
        None => leaf(key, value),
        Some(n) => balance(
            n.key.clone(),
            n.value.clone(),
            n.left.clone(),
            push_max(key, value, &n.right),
        ),
    }
}

/// Concatenate `left < key < right` for trees of arbitrary relative size.
pub(crate) fn join<K: Clone, V: Clone>(
    key: K,
    value: V,
    left: &Link<K, V>,
    right: &Link<K, V>,
) -> Link<K, V> {
    match (left, right) {
        (None, _) => push_min(key, value, right),
        (_, None) => push_max(key, value, left),
        (Some(l), Some(r)) => {
            if DELTA * l.size < r.size {
                balance(
                    r.key.clone(),
                    r.value.clone(),
                    join(key, value, left, &r.left),
                    r.right.clone(),
                )
            } else if DELTA * r.size < l.size {
                balance(
                    l.key.clone(),
                    l.value.clone(),
                    l.left.clone(),
                    join(key, value, &l.right, right),
                )
            } else {
                node(key, value, left.clone(), right.clone())
            }
        }
    }
}

fn pop_max<K: Clone, V: Clone>(link: &Link<K, V>) -> Option<(K, V, Link<K, V>)> {
    let n = link.as_ref()?;
    match pop_max(&n.right) {
        None => Some((n.key.clone(), n.value.clone(), n.left.clone())),
        Some((k, v, rest)) => Some((
            k,
            v,
            balance(n.key.clone(), n.value.clone(), n.left.clone(), rest),
        )),
    }
}

/// Concatenate two trees where everything in `left` precedes `right`.
pub(crate) fn join2<K: Clone + Ord, V: Clone>(left: &Link<K, V>, right: &Link<K, V>) -> Link<K, V> {
    match pop_max(left) {
        None => right.clone(),
        Some((k, v, rest)) => join(k, v, &rest, right),
    }
}

pub(crate) fn get<'a, K: Ord, V>(link: &'a Link<K, V>, key: &K) -> Option<&'a V> {
    let mut cursor = link;
    while let Some(n) = cursor {
        match key.cmp(&n.key) {
            Ordering::Less => cursor = &n.left,
            Ordering::Greater => cursor = &n.right,
            Ordering::Equal => return Some(&n.value),
        }
    }
    None
}

pub(crate) fn insert<K: Clone + Ord, V: Clone>(link: &Link<K, V>, key: K, value: V) -> Link<K, V> {
    match link {
        None => leaf(key, value),
        Some(n) => match key.cmp(&n.key) {
            Ordering::Less => balance(
                n.key.clone(),
                n.value.clone(),
                insert(&n.left, key, value),
                n.right.clone(),
            ),
            Ordering::Greater => balance(
                n.key.clone(),
                n.value.clone(),
                n.left.clone(),
                insert(&n.right, key, value),
            ),
            // Replacement keeps sizes intact; no rebalance needed.
            Ordering::Equal => node(key, value, n.left.clone(), n.right.clone()),
        },
    }
}

pub(crate) fn insert_with<K: Clone + Ord, V: Clone>(
    link: &Link<K, V>,
    key: K,
    value: V,
    combine: &mut impl FnMut(&V, &V) -> V,
) -> Link<K, V> {
    match link {
        None => leaf(key, value),
        Some(n) => match key.cmp(&n.key) {
            Ordering::Less => balance(
                n.key.clone(),
                n.value.clone(),
                insert_with(&n.left, key, value, combine),
                n.right.clone(),
            ),
            Ordering::Greater => balance(
                n.key.clone(),
                n.value.clone(),
                n.left.clone(),
                insert_with(&n.right, key, value, combine),
            ),
            Ordering::Equal => {
                let merged = combine(&n.value, &value);
                node(key, merged, n.left.clone(), n.right.clone())
            }
        },
    }
}

pub(crate) fn insert_if_absent<K: Clone + Ord, V: Clone>(
    link: &Link<K, V>,
    key: K,
    value: V,
) -> Link<K, V> {
    match link {
        None => leaf(key, value),
        Some(n) => match key.cmp(&n.key) {
            Ordering::Less => balance(
                n.key.clone(),
                n.value.clone(),
                insert_if_absent(&n.left, key, value),
                n.right.clone(),
            ),
            Ordering::Greater => balance(
                n.key.clone(),
                n.value.clone(),
                n.left.clone(),
                insert_if_absent(&n.right, key, value),
            ),
            Ordering::Equal => link.clone(),
        },
    }
}

pub(crate) fn remove<K: Clone + Ord, V: Clone>(link: &Link<K, V>, key: &K) -> Link<K, V> {
    match link {
        None => None,
        Some(n) => match key.cmp(&n.key) {
            Ordering::Less => {
                let new_left = remove(&n.left, key);
                if size(&new_left) == size(&n.left) {
                    link.clone()
                } else {
                    balance(n.key.clone(), n.value.clone(), new_left, n.right.clone())
                }
            }
            Ordering::Greater => {
                let new_right = remove(&n.right, key);
                if size(&new_right) == size(&n.right) {
                    link.clone()
                } else {
                    balance(n.key.clone(), n.value.clone(), n.left.clone(), new_right)
                }
            }
            Ordering::Equal => glue(&n.left, &n.right),
        },
    }
}

/// Concatenate the children of a removed node. Both sides were balanced
/// against each other, so moving one boundary element keeps things within
/// the tolerance `balance` can fix.
fn glue<K: Clone + Ord, V: Clone>(left: &Link<K, V>, right: &Link<K, V>) -> Link<K, V> {
    match (left, right) {
        (None, _) => right.clone(),
        (_, None) => left.clone(),
        _ => {
            let (k, v, rest) = pop_max(left).expect("non-empty left in glue");
            balance(k, v, rest, right.clone())
        }
    }
}

pub(crate) fn split<K: Clone + Ord, V: Clone>(
    link: &Link<K, V>,
    key: &K,
) -> (Link<K, V>, Option<V>, Link<K, V>) {
    match link {
        None => (None, None, None),
        Some(n) => match key.cmp(&n.key) {
            Ordering::Less => {
                let (ll, found, lr) = split(&n.left, key);
                (ll, found, join(n.key.clone(), n.value.clone(), &lr, &n.right))
            }
            Ordering::Greater => {
                let (rl, found, rr) = split(&n.right, key);
                (join(n.key.clone(), n.value.clone(), &n.left, &rl), found, rr)
            }
            Ordering::Equal => (n.left.clone(), Some(n.value.clone()), n.right.clone()),
        },
    }
}

/// Left-biased union: on duplicate keys the value from `left` wins.
pub(crate) fn union<K: Clone + Ord, V: Clone>(left: &Link<K, V>, right: &Link<K, V>) -> Link<K, V> {
    match (left, right) {
        (None, _) => right.clone(),
        (_, None) => left.clone(),
        (Some(l), _) => {
            let (rl, _, rr) = split(right, &l.key);
            join(
                l.key.clone(),
                l.value.clone(),
                &union(&l.left, &rl),
                &union(&l.right, &rr),
            )
        }
    }
}

pub(crate) fn difference<K: Clone + Ord, V: Clone>(
    left: &Link<K, V>,
    right: &Link<K, V>,
) -> Link<K, V> {
    match (left, right) {
        (None, _) => None,
        (_, None) => left.clone(),
        (_, Some(r)) => {
            let (ll, _, lr) = split(left, &r.key);
            join2(&difference(&ll, &r.left), &difference(&lr, &r.right))
        }
    }
}

/// Left-biased intersection: kept values come from `left`.
pub(crate) fn intersection<K: Clone + Ord, V: Clone>(
    left: &Link<K, V>,
    right: &Link<K, V>,
) -> Link<K, V> {
    match (left, right) {
        (None, _) | (_, None) => None,
        (Some(l), _) => {
            let (rl, found, rr) = split(right, &l.key);
            let below = intersection(&l.left, &rl);
            let above = intersection(&l.right, &rr);
            if found.is_some() {
                join(l.key.clone(), l.value.clone(), &below, &above)
            } else {
                join2(&below, &above)
            }
        }
    }
}

pub(crate) fn is_disjoint<K: Clone + Ord, V: Clone>(left: &Link<K, V>, right: &Link<K, V>) -> bool {
    match (left, right) {
        (None, _) | (_, None) => true,
        (Some(l), _) => {
            let (rl, found, rr) = split(right, &l.key);
            found.is_none() && is_disjoint(&l.left, &rl) && is_disjoint(&l.right, &rr)
        }
    }
}

/// Split by position: the first `at` elements go left.
pub(crate) fn split_at<K: Clone + Ord, V: Clone>(
    link: &Link<K, V>,
    at: usize,
) -> (Link<K, V>, Link<K, V>) {
    match link {
        None => (None, None),
        Some(n) => {
            if at >= n.size {
                return (link.clone(), None);
            }
            let left_size = size(&n.left);
            if at <= left_size {
                let (l1, l2) = split_at(&n.left, at);
                (l1, join(n.key.clone(), n.value.clone(), &l2, &n.right))
            } else {
                let (r1, r2) = split_at(&n.right, at - left_size - 1);
                (join(n.key.clone(), n.value.clone(), &n.left, &r1), r2)
            }
        }
    }
}

/// Number of keys strictly less than `key`, plus a hit flag.
pub(crate) fn rank<K: Ord, V>(link: &Link<K, V>, key: &K) -> Option<usize> {
    let mut cursor = link;
    let mut before = 0usize;
    while let Some(n) = cursor {
        match key.cmp(&n.key) {
            Ordering::Less => cursor = &n.left,
            Ordering::Greater => {
                before += size(&n.left) + 1;
                cursor = &n.right;
            }
            Ordering::Equal => return Some(before + size(&n.left)),
        }
    }
    None
}

pub(crate) fn get_index<K, V>(link: &Link<K, V>, index: usize) -> Option<(&K, &V)> {
    let mut cursor = link;
    let mut index = index;
    while let Some(n) = cursor {
        let left_size = size(&n.left);
        match index.cmp(&left_size) {
            Ordering::Less => cursor = &n.left,
            Ordering::Equal => return Some((&n.key, &n.value)),
            Ordering::Greater => {
                index -= left_size + 1;
                cursor = &n.right;
            }
        }
    }
    None
}

/// Largest entry with key strictly below (or at, when `or_equal`) `key`.
pub(crate) fn lookup_below<'a, K: Ord, V>(
    link: &'a Link<K, V>,
    key: &K,
    or_equal: bool,
) -> Option<(&'a K, &'a V)> {
    let mut cursor = link;
    let mut best = None;
    while let Some(n) = cursor {
        match n.key.cmp(key) {
            Ordering::Less => {
                best = Some((&n.key, &n.value));
                cursor = &n.right;
            }
            Ordering::Equal if or_equal => return Some((&n.key, &n.value)),
            _ => cursor = &n.left,
        }
    }
    best
}

/// Smallest entry with key strictly above (or at, when `or_equal`) `key`.
pub(crate) fn lookup_above<'a, K: Ord, V>(
    link: &'a Link<K, V>,
    key: &K,
    or_equal: bool,
) -> Option<(&'a K, &'a V)> {
    let mut cursor = link;
    let mut best = None;
    while let Some(n) = cursor {
        match n.key.cmp(key) {
            Ordering::Greater => {
                best = Some((&n.key, &n.value));
                cursor = &n.left;
            }
            Ordering::Equal if or_equal => return Some((&n.key, &n.value)),
            _ => cursor = &n.right,
        }
    }
    best
}

pub(crate) fn first<K, V>(link: &Link<K, V>) -> Option<(&K, &V)> {
    let mut cursor = link.as_ref()?;
    while let Some(left) = cursor.left.as_ref() {
        cursor = left;
    }
    Some((&cursor.key, &cursor.value))
}

pub(crate) fn last<K, V>(link: &Link<K, V>) -> Option<(&K, &V)> {
    let mut cursor = link.as_ref()?;
    while let Some(right) = cursor.right.as_ref() {
        cursor = right;
    }
    Some((&cursor.key, &cursor.value))
}

/// O(n) construction from strictly ascending entries.
pub(crate) fn from_sorted_slice<K: Clone, V: Clone>(entries: &[(K, V)]) -> Link<K, V> {
    if entries.is_empty() {
        return None;
    }
    let mid = entries.len() / 2;
    let (key, value) = entries[mid].clone();
    node(
        key,
        value,
        from_sorted_slice(&entries[..mid]),
        from_sorted_slice(&entries[mid + 1..]),
    )
}

#[cfg(test)]
pub(crate) fn check_invariants<K: Ord, V>(link: &Link<K, V>) -> bool {
    fn walk<K: Ord, V>(link: &Link<K, V>, lower: Option<&K>, upper: Option<&K>) -> Option<usize> {
        match link {
            None => Some(0),
            Some(n) => {
                if let Some(lo) = lower {
                    if n.key <= *lo {
                        return None;
                    }
                }
                if let Some(hi) = upper {
                    if n.key >= *hi {
                        return None;
                    }
                }
                let ls = walk(&n.left, lower, Some(&n.key))?;
                let rs = walk(&n.right, Some(&n.key), upper)?;
                if n.size != ls + rs + 1 {
                    return None;
                }
                let balanced =
                    ls + rs <= 1 || (ls <= DELTA * rs && rs <= DELTA * ls);
                if !balanced {
                    return None;
                }
                Some(n.size)
            }
        }
    }
    walk(link, None, None).is_some()
}
