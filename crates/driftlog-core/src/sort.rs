//! Deterministic total order over entries.
//!
//! Every replica must linearize the same entry set identically, so ordering
//! is a fixed chain:
//!
//! 1. **Timestamp**: earlier `(wall_time, logical)` sorts first.
//! 2. **Clock id**: byte-lexicographic owner id.
//! 3. **Tie-break**: a pluggable [`TieBreak`] strategy for the remaining
//!    ties, which only arise between entries of one owner that share a
//!    timestamp.
//!
//! The tie-break is wrapped in [`NoZeroes`] when a [`Sorting`] is built: a
//! strategy that reports `Equal` for two distinct hashes is a programming
//! error and surfaces as [`Error::TieBreak`].

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::clock::Clock;
use crate::entry::{Entry, ShallowEntry};
use crate::error::{Error, Result};

/// The fields ordering looks at.
#[derive(Debug, Clone, Copy)]
pub struct SortKey<'a> {
    pub hash: &'a str,
    pub clock: &'a Clock,
}

/// Anything that can be placed in log order.
pub trait Sortable {
    fn sort_key(&self) -> SortKey<'_>;
}

impl<T> Sortable for Entry<T> {
    fn sort_key(&self) -> SortKey<'_> {
        SortKey {
            hash: self.hash(),
            clock: self.clock(),
        }
    }
}

impl Sortable for ShallowEntry {
    fn sort_key(&self) -> SortKey<'_> {
        SortKey {
            hash: &self.hash,
            clock: &self.meta.clock,
        }
    }
}

impl<S: Sortable> Sortable for &S {
    fn sort_key(&self) -> SortKey<'_> {
        (*self).sort_key()
    }
}

/// Strategy for ordering entries whose clocks are identical.
pub trait TieBreak: Send + Sync {
    /// Stable name for logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Order two entries with identical clocks.
    fn compare(&self, a: SortKey<'_>, b: SortKey<'_>) -> Ordering;
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Keeps the left operand: it is always reported as the later write.
///
/// Sorting presents tied entries in ascending hash order before consulting
/// the strategy, so the result is deterministic: tied entries end up in
/// descending hash order.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriteWins;

impl TieBreak for LastWriteWins {
    fn name(&self) -> &'static str {
        "last-write-wins"
    }

    fn compare(&self, _a: SortKey<'_>, _b: SortKey<'_>) -> Ordering {
        Ordering::Greater
    }
}

/// Ties broken by comparing hash strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct SortByEntryHash;

impl TieBreak for SortByEntryHash {
    fn name(&self) -> &'static str {
        "sort-by-entry-hash"
    }

    fn compare(&self, a: SortKey<'_>, b: SortKey<'_>) -> Ordering {
        a.hash.cmp(b.hash)
    }
}

/// Rejects `Equal` from the wrapped strategy unless both sides are the same
/// entry.
#[derive(Clone)]
pub struct NoZeroes {
    inner: Arc<dyn TieBreak>,
}

impl NoZeroes {
    #[must_use]
    pub fn new(inner: Arc<dyn TieBreak>) -> Self {
        Self { inner }
    }

    /// # Errors
    ///
    /// Returns [`Error::TieBreak`] when the strategy reports `Equal` for two
    /// distinct hashes.
    pub fn compare(&self, a: SortKey<'_>, b: SortKey<'_>) -> Result<Ordering> {
        if a.hash == b.hash {
            return Ok(Ordering::Equal);
        }
        match self.inner.compare(a, b) {
            Ordering::Equal => Err(Error::TieBreak {
                a: a.hash.to_owned(),
                b: b.hash.to_owned(),
            }),
            ord => Ok(ord),
        }
    }
}

impl fmt::Debug for NoZeroes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NoZeroes").field(&self.inner.name()).finish()
    }
}

// ---------------------------------------------------------------------------
// Sorting
// ---------------------------------------------------------------------------

/// The composed comparator a log orders its entries with.
#[derive(Debug, Clone)]
pub struct Sorting {
    tie_break: NoZeroes,
}

impl Default for Sorting {
    fn default() -> Self {
        Self::last_write_wins()
    }
}

impl Sorting {
    #[must_use]
    pub fn new(tie_break: Arc<dyn TieBreak>) -> Self {
        Self {
            tie_break: NoZeroes::new(tie_break),
        }
    }

    #[must_use]
    pub fn last_write_wins() -> Self {
        Self::new(Arc::new(LastWriteWins))
    }

    #[must_use]
    pub fn by_entry_hash() -> Self {
        Self::new(Arc::new(SortByEntryHash))
    }

    #[must_use]
    pub fn tie_break_name(&self) -> &'static str {
        self.tie_break.inner.name()
    }

    /// Compare two entries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TieBreak`] if the tie-break fails to separate two
    /// distinct entries.
    pub fn compare<A: Sortable + ?Sized, B: Sortable + ?Sized>(
        &self,
        a: &A,
        b: &B,
    ) -> Result<Ordering> {
        let (a, b) = (a.sort_key(), b.sort_key());
        match a.clock.cmp(b.clock) {
            Ordering::Equal => self.tie_break.compare(a, b),
            ord => Ok(ord),
        }
    }

    /// Whether `a` sorts strictly after `b`.
    ///
    /// # Errors
    ///
    /// See [`Sorting::compare`].
    pub fn is_after<A: Sortable + ?Sized, B: Sortable + ?Sized>(
        &self,
        a: &A,
        b: &B,
    ) -> Result<bool> {
        Ok(self.compare(a, b)? == Ordering::Greater)
    }

    /// Sort `items` ascending (oldest first).
    ///
    /// Items are ordered by clock with the standard sort; each run of equal
    /// clocks is then placed in ascending hash order and insertion-sorted with
    /// the tie-break, which keeps the result deterministic even for
    /// strategies that are not antisymmetric.
    ///
    /// # Errors
    ///
    /// See [`Sorting::compare`]. On error `items` is left clock-ordered.
    pub fn sort<S: Sortable>(&self, items: &mut [S]) -> Result<()> {
        items.sort_by(|a, b| a.sort_key().clock.cmp(b.sort_key().clock));

        let mut start = 0;
        while start < items.len() {
            let mut end = start + 1;
            while end < items.len() && items[end].sort_key().clock == items[start].sort_key().clock
            {
                end += 1;
            }
            if end - start > 1 {
                self.order_ties(&mut items[start..end])?;
            }
            start = end;
        }
        Ok(())
    }

    fn order_ties<S: Sortable>(&self, group: &mut [S]) -> Result<()> {
        group.sort_by(|a, b| a.sort_key().hash.cmp(b.sort_key().hash));
        for i in 1..group.len() {
            let mut j = i;
            while j > 0 && self.compare(&group[j - 1], &group[j])? == Ordering::Greater {
                group.swap(j - 1, j);
                j -= 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timestamp;
    use crate::entry::{EntryType, Meta};
    use proptest::prelude::*;

    fn shallow(hash: &str, id: u8, wall: u64, logical: u32) -> ShallowEntry {
        ShallowEntry {
            hash: hash.to_owned(),
            meta: Meta {
                clock: Clock::new(vec![id], Timestamp::new(wall, logical)),
                gid: "g".to_owned(),
                next: Vec::new(),
                entry_type: EntryType::Append,
                data: None,
            },
            head: true,
            payload_size: 0,
        }
    }

    fn hashes(items: &[ShallowEntry]) -> Vec<&str> {
        items.iter().map(|e| e.hash.as_str()).collect()
    }

    struct AlwaysEqual;

    impl TieBreak for AlwaysEqual {
        fn name(&self) -> &'static str {
            "always-equal"
        }
        fn compare(&self, _a: SortKey<'_>, _b: SortKey<'_>) -> Ordering {
            Ordering::Equal
        }
    }

    #[test]
    fn clock_dominates_id_and_hash() {
        let sorting = Sorting::by_entry_hash();
        let early = shallow("z", 9, 1, 0);
        let late = shallow("a", 0, 2, 0);
        assert_eq!(sorting.compare(&early, &late).expect("cmp"), Ordering::Less);
        assert!(sorting.is_after(&late, &early).expect("cmp"));
    }

    #[test]
    fn id_breaks_timestamp_ties_before_strategy() {
        let sorting = Sorting::by_entry_hash();
        let low = shallow("z", 1, 5, 0);
        let high = shallow("a", 2, 5, 0);
        assert_eq!(sorting.compare(&low, &high).expect("cmp"), Ordering::Less);
    }

    #[test]
    fn entry_hash_strategy_orders_exact_ties() {
        let sorting = Sorting::by_entry_hash();
        let mut items = vec![shallow("c", 1, 5, 0), shallow("a", 1, 5, 0), shallow("b", 1, 5, 0)];
        sorting.sort(&mut items).expect("sort");
        assert_eq!(hashes(&items), ["a", "b", "c"]);
    }

    #[test]
    fn last_write_wins_keeps_left_and_is_deterministic() {
        let sorting = Sorting::last_write_wins();
        let a = shallow("a", 1, 5, 0);
        let b = shallow("b", 1, 5, 0);
        assert_eq!(sorting.compare(&a, &b).expect("cmp"), Ordering::Greater);
        assert_eq!(sorting.compare(&b, &a).expect("cmp"), Ordering::Greater);

        let mut one = vec![a.clone(), b.clone(), shallow("c", 1, 5, 0)];
        let mut two = vec![shallow("c", 1, 5, 0), b, a];
        sorting.sort(&mut one).expect("sort");
        sorting.sort(&mut two).expect("sort");
        assert_eq!(hashes(&one), hashes(&two));
        assert_eq!(hashes(&one), ["c", "b", "a"]);
    }

    #[test]
    fn no_zeroes_rejects_equal_for_distinct_entries() {
        let sorting = Sorting::new(Arc::new(AlwaysEqual));
        let a = shallow("a", 1, 5, 0);
        let b = shallow("b", 1, 5, 0);
        let err = sorting.compare(&a, &b).expect_err("must reject");
        assert!(matches!(err, Error::TieBreak { .. }));
        assert_eq!(sorting.compare(&a, &a).expect("same entry"), Ordering::Equal);

        let mut items = vec![a, b];
        assert!(sorting.sort(&mut items).is_err());
    }

    #[test]
    fn debug_names_strategy() {
        assert_eq!(Sorting::default().tie_break_name(), "last-write-wins");
        assert!(format!("{:?}", Sorting::by_entry_hash()).contains("sort-by-entry-hash"));
    }

    proptest! {
        #[test]
        fn sort_is_a_strict_total_order(
            raw in prop::collection::btree_map(0_u32..10_000, (0_u8..3, 0_u64..4, 0_u32..2), 1..40),
            seed in any::<u64>(),
        ) {
            let sorting = Sorting::by_entry_hash();
            let items: Vec<ShallowEntry> = raw
                .iter()
                .map(|(h, (id, wall, logical))| shallow(&format!("{h:05}"), *id, *wall, *logical))
                .collect();

            let mut forward = items.clone();
            let mut shuffled = items;
            let len = shuffled.len();
            for i in 0..len {
                let j = usize::try_from(seed.wrapping_mul(i as u64 + 1) % len as u64).unwrap_or(0);
                shuffled.swap(i, j);
            }
            sorting.sort(&mut forward).expect("sort");
            sorting.sort(&mut shuffled).expect("sort");
            prop_assert_eq!(hashes(&forward), hashes(&shuffled));

            for pair in forward.windows(2) {
                let forward_cmp = sorting.compare(&pair[0], &pair[1]).expect("cmp");
                let backward_cmp = sorting.compare(&pair[1], &pair[0]).expect("cmp");
                prop_assert_eq!(forward_cmp, Ordering::Less);
                prop_assert_eq!(backward_cmp, Ordering::Greater);
            }
        }
    }
}
