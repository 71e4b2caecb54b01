//! Collection Diff Structure
//!
//! An [`IndexMap`] describes one collection mutation without recomputing full
//! equality: it is an integer array the same length as the *new* collection
//! state, where `map[i]` is the old index that now occupies position `i`, or
//! the "newly inserted" sentinel. A side list carries the old indices that
//! were deleted.
//!
//! Observers hand these to collection subscribers; a keyed repeater consumes
//! them to move the minimal number of physical views, using the longest
//! increasing subsequence of kept entries as the set of views that may stay
//! in place.

/// Sentinel entry marking a position filled by a newly inserted item.
pub const INSERTED: isize = -2;

/// Positional diff for one collection mutation.
///
/// Invariant: `entries.len()` equals the collection's post-mutation length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMap {
    entries: Vec<isize>,
    deleted: Vec<usize>,
}

impl IndexMap {
    /// Identity map for an unchanged collection of length `len`.
    pub fn identity(len: usize) -> Self {
        Self {
            entries: (0..len as isize).collect(),
            deleted: Vec::new(),
        }
    }

    /// Build a map from raw entries and deletions.
    pub fn from_parts(entries: Vec<isize>, deleted: Vec<usize>) -> Self {
        Self { entries, deleted }
    }

    /// Post-mutation collection length.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the post-mutation collection is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The old index now at position `i`, or [`INSERTED`].
    pub fn get(&self, i: usize) -> isize {
        self.entries[i]
    }

    /// True when position `i` holds a newly inserted item.
    pub fn is_inserted(&self, i: usize) -> bool {
        self.entries[i] == INSERTED
    }

    /// The raw entry list.
    pub fn entries(&self) -> &[isize] {
        &self.entries
    }

    /// Old indices removed by the mutation.
    pub fn deleted(&self) -> &[usize] {
        &self.deleted
    }

    /// True when the map describes no change at all.
    pub fn is_identity(&self) -> bool {
        self.deleted.is_empty()
            && self
                .entries
                .iter()
                .enumerate()
                .all(|(i, &e)| e == i as isize)
    }

    /// Compose this map (earlier mutation) with a later mutation's map,
    /// producing one map equivalent to applying both in sequence.
    ///
    /// Positions in `later` refer to this map's post-state; the composed map
    /// speaks entirely in the original pre-state's indices. A deletion of an
    /// item that the earlier mutation itself inserted vanishes rather than
    /// being recorded.
    pub fn compose(&self, later: &IndexMap) -> IndexMap {
        let entries = later
            .entries
            .iter()
            .map(|&e| if e >= 0 { self.entries[e as usize] } else { INSERTED })
            .collect();

        let mut deleted = self.deleted.clone();
        for &d in &later.deleted {
            let original = self.entries[d];
            if original >= 0 {
                deleted.push(original as usize);
            }
        }
        deleted.sort_unstable();

        IndexMap { entries, deleted }
    }
}

/// Positions (in the *new* order) of a maximal set of kept items whose old
/// indices form a strictly increasing sequence.
///
/// Those items can stay physically in place during a keyed reorder; every
/// other kept item must move. Newly inserted positions never participate.
///
/// Uses the patience-sorting algorithm: `O(n log n)` with a predecessor
/// trail to reconstruct one maximal subsequence.
pub fn longest_increasing_subsequence(map: &IndexMap) -> Vec<usize> {
    let entries = &map.entries;
    // tails[k] = position of the smallest old index ending an increasing
    // subsequence of length k + 1.
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; entries.len()];

    for (pos, &entry) in entries.iter().enumerate() {
        if entry < 0 {
            continue;
        }
        // Binary search for the leftmost tail with an old index >= entry.
        let mut lo = 0usize;
        let mut hi = tails.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if entries[tails[mid]] < entry {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo > 0 {
            prev[pos] = Some(tails[lo - 1]);
        }
        if lo == tails.len() {
            tails.push(pos);
        } else {
            tails[lo] = pos;
        }
    }

    let mut result = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(pos) = cursor {
        result.push(pos);
        cursor = prev[pos];
    }
    result.reverse();
    result
}
