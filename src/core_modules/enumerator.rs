// THEORY:
// The `TubeEnumerator` expands the per-frame candidate sets of a clip into every
// possible tube: the Cartesian product with exactly one candidate per frame.
//
// Key architectural principles:
// 1.  **Stable Order**: Tubes are numbered in lexicographic order of their per-frame
//     candidate indices, last frame varying fastest, like an odometer. Index 0 is
//     `[0, 0, ..., 0]`. The linker's tie-breaking is defined against this order.
// 2.  **No Materialization**: The product is never stored. `decode` maps an index to
//     its choices and `range` walks any contiguous slice of the order, which is what
//     lets the parallel linker hand out index ranges to its workers.
// 3.  **Checked Size**: The cardinality is the product of the candidate counts and
//     is computed with checked multiplication. A product that does not fit in a
//     `u64` is a configuration error, not a wrap-around.

use crate::core_modules::proposal::{Clip, Tube};
use crate::error::{LinkError, LinkResult};

pub struct TubeEnumerator<'a> {
    clip: &'a Clip,
    radices: Vec<usize>,
    total: u64,
}

impl<'a> TubeEnumerator<'a> {
    pub fn new(clip: &'a Clip) -> LinkResult<Self> {
        let radices = clip.candidate_counts();
        if let Some(frame) = radices.iter().position(|&k| k == 0) {
            return Err(LinkError::EmptyInput { frame });
        }
        let total = radices
            .iter()
            .try_fold(1u64, |acc, &k| acc.checked_mul(k as u64))
            .ok_or_else(|| {
                LinkError::InvalidConfiguration(format!(
                    "candidate tube count for frame sizes {:?} overflows u64",
                    radices
                ))
            })?;
        Ok(Self { clip, radices, total })
    }

    /// Number of distinct tubes.
    pub fn len(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Per-frame candidate indices of the tube at `index`.
    pub fn decode(&self, mut index: u64) -> Vec<usize> {
        let mut choice = vec![0; self.radices.len()];
        for (slot, &k) in choice.iter_mut().zip(&self.radices).rev() {
            *slot = (index % k as u64) as usize;
            index /= k as u64;
        }
        choice
    }

    /// Walks the tubes numbered `start..end`, yielding their candidate indices.
    pub fn range(&self, start: u64, end: u64) -> IndexRange<'_> {
        let end = end.min(self.total);
        IndexRange {
            radices: &self.radices,
            current: self.decode(start),
            remaining: end.saturating_sub(start),
        }
    }

    /// Walks every tube's candidate indices in enumeration order.
    pub fn indices(&self) -> IndexRange<'_> {
        self.range(0, self.total)
    }

    /// Walks every tube in enumeration order.
    pub fn tubes(&self) -> impl Iterator<Item = Tube> + '_ {
        self.indices().map(move |choice| self.clip.tube(&choice))
    }
}

/// Odometer over a contiguous slice of the enumeration order.
pub struct IndexRange<'a> {
    radices: &'a [usize],
    current: Vec<usize>,
    remaining: u64,
}

impl Iterator for IndexRange<'_> {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let out = self.current.clone();

        // Advance, carrying from the last frame towards the first.
        for (slot, &k) in self.current.iter_mut().zip(self.radices).rev() {
            *slot += 1;
            if *slot < k {
                break;
            }
            *slot = 0;
        }
        Some(out)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        (n, usize::try_from(self.remaining).ok())
    }
}
