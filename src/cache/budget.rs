//! Cache budgets and eviction policy constants

use serde::{Deserialize, Serialize};

/// Size and count caps for cached pages.
///
/// `max_size_bytes <= 0` means unlimited size, `max_count < 0` means "all
/// pages". Either cap set to exactly zero disables caching.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub max_size_bytes: i64,
    pub max_count: i64,
}

impl Budget {
    #[must_use]
    pub const fn new(max_size_bytes: i64, max_count: i64) -> Self {
        Self {
            max_size_bytes,
            max_count,
        }
    }

    #[must_use]
    pub const fn unlimited() -> Self {
        Self::new(-1, -1)
    }

    #[must_use]
    pub const fn disabled() -> Self {
        Self::new(0, 0)
    }

    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        self.max_size_bytes == 0 || self.max_count == 0
    }

    /// Byte cap, `None` when size is unlimited
    #[must_use]
    pub fn size_limit(&self) -> Option<u64> {
        u64::try_from(self.max_size_bytes).ok().filter(|&s| s > 0)
    }

    /// Count cap for a document of `page_count` pages, `None` when every
    /// page may be cached.
    #[must_use]
    pub fn count_limit(&self, page_count: usize) -> Option<usize> {
        usize::try_from(self.max_count)
            .ok()
            .filter(|&n| n < page_count)
    }

    /// Whether `size` bytes in `count` entries exceed either cap.
    #[must_use]
    pub fn exceeded(&self, size: usize, count: usize, page_count: usize) -> bool {
        self.size_limit().is_some_and(|max| size as u64 > max)
            || self.count_limit(page_count).is_some_and(|max| count > max)
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// A ratio `num / den` evaluated in integer arithmetic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fraction {
    pub num: u64,
    pub den: u64,
}

impl Fraction {
    #[must_use]
    pub const fn new(num: u64, den: u64) -> Self {
        Self { num, den }
    }

    /// `value > self * of`
    #[must_use]
    pub fn exceeded_by(self, value: u64, of: u64) -> bool {
        u128::from(value) * u128::from(self.den) > u128::from(of) * u128::from(self.num)
    }

    /// `value >= self * of`
    #[must_use]
    pub fn reached_by(self, value: u64, of: u64) -> bool {
        u128::from(value) * u128::from(self.den) >= u128::from(of) * u128::from(self.num)
    }
}

/// Tunable constants of the fill and eviction heuristics.
///
/// Only the qualitative behaviour matters: keep some pages behind the
/// current one when evicting, and stop filling when the next page would
/// be evicted right away.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Share of the delete window kept behind the current page
    pub behind_share: Fraction,
    /// Usage above which backward filling stops
    pub backfill_limit: Fraction,
    /// Usage above which forward filling is checked for thrashing
    pub thrash_threshold: Fraction,
    /// Forward filling stops when less than this many average pages fit
    pub headroom_pages: u64,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            behind_share: Fraction::new(1, 4),
            backfill_limit: Fraction::new(2, 3),
            thrash_threshold: Fraction::new(2, 3),
            headroom_pages: 2,
        }
    }
}

impl EvictionPolicy {
    /// Whether the next eviction should take the page ahead of the current
    /// one, given the delete window spans `behind` pages before and `ahead`
    /// pages after it.
    #[must_use]
    pub fn evict_ahead(&self, behind: u64, ahead: u64) -> bool {
        let keep = self.behind_share;
        u128::from(ahead) * u128::from(keep.num)
            > u128::from(behind) * u128::from(keep.den.saturating_sub(keep.num))
    }
}
