//! Contiguous cached region around the current page

/// Bookkeeping of the run of cached pages the scheduler grows.
///
/// Indices are signed: an empty run at page 0 has `last_cached == -1`.
/// The target invariant is
/// `first_delete <= first_cached <= current <= last_cached + 1 <= last_delete + 1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    /// Pages below this index are evicted first
    pub first_delete: i64,
    /// First page of the cached run
    pub first_cached: i64,
    /// Last page of the cached run
    pub last_cached: i64,
    /// Pages above this index are evicted first
    pub last_delete: i64,
}

impl Window {
    /// Empty run at `current`, eviction frontier spanning the whole document.
    #[must_use]
    pub fn empty_at(current: usize, page_count: usize) -> Self {
        let current = current as i64;
        Self {
            first_delete: 0,
            first_cached: current,
            last_cached: current - 1,
            last_delete: page_count as i64 - 1,
        }
    }

    /// `page` lies inside the cached run
    #[must_use]
    pub fn contains(&self, page: usize) -> bool {
        let page = page as i64;
        self.first_cached <= page && page <= self.last_cached
    }

    #[must_use]
    pub fn is_valid(&self, current: usize) -> bool {
        let current = current as i64;
        self.first_delete <= self.first_cached
            && self.first_cached <= current
            && current <= self.last_cached + 1
            && self.last_cached <= self.last_delete
    }

    /// Number of pages in the cached run
    #[must_use]
    pub fn cached_len(&self) -> usize {
        (self.last_cached - self.first_cached + 1).max(0) as usize
    }

    /// Keep deletion outside the run after the current page moved inside it.
    pub fn widen_frontier(&mut self, current: usize, cached_count: usize, page_count: usize) {
        let current = current as i64;
        let cached_count = cached_count as i64;
        let last_page = page_count as i64 - 1;

        self.last_delete = self.last_delete.max(current + cached_count).min(last_page);
        self.first_delete = self.first_delete.min(current - cached_count / 2).max(0);
    }

    /// Pages between the lower frontier and `current`
    #[must_use]
    pub fn behind(&self, current: usize) -> u64 {
        (current as i64 - self.first_delete).max(0) as u64
    }

    /// Pages between `current` and the upper frontier
    #[must_use]
    pub fn ahead(&self, current: usize) -> u64 {
        (self.last_delete - current as i64).max(0) as u64
    }
}

/// State of the cached region of one controller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CacheRegion {
    /// No page has been shown yet
    #[default]
    Idle,
    /// A run is being grown around the current page
    Growing(Window),
    /// The run no longer contains the current page; it is rebuilt at the
    /// next page change
    Resetting(Window),
}

impl CacheRegion {
    /// Update for a new current page. Returns true if the region was reset.
    pub fn on_page_change(&mut self, current: usize, cached_count: usize, page_count: usize) -> bool {
        match self {
            CacheRegion::Growing(window) if window.contains(current) => {
                window.widen_frontier(current, cached_count, page_count);
                false
            }
            _ => {
                *self = CacheRegion::Growing(Window::empty_at(current, page_count));
                true
            }
        }
    }

    /// Give up on the current run until the next page change.
    pub fn invalidate(&mut self) {
        if let CacheRegion::Growing(window) = *self {
            *self = CacheRegion::Resetting(window);
        }
    }

    /// Forget the run entirely, e.g. after the cached pages were dropped.
    pub fn reset(&mut self) {
        *self = CacheRegion::Idle;
    }

    #[must_use]
    pub fn window(&self) -> Option<&Window> {
        match self {
            CacheRegion::Growing(window) | CacheRegion::Resetting(window) => Some(window),
            CacheRegion::Idle => None,
        }
    }

    /// Mutable window while the region is growing
    pub fn growing_mut(&mut self) -> Option<&mut Window> {
        match self {
            CacheRegion::Growing(window) => Some(window),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_is_valid_at_current_page() {
        let window = Window::empty_at(0, 10);
        assert!(window.is_valid(0));
        assert_eq!(window.cached_len(), 0);
        assert!(!window.contains(0));
        assert_eq!(window.last_cached, -1);
    }

    #[test]
    fn page_change_outside_run_resets() {
        let mut region = CacheRegion::default();
        assert!(region.on_page_change(4, 0, 10));

        let window = region.growing_mut().unwrap();
        window.last_cached = 7;
        window.first_delete = 2;

        assert!(!region.on_page_change(6, 4, 10));
        assert!(region.on_page_change(8, 4, 10));
        assert_eq!(region.window(), Some(&Window::empty_at(8, 10)));
    }

    #[test]
    fn widen_frontier_stays_in_document() {
        let mut window = Window {
            first_delete: 3,
            first_cached: 4,
            last_cached: 7,
            last_delete: 8,
        };
        window.widen_frontier(6, 4, 10);
        assert_eq!(window.last_delete, 9);
        assert_eq!(window.first_delete, 3);

        window.widen_frontier(4, 12, 10);
        assert_eq!(window.first_delete, 0);
        assert_eq!(window.last_delete, 9);
    }

    #[test]
    fn invalidated_region_resets_on_next_page_change() {
        let mut region = CacheRegion::default();
        region.on_page_change(2, 0, 5);
        region.invalidate();
        assert!(matches!(region, CacheRegion::Resetting(_)));
        assert!(region.growing_mut().is_none());

        assert!(region.on_page_change(2, 0, 5));
        assert!(matches!(region, CacheRegion::Growing(_)));
    }

    #[test]
    fn validity_checks_each_bound() {
        let window = Window {
            first_delete: 1,
            first_cached: 2,
            last_cached: 5,
            last_delete: 6,
        };
        assert!(window.is_valid(2));
        assert!(window.is_valid(6));
        assert!(!window.is_valid(1));
        assert!(!window.is_valid(7));
        assert!(window.contains(5));
        assert!(!window.contains(6));
    }
}
