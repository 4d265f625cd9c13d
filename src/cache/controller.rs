//! Cache controller - keeps the cache instances warm around the current page
//!
//! Outline of one pass:
//!
//! 1. [`CacheController::set_current_page`] updates the cached region and
//!    (re)starts stepping.
//! 2. The host calls [`CacheController::tick`] whenever the interaction
//!    thread is idle. A tick drains finished renders and, once no render of
//!    the last dispatch is outstanding, performs one scheduling step.
//! 3. A step evicts pages while the budget is exceeded, then picks the next
//!    page to render and hands it to every instance that lacks it.
//! 4. Stepping stops when everything is cached, the budget is used up, a
//!    render failed, or the region has to be rebuilt at the next page change.

use std::cmp::Reverse;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};

use super::budget::{Budget, EvictionPolicy};
use super::document::Document;
use super::instance::{CacheEvent, SharedCache};
use super::region::{CacheRegion, Window};
use super::request::Generation;
use super::worker::{DEFAULT_STOP_TIMEOUT, StopOutcome};

/// Whether the controller keeps stepping on idle ticks
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Stepping,
}

/// Why stepping stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Every instance holds every page
    AllCached,
    /// A cap is zero
    Disabled,
    /// No page has been shown yet
    NoRegion,
    /// The current page left the cached run; rebuilt on the next page change
    RegionInvalid,
    /// Rendering more pages would only evict them again
    BudgetReached,
    /// The run reaches the last page and there is no room to grow backwards
    Finished,
    /// A render failed; retried on the next page change
    RenderFailed,
    /// An instance refused the page for reasons other than having it
    Blocked,
}

/// Result of one scheduling step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Bookkeeping advanced without rendering; step again
    Continue,
    /// Renders of the previous dispatch are still outstanding; nothing done
    Pending,
    /// `started` instances are rendering `page`
    Dispatched { page: usize, started: usize },
    Stopped(StopReason),
}

/// What a tick did
#[derive(Debug, Default)]
pub struct TickReport {
    pub events: Vec<CacheEvent>,
    pub step: Option<StepOutcome>,
}

/// What [`CacheController::run_until_idle`] did
#[derive(Debug, Default)]
pub struct RunReport {
    pub events: Vec<CacheEvent>,
    pub dispatched: Vec<usize>,
    pub stop: Option<StopReason>,
    pub timed_out: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// An attached instance and the generation it had when the controller
/// last looked at it
#[derive(Debug)]
struct Follower {
    cache: SharedCache,
    generation: Generation,
}

#[derive(Clone, Copy, Debug)]
struct Dispatch {
    page: usize,
    direction: Direction,
    failed: bool,
}

/// Drives every cache instance that follows one page-advance event.
pub struct CacheController {
    document: Arc<dyn Document>,
    instances: Vec<Follower>,
    budget: Budget,
    policy: EvictionPolicy,
    current_page: usize,
    region: CacheRegion,
    state: SchedulerState,
    running_renders: usize,
    dispatch: Option<Dispatch>,
    stop_timeout: Duration,
}

impl CacheController {
    #[must_use]
    pub fn new(document: Arc<dyn Document>, budget: Budget) -> Self {
        Self::with_policy(document, budget, EvictionPolicy::default())
    }

    #[must_use]
    pub fn with_policy(document: Arc<dyn Document>, budget: Budget, policy: EvictionPolicy) -> Self {
        Self {
            document,
            instances: Vec::new(),
            budget,
            policy,
            current_page: 0,
            region: CacheRegion::default(),
            state: SchedulerState::Idle,
            running_renders: 0,
            dispatch: None,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Bounded wait used when tearing down workers
    #[must_use]
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Follow `cache` on page changes. Returns false if it is already attached.
    pub fn attach(&mut self, cache: SharedCache) -> bool {
        if self.caches().any(|c| c.same_instance(&cache)) {
            return false;
        }
        let generation = {
            let mut instance = cache.borrow_mut();
            instance.set_budget(self.budget);
            instance.generation()
        };
        self.instances.push(Follower { cache, generation });
        true
    }

    /// Stop following `cache`. Its entries stay with whoever still holds it.
    pub fn detach(&mut self, cache: &SharedCache) -> bool {
        let before = self.instances.len();
        self.instances.retain(|f| !f.cache.same_instance(cache));
        self.instances.len() != before
    }

    pub fn instances(&self) -> impl ExactSizeIterator<Item = &SharedCache> + '_ {
        self.caches()
    }

    fn caches(&self) -> impl ExactSizeIterator<Item = &SharedCache> + '_ {
        self.instances.iter().map(|f| &f.cache)
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.document.page_count()
    }

    #[must_use]
    pub fn current_page(&self) -> usize {
        self.current_page
    }

    #[must_use]
    pub fn budget(&self) -> Budget {
        self.budget
    }

    #[must_use]
    pub fn region(&self) -> CacheRegion {
        self.region
    }

    #[must_use]
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Renders of the last dispatch still outstanding across instances
    #[must_use]
    pub fn running_renders(&self) -> usize {
        self.running_renders
    }

    /// Compressed bytes held by all instances together
    #[must_use]
    pub fn total_size_bytes(&self) -> usize {
        self.caches().map(|c| c.borrow().size_bytes()).sum()
    }

    /// Entries counted against the count cap: every instance caches the same
    /// pages, so the fullest one is representative.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.caches().map(|c| c.borrow().len()).max().unwrap_or(0)
    }

    /// Every instance holds every page
    #[must_use]
    pub fn all_cached(&self) -> bool {
        let page_count = self.page_count();
        self.caches().all(|c| c.borrow().len() >= page_count)
    }

    /// Replace the caps. `max_count < 0` means all pages, `max_size <= 0`
    /// unlimited size, a zero in either disables caching.
    pub fn set_budget(&mut self, max_size_bytes: i64, max_count: i64) {
        self.budget = Budget::new(max_size_bytes, max_count);
        for cache in self.caches() {
            cache.borrow_mut().set_budget(self.budget);
        }

        if self.budget.is_disabled() {
            self.interrupt_all(Duration::ZERO);
            self.region.reset();
            return;
        }
        // Tighter caps are enforced by the next step.
        if matches!(self.region, CacheRegion::Growing(_)) {
            self.state = SchedulerState::Stepping;
        }
    }

    /// The page shown to the audience changed.
    pub fn set_current_page(&mut self, page: usize) {
        let page_count = self.page_count();
        if page_count == 0 {
            return;
        }
        self.current_page = page.min(page_count - 1);
        self.state = SchedulerState::Idle;
        self.forget_region_if_stale();

        if self.budget.is_disabled() {
            self.clear_all();
            return;
        }
        if self.all_cached() && !self.over_budget() {
            return;
        }

        let cached_count = self.cached_count();
        if self
            .region
            .on_page_change(self.current_page, cached_count, page_count)
        {
            // Outstanding renders still count, but no longer grow this run.
            self.dispatch = None;
            if let Some(w) = self.region.window() {
                debug!(
                    "Reset cache region {} {} {} {} {}",
                    w.first_delete, w.first_cached, self.current_page, w.last_cached, w.last_delete
                );
            }
        }

        if let Some(w) = self.region.window() {
            if w.last_cached < page_count as i64 - 1 || w.first_cached > 0 || self.over_budget() {
                self.state = SchedulerState::Stepping;
            }
        }
    }

    /// Rebuild the region from scratch at the current page.
    ///
    /// Instances cleared behind the controller's back (a resize, a direct
    /// `clear`) are noticed on the next tick or page change without this.
    pub fn reset_region(&mut self) {
        self.region.reset();
        self.dispatch = None;
        let page = self.current_page;
        self.set_current_page(page);
    }

    /// One idle tick of the interaction thread.
    pub fn tick(&mut self) -> TickReport {
        let events: Vec<CacheEvent> = self
            .caches()
            .flat_map(|c| c.borrow_mut().poll())
            .collect();
        for event in &events {
            self.on_event(event);
        }
        if self.forget_region_if_stale() {
            let page = self.current_page;
            self.set_current_page(page);
        }

        let step = (self.state == SchedulerState::Stepping && self.running_renders == 0)
            .then(|| self.step());

        TickReport { events, step }
    }

    fn on_event(&mut self, event: &CacheEvent) {
        if self.running_renders == 0 {
            return;
        }
        self.running_renders -= 1;

        if let Some(dispatch) = self.dispatch.as_mut() {
            if dispatch.page == event.page() && matches!(event, CacheEvent::Failed { .. }) {
                dispatch.failed = true;
            }
        }
        if self.running_renders == 0 {
            self.finish_dispatch();
        }
    }

    fn finish_dispatch(&mut self) {
        let Some(dispatch) = self.dispatch.take() else {
            return;
        };
        if dispatch.failed {
            debug!("Stopped cache updates: page {} failed", dispatch.page);
            self.state = SchedulerState::Idle;
            return;
        }
        if self.cached_everywhere(dispatch.page) {
            self.advance(dispatch.page, dispatch.direction);
        }
    }

    fn cached_everywhere(&self, page: usize) -> bool {
        self.caches().all(|c| c.borrow().contains(page))
    }

    fn advance(&mut self, page: usize, direction: Direction) {
        let Some(window) = self.region.growing_mut() else {
            return;
        };
        let page = page as i64;
        match direction {
            Direction::Forward if page == window.last_cached + 1 => window.last_cached = page,
            Direction::Backward if page == window.first_cached - 1 => window.first_cached = page,
            _ => {}
        }
    }

    fn clear_all(&mut self) {
        for cache in self.caches() {
            cache.borrow_mut().clear();
        }
        self.region.reset();
        self.remember_generations();
    }

    fn remember_generations(&mut self) {
        for follower in &mut self.instances {
            follower.generation = follower.cache.borrow().generation();
        }
    }

    /// Drop the region if an instance was cleared or lost a page of the
    /// cached run outside the controller. Returns true if a region existed.
    fn forget_region_if_stale(&mut self) -> bool {
        let mut cleared = false;
        for follower in &mut self.instances {
            let generation = follower.cache.borrow().generation();
            if generation != follower.generation {
                follower.generation = generation;
                cleared = true;
            }
        }
        let trimmed = match self.region {
            CacheRegion::Growing(w) if w.cached_len() > 0 => {
                (w.first_cached..=w.last_cached).any(|p| !self.cached_everywhere(p as usize))
            }
            _ => false,
        };
        if !(cleared || trimmed) || self.region == CacheRegion::Idle {
            return false;
        }

        debug!("Cache instances changed under the controller, rebuilding region");
        self.region.reset();
        self.dispatch = None;
        // Cleared instances still report their outstanding render; interrupted
        // ones never will.
        self.running_renders = self.caches().filter(|c| c.borrow().is_busy()).count();
        true
    }

    fn stop(&mut self, reason: StopReason) -> StepOutcome {
        self.state = SchedulerState::Idle;
        if let Some(w) = self.region.window() {
            debug!(
                "Stopped cache updates ({reason:?}) {} {} {} {} {}",
                w.first_delete, w.first_cached, self.current_page, w.last_cached, w.last_delete
            );
        }
        StepOutcome::Stopped(reason)
    }

    /// One scheduling step: evict while over budget, then pick the next page.
    /// Does nothing while renders of the previous dispatch are outstanding.
    pub fn step(&mut self) -> StepOutcome {
        if self.running_renders > 0 {
            return StepOutcome::Pending;
        }
        if self.budget.is_disabled() {
            self.clear_all();
            return self.stop(StopReason::Disabled);
        }
        if self.all_cached() && !self.over_budget() {
            info!(
                "All slides rendered to cache. Cache size: {} bytes",
                self.total_size_bytes()
            );
            return self.stop(StopReason::AllCached);
        }

        let current = self.current_page;
        let Some(window) = self.region.growing_mut().copied() else {
            return match self.region {
                CacheRegion::Idle => self.stop(StopReason::NoRegion),
                _ => self.stop(StopReason::RegionInvalid),
            };
        };
        if !window.is_valid(current) {
            self.region.invalidate();
            return self.stop(StopReason::RegionInvalid);
        }

        let window = match self.free_space(window) {
            Some(window) => window,
            None => {
                self.region.invalidate();
                return self.stop(StopReason::RegionInvalid);
            }
        };
        if let Some(slot) = self.region.growing_mut() {
            *slot = window;
        }

        let page_count = self.page_count() as i64;
        if window.last_cached + 1 >= page_count {
            if window.first_cached > window.first_delete && self.room_to_grow_backwards() {
                return self.start_renders((window.first_cached - 1) as usize, Direction::Backward);
            }
            return self.stop(StopReason::Finished);
        }

        if self.next_page_would_be_evicted(&window) {
            return self.stop(StopReason::BudgetReached);
        }
        self.start_renders((window.last_cached + 1) as usize, Direction::Forward)
    }

    fn over_budget(&self) -> bool {
        self.budget
            .exceeded(self.total_size_bytes(), self.cached_count(), self.page_count())
    }

    /// Evict until the budget holds. Returns `None` if that broke the region.
    fn free_space(&mut self, mut window: Window) -> Option<Window> {
        if !self.over_budget() {
            return Some(window);
        }
        self.sweep_strays(&window);

        let current = self.current_page;
        while self.over_budget() {
            if window.first_delete > window.last_delete {
                // Nothing left to free; the budget cannot hold a single page.
                return None;
            }
            if self
                .policy
                .evict_ahead(window.behind(current), window.ahead(current))
            {
                self.free_page(window.last_delete as usize, "last");
                window.last_delete -= 1;
                window.last_cached = window.last_cached.min(window.last_delete);
            } else {
                self.free_page(window.first_delete as usize, "first");
                window.first_delete += 1;
                window.first_cached = window.first_cached.max(window.first_delete);
            }

            if !window.is_valid(current) {
                debug!(
                    "Need to reset cache region {} {} {} {} {}",
                    window.first_delete, window.first_cached, current, window.last_cached, window.last_delete
                );
                return None;
            }
        }
        Some(window)
    }

    /// Evict entries outside the cached run first, farthest from the current
    /// page first. They are left behind by direct renders and earlier runs.
    fn sweep_strays(&mut self, window: &Window) {
        let current = self.current_page;
        let mut strays: Vec<usize> = self
            .caches()
            .flat_map(|c| c.borrow().cached_pages())
            .filter(|&page| !window.contains(page))
            .collect();
        strays.sort_unstable();
        strays.dedup();
        strays.sort_by_key(|&page| Reverse(page.abs_diff(current)));

        for page in strays {
            if !self.over_budget() {
                break;
            }
            self.free_page(page, "stray");
        }
    }

    fn free_page(&mut self, page: usize, side: &str) -> usize {
        let freed: usize = self
            .caches()
            .map(|c| c.borrow_mut().evict_page(page))
            .sum();
        if freed > 0 {
            debug!(
                "Freed {side} page {page}. Cache size {} B",
                self.total_size_bytes()
            );
        }
        freed
    }

    /// Spare budget for growing the run below the current page
    fn room_to_grow_backwards(&self) -> bool {
        let limit = self.policy.backfill_limit;
        let size_ok = self
            .budget
            .size_limit()
            .is_none_or(|max| !limit.reached_by(self.total_size_bytes() as u64, max));
        let count_ok = self
            .budget
            .count_limit(self.page_count())
            .is_none_or(|max| !limit.reached_by(self.cached_count() as u64, max as u64));
        size_ok && count_ok
    }

    /// Heuristic against render-then-evict cycles under tight budgets.
    fn next_page_would_be_evicted(&self, window: &Window) -> bool {
        let current = self.current_page as i64;
        let count = self.cached_count() as u64;
        let size = self.total_size_bytes() as u64;
        let threshold = self.policy.thrash_threshold;
        let at_frontier = window.last_cached >= window.last_delete;

        let size_full = self.budget.size_limit().is_some_and(|max| {
            let ahead = (window.last_cached - current).max(0) as u64;
            threshold.exceeded_by(size, max)
                && (at_frontier || threshold.exceeded_by(ahead * size, count * max))
                && max.saturating_sub(size) * count < self.policy.headroom_pages * size
        });

        let count_full = self
            .budget
            .count_limit(self.page_count())
            .is_some_and(|max| {
                let forward = (window.last_cached - current + 1).max(0) as u64;
                count >= max as u64 && (at_frontier || threshold.reached_by(forward, max as u64))
            });

        size_full || count_full
    }

    fn start_renders(&mut self, page: usize, direction: Direction) -> StepOutcome {
        let started = self
            .caches()
            .filter(|c| c.borrow_mut().request_render(page))
            .count();

        if started == 0 {
            if self.cached_everywhere(page) {
                self.advance(page, direction);
                return StepOutcome::Continue;
            }
            return self.stop(StopReason::Blocked);
        }

        debug!("Cache page {page} in {started} instances");
        self.running_renders = started;
        self.dispatch = Some(Dispatch {
            page,
            direction,
            failed: false,
        });
        StepOutcome::Dispatched { page, started }
    }

    /// Stop stepping and interrupt every worker, waiting at most `timeout`
    /// for each. Returns the number of workers abandoned.
    pub fn interrupt_all(&mut self, timeout: Duration) -> usize {
        self.state = SchedulerState::Idle;
        self.dispatch = None;
        self.running_renders = 0;

        let abandoned = self
            .caches()
            .filter(|c| c.borrow_mut().interrupt(timeout) == StopOutcome::Abandoned)
            .count();
        self.remember_generations();
        abandoned
    }

    /// Tear down all workers with the configured bounded wait.
    pub fn shutdown(&mut self) -> usize {
        self.interrupt_all(self.stop_timeout)
    }

    /// Tick until stepping stops and no render is outstanding, blocking on
    /// worker completions in between. Gives up after `timeout`.
    pub fn run_until_idle(&mut self, timeout: Duration) -> RunReport {
        let deadline = Instant::now() + timeout;
        let mut report = RunReport::default();

        loop {
            let tick = self.tick();
            report.events.extend(tick.events);
            match tick.step {
                Some(StepOutcome::Dispatched { page, .. }) => report.dispatched.push(page),
                Some(StepOutcome::Stopped(reason)) => report.stop = Some(reason),
                Some(StepOutcome::Continue | StepOutcome::Pending) | None => {}
            }

            if self.state == SchedulerState::Idle && self.running_renders == 0 {
                return report;
            }
            if Instant::now() >= deadline {
                report.timed_out = true;
                return report;
            }

            if self.running_renders > 0 {
                if !self.caches().any(|c| c.borrow().is_busy()) {
                    // Renders were disowned by an interrupt behind our back.
                    self.running_renders = 0;
                    self.dispatch = None;
                    continue;
                }
                let events: Vec<CacheEvent> = self
                    .caches()
                    .filter_map(|c| {
                        let mut cache = c.borrow_mut();
                        if cache.is_busy() {
                            let remaining = deadline.saturating_duration_since(Instant::now());
                            cache.wait_for_completion(remaining)
                        } else {
                            None
                        }
                    })
                    .collect();
                for event in &events {
                    self.on_event(event);
                }
                report.events.extend(events);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::instance::CacheInstance;
    use crate::cache::types::{PagePart, Resolution};
    use crate::test_utils::FakeDocument;

    const WAIT: Duration = Duration::from_secs(10);

    fn setup(pages: usize, budget: Budget) -> (Arc<FakeDocument>, CacheController, SharedCache) {
        let document = Arc::new(FakeDocument::new(pages));
        let cache = SharedCache::new(CacheInstance::new(
            "slides",
            document.clone(),
            Resolution::from_dpi(36.0),
            PagePart::Full,
        ));
        let mut controller = CacheController::new(document.clone(), budget);
        controller.attach(cache.clone());
        (document, controller, cache)
    }

    fn cached(cache: &SharedCache) -> Vec<usize> {
        cache.borrow().cached_pages()
    }

    #[test]
    fn unlimited_budget_caches_everything_in_order() {
        let (document, mut controller, cache) = setup(10, Budget::unlimited());
        cache.borrow_mut().render_blocking(0).unwrap();
        controller.set_current_page(0);

        let report = controller.run_until_idle(WAIT);
        assert!(!report.timed_out);
        assert_eq!(report.dispatched, (1..10).collect::<Vec<_>>());
        assert_eq!(document.rendered_pages(), (0..10).collect::<Vec<_>>());
        assert!(controller.all_cached());
        assert_eq!(controller.state(), SchedulerState::Idle);

        // nothing left to do on later ticks
        controller.set_current_page(4);
        assert_eq!(controller.state(), SchedulerState::Idle);
        assert!(controller.tick().step.is_none());
    }

    #[test]
    fn count_budget_keeps_pages_next_to_current() {
        let (_, mut controller, cache) = setup(10, Budget::new(-1, 2));
        controller.set_current_page(5);

        let report = controller.run_until_idle(WAIT);
        assert!(!report.timed_out);
        assert_eq!(report.stop, Some(StopReason::BudgetReached));
        assert_eq!(cached(&cache), vec![5, 6]);
    }

    #[test]
    fn backfills_below_current_page_at_document_end() {
        let (_, mut controller, cache) = setup(6, Budget::unlimited());
        controller.set_current_page(3);

        let report = controller.run_until_idle(WAIT);
        assert_eq!(report.dispatched, vec![3, 4, 5, 2, 1, 0]);
        assert_eq!(cached(&cache), (0..6).collect::<Vec<_>>());
    }

    #[test]
    fn size_budget_is_respected_and_current_page_survives() {
        let (_, mut controller, cache) = setup(20, Budget::unlimited());
        let page_size = cache.borrow_mut().render_blocking(0).unwrap().size_bytes() as i64;
        cache.borrow_mut().clear();

        controller.set_budget(page_size * 9 / 2, -1);
        controller.set_current_page(10);
        let report = controller.run_until_idle(WAIT);

        assert!(!report.timed_out);
        assert!(controller.total_size_bytes() as i64 <= page_size * 9 / 2);
        let pages = cached(&cache);
        assert!(pages.contains(&10), "cached: {pages:?}");
        assert!(pages.len() >= 2, "cached: {pages:?}");
        assert!(pages.iter().all(|&p| (8..=16).contains(&p)), "cached: {pages:?}");
    }

    #[test]
    fn stray_entries_go_before_the_cached_run() {
        let (_, mut controller, cache) = setup(10, Budget::new(-1, 3));
        cache.borrow_mut().render_blocking(0).unwrap();
        cache.borrow_mut().render_blocking(9).unwrap();

        controller.set_current_page(4);
        controller.run_until_idle(WAIT);

        let pages = cached(&cache);
        assert!(!pages.contains(&9), "cached: {pages:?}");
        assert!(pages.contains(&4), "cached: {pages:?}");
        assert!(pages.len() <= 3);
    }

    #[test]
    fn one_render_outstanding_per_instance() {
        let document = Arc::new(FakeDocument::new(5));
        let gate = document.hold_renders();
        let first = SharedCache::new(CacheInstance::new(
            "a",
            document.clone(),
            Resolution::default(),
            PagePart::Full,
        ));
        let second = SharedCache::new(CacheInstance::new(
            "b",
            document.clone(),
            Resolution::from_dpi(30.0),
            PagePart::LeftHalf,
        ));
        let mut controller = CacheController::new(document.clone(), Budget::unlimited());
        assert!(controller.attach(first.clone()));
        assert!(controller.attach(second.clone()));
        assert!(!controller.attach(first.clone()));

        controller.set_current_page(0);
        let tick = controller.tick();
        assert_eq!(tick.step, Some(StepOutcome::Dispatched { page: 0, started: 2 }));
        assert_eq!(controller.running_renders(), 2);

        // siblings still rendering: no further step
        for _ in 0..3 {
            assert!(controller.tick().step.is_none());
        }
        assert_eq!(controller.step(), StepOutcome::Pending);
        assert_eq!(controller.running_renders(), 2);
        assert!(first.borrow().is_busy() && second.borrow().is_busy());

        gate.release();
        let report = controller.run_until_idle(WAIT);
        assert!(!report.timed_out);
        assert_eq!(first.borrow().len(), 5);
        assert_eq!(second.borrow().len(), 5);
        assert_eq!(controller.running_renders(), 0);
    }

    #[test]
    fn render_failure_stops_until_next_page_change() {
        let document = Arc::new(FakeDocument::new(6).failing_on(2));
        let cache = SharedCache::new(CacheInstance::new(
            "slides",
            document.clone(),
            Resolution::default(),
            PagePart::Full,
        ));
        let mut controller = CacheController::new(document, Budget::unlimited());
        controller.attach(cache.clone());

        controller.set_current_page(0);
        let report = controller.run_until_idle(WAIT);
        assert!(!report.timed_out);
        assert_eq!(cached(&cache), vec![0, 1]);
        assert!(report.events.iter().any(|e| matches!(e, CacheEvent::Failed { page: 2, .. })));
        assert_eq!(controller.state(), SchedulerState::Idle);
    }

    #[test]
    fn disabling_clears_every_instance() {
        let (_, mut controller, cache) = setup(4, Budget::unlimited());
        controller.set_current_page(0);
        controller.run_until_idle(WAIT);
        assert_eq!(cache.borrow().len(), 4);

        controller.set_budget(1 << 20, 0);
        assert!(cache.borrow().is_empty());
        assert_eq!(controller.state(), SchedulerState::Idle);

        controller.set_current_page(2);
        assert!(controller.tick().step.is_none());
        assert!(cache.borrow().is_empty());
        assert!(!cache.borrow_mut().request_render(2));

        controller.set_budget(-1, -1);
        controller.set_current_page(0);
        let report = controller.run_until_idle(WAIT);
        assert!(!report.timed_out);
        assert_eq!(cache.borrow().len(), 4);
    }

    #[test]
    fn jumping_outside_the_run_resets_region() {
        let (_, mut controller, _cache) = setup(20, Budget::new(-1, 4));
        controller.set_current_page(2);
        controller.run_until_idle(WAIT);
        let before = *controller.region().window().unwrap();
        assert!(before.contains(2));

        controller.set_current_page(15);
        let window = *controller.region().window().unwrap();
        assert_eq!(window, Window::empty_at(15, 20));
        assert_eq!(controller.state(), SchedulerState::Stepping);

        controller.run_until_idle(WAIT);
        let window = *controller.region().window().unwrap();
        assert!(window.contains(15));
    }

    #[test]
    fn interrupt_all_stops_stepping_and_disowns_renders() {
        let document = Arc::new(FakeDocument::new(4));
        let gate = document.hold_renders();
        let cache = SharedCache::new(CacheInstance::new(
            "slides",
            document.clone(),
            Resolution::default(),
            PagePart::Full,
        ));
        let mut controller = CacheController::new(document, Budget::unlimited());
        controller.attach(cache.clone());
        controller.set_current_page(0);
        controller.tick();
        gate.wait_until_rendering();

        let abandoned = controller.interrupt_all(Duration::from_millis(10));
        assert_eq!(abandoned, 1);
        assert_eq!(controller.running_renders(), 0);
        assert_eq!(controller.state(), SchedulerState::Idle);

        gate.release();
        std::thread::sleep(Duration::from_millis(50));
        assert!(controller.tick().events.is_empty());
        assert!(cache.borrow().is_empty());
    }

    #[test]
    fn resolution_change_is_noticed_on_next_page_change() {
        let (_, mut controller, cache) = setup(6, Budget::unlimited());
        controller.set_current_page(0);
        controller.run_until_idle(WAIT);
        assert!(controller.all_cached());

        assert!(cache.borrow_mut().set_resolution(Resolution::from_dpi(72.0)));
        controller.set_current_page(1);
        assert_eq!(controller.state(), SchedulerState::Stepping);

        let report = controller.run_until_idle(WAIT);
        assert!(!report.timed_out);
        assert_eq!(report.dispatched, vec![1, 2, 3, 4, 5, 0]);
        assert_eq!(report.stop, Some(StopReason::AllCached));
    }

    #[test]
    fn clear_is_noticed_on_next_tick() {
        let (_, mut controller, cache) = setup(5, Budget::unlimited());
        controller.set_current_page(2);
        controller.run_until_idle(WAIT);
        assert!(controller.all_cached());

        cache.borrow_mut().clear();
        let tick = controller.tick();
        assert_eq!(tick.step, Some(StepOutcome::Dispatched { page: 2, started: 1 }));

        let report = controller.run_until_idle(WAIT);
        assert!(!report.timed_out);
        assert!(controller.all_cached());
    }

    #[test]
    fn page_evicted_from_the_run_is_rendered_again() {
        let (document, mut controller, cache) = setup(6, Budget::unlimited());
        controller.set_current_page(0);
        controller.run_until_idle(WAIT);
        assert!(cache.borrow_mut().evict_page(3) > 0);

        controller.set_current_page(0);
        let report = controller.run_until_idle(WAIT);
        assert_eq!(report.dispatched, vec![3]);
        assert!(controller.all_cached());
        assert_eq!(document.rendered_pages().iter().filter(|&&p| p == 3).count(), 2);
    }

    #[test]
    fn detached_instance_is_left_alone() {
        let (_, mut controller, cache) = setup(3, Budget::unlimited());
        assert!(controller.detach(&cache));
        assert!(!controller.detach(&cache));

        controller.set_current_page(0);
        assert!(controller.tick().step.is_none());
        assert!(cache.borrow().is_empty());
    }
}
