//! Cache instance: one page store bound to one resolution, filled by its
//! own render worker

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender};
use image::RgbImage;
use log::{debug, warn};

use super::budget::Budget;
use super::codec::decode_page;
use super::document::{Document, PageRenderer};
use super::error::RenderFault;
use super::request::{Generation, RenderJob, RenderResponse};
use super::store::PageStore;
use super::types::{CompressedPage, PagePart, Resolution};
use super::worker::{DEFAULT_STOP_TIMEOUT, RenderWorker, StopOutcome, render_page};

/// Outcome of a completed background render, reported to the UI and the
/// scheduler.
#[derive(Debug)]
pub enum CacheEvent {
    /// The page was stored; the cache grew by `size_bytes`
    Stored { page: usize, size_bytes: usize },
    /// The page got cached by a synchronous render in the meantime
    AlreadyCached { page: usize },
    /// The instance was cleared while the page was rendering
    Discarded { page: usize },
    /// Rendering failed; nothing was stored
    Failed { page: usize, error: RenderFault },
}

impl CacheEvent {
    #[must_use]
    pub fn page(&self) -> usize {
        match self {
            CacheEvent::Stored { page, .. }
            | CacheEvent::AlreadyCached { page }
            | CacheEvent::Discarded { page }
            | CacheEvent::Failed { page, .. } => *page,
        }
    }

    /// The page is available in the cache after this event.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        matches!(
            self,
            CacheEvent::Stored { .. } | CacheEvent::AlreadyCached { .. }
        )
    }
}

/// Snapshot of an instance for logging and diagnostics
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CacheStats {
    pub entries: usize,
    pub size_bytes: usize,
    pub resolution: Resolution,
    pub busy: bool,
}

#[derive(Clone, Copy, Debug)]
struct InFlight {
    page: usize,
    generation: Generation,
}

/// One cache of rendered pages at one resolution.
///
/// Several UI surfaces may share an instance through [`SharedCache`].
pub struct CacheInstance {
    name: String,
    document: Arc<dyn Document>,
    resolution: Resolution,
    part: PagePart,
    budget: Budget,
    store: PageStore,
    generation: Generation,
    in_flight: Option<InFlight>,
    worker: Option<RenderWorker>,
    response_tx: Sender<RenderResponse>,
    response_rx: Receiver<RenderResponse>,
    sync_renderer: Option<Box<dyn PageRenderer>>,
    stop_timeout: Duration,
}

impl CacheInstance {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        document: Arc<dyn Document>,
        resolution: Resolution,
        part: PagePart,
    ) -> Self {
        let (response_tx, response_rx) = flume::unbounded();
        Self {
            name: name.into(),
            document,
            resolution,
            part,
            budget: Budget::unlimited(),
            store: PageStore::new(),
            generation: Generation::default(),
            in_flight: None,
            worker: None,
            response_tx,
            response_rx,
            sync_renderer: None,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Bounded wait for the worker when the instance is dropped
    #[must_use]
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    #[must_use]
    pub fn part(&self) -> PagePart {
        self.part
    }

    #[must_use]
    pub fn budget(&self) -> Budget {
        self.budget
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.document.page_count()
    }

    /// Bumped by every `clear`, resolution change and interrupt
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Decoded bitmap of a cached page. Never blocks on rendering.
    #[must_use]
    pub fn lookup(&self, page: usize) -> Option<RgbImage> {
        let entry = self.store.get(page)?;
        match decode_page(&entry) {
            Ok(image) => Some(image),
            Err(e) => {
                warn!("{}: cached page {page} failed to decode: {e}", self.name);
                None
            }
        }
    }

    /// Compressed bytes of a cached page
    #[must_use]
    pub fn lookup_bytes(&self, page: usize) -> Option<Arc<CompressedPage>> {
        self.store.get(page)
    }

    #[must_use]
    pub fn contains(&self, page: usize) -> bool {
        self.store.contains(page)
    }

    /// Hand `page` to the render worker.
    ///
    /// Returns false without doing anything if the page is cached, caching
    /// is disabled, the page does not exist, or a render is already
    /// outstanding.
    pub fn request_render(&mut self, page: usize) -> bool {
        if self.budget.is_disabled() || self.store.contains(page) {
            return false;
        }
        if page >= self.document.page_count() {
            debug!("{}: dropping render request for missing page {page}", self.name);
            return false;
        }
        if let Some(in_flight) = self.in_flight {
            debug!(
                "{}: refusing page {page}, page {} still rendering",
                self.name, in_flight.page
            );
            return false;
        }

        let job = RenderJob {
            generation: self.generation,
            page,
            resolution: self.resolution,
            part: self.part,
        };

        let Some(worker) = self.ensure_worker() else {
            return false;
        };
        if !worker.submit(job) {
            warn!("{}: render worker gone, restarting on next request", self.name);
            self.worker = None;
            return false;
        }

        self.in_flight = Some(InFlight {
            page,
            generation: self.generation,
        });
        true
    }

    fn ensure_worker(&mut self) -> Option<&RenderWorker> {
        if self.worker.is_none() {
            match RenderWorker::spawn(
                self.name.clone(),
                Arc::clone(&self.document),
                self.response_tx.clone(),
            ) {
                Ok(worker) => self.worker = Some(worker),
                Err(e) => {
                    warn!("{}: {e}", self.name);
                    return None;
                }
            }
        }
        self.worker.as_ref()
    }

    /// Take a worker response into the cache.
    ///
    /// Returns `None` for completions of jobs this instance no longer waits
    /// for (abandoned workers); those are dropped silently.
    pub fn on_render_complete(&mut self, response: RenderResponse) -> Option<CacheEvent> {
        let page = response.page();
        let generation = response.generation();

        match self.in_flight {
            Some(in_flight) if in_flight.page == page && in_flight.generation == generation => {
                self.in_flight = None;
            }
            _ => {
                debug!("{}: ignoring stale completion of page {page}", self.name);
                return None;
            }
        }

        if generation != self.generation {
            debug!("{}: page {page} finished after cache was cleared", self.name);
            return Some(CacheEvent::Discarded { page });
        }

        let event = match response {
            RenderResponse::Rendered { page: data, .. } => {
                if self.budget.is_disabled() {
                    CacheEvent::Discarded { page }
                } else if self.store.contains(page) {
                    debug!("{}: page {page} is already cached", self.name);
                    CacheEvent::AlreadyCached { page }
                } else {
                    let size_bytes = self.store.insert(data).size_bytes();
                    debug!(
                        "{}: cached page {page}; cache size {} B",
                        self.name,
                        self.store.size_bytes()
                    );
                    CacheEvent::Stored { page, size_bytes }
                }
            }
            RenderResponse::Failed { error, .. } => {
                warn!("{}: failed to render page {page}: {error}", self.name);
                CacheEvent::Failed { page, error }
            }
        };
        Some(event)
    }

    /// Drain finished renders without blocking.
    pub fn poll(&mut self) -> Vec<CacheEvent> {
        let mut events = Vec::new();
        while let Ok(response) = self.response_rx.try_recv() {
            if let Some(event) = self.on_render_complete(response) {
                events.push(event);
            }
        }
        events
    }

    /// Block up to `timeout` for the outstanding render to finish.
    pub fn wait_for_completion(&mut self, timeout: Duration) -> Option<CacheEvent> {
        let deadline = Instant::now() + timeout;
        while self.in_flight.is_some() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.response_rx.recv_timeout(remaining) {
                Ok(response) => {
                    if let Some(event) = self.on_render_complete(response) {
                        return Some(event);
                    }
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return None,
            }
        }
        None
    }

    /// Remove a page, returning the bytes freed (0 if it was not cached).
    pub fn evict_page(&mut self, page: usize) -> usize {
        let freed = self.store.remove(page);
        if freed > 0 {
            debug!("{}: freed page {page} ({freed} B)", self.name);
        }
        freed
    }

    /// Drop every entry. Renders still in flight are discarded on arrival.
    pub fn clear(&mut self) {
        let removed = self.store.clear();
        self.generation = self.generation.next();
        if removed > 0 {
            debug!("{}: cleared {removed} cached pages", self.name);
        }
    }

    /// Switch resolution; clears the cache if it actually changed.
    pub fn set_resolution(&mut self, resolution: Resolution) -> bool {
        if self.resolution.same_as(resolution) {
            return false;
        }
        debug!(
            "{}: resolution {} -> {resolution}",
            self.name, self.resolution
        );
        self.resolution = resolution;
        self.clear();
        true
    }

    /// Replace the caps. A disabling budget clears the instance at once;
    /// tighter caps are enforced by the next scheduling step.
    pub fn set_budget(&mut self, budget: Budget) {
        self.budget = budget;
        if budget.is_disabled() {
            self.clear();
        }
    }

    /// Render `page` on the calling thread, the fallback for cache misses.
    ///
    /// The result is stored unless caching is disabled or the page was
    /// cached in the meantime.
    pub fn render_blocking(&mut self, page: usize) -> Option<Arc<CompressedPage>> {
        if let Some(cached) = self.store.get(page) {
            return Some(cached);
        }

        let job = RenderJob {
            generation: self.generation,
            page,
            resolution: self.resolution,
            part: self.part,
        };
        let rendered = match render_page(&*self.document, &mut self.sync_renderer, &job) {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!("{}: direct render of page {page} failed: {e}", self.name);
                return None;
            }
        };

        if self.budget.is_disabled() {
            return Some(Arc::new(rendered));
        }
        if let Some(cached) = self.store.get(page) {
            return Some(cached);
        }
        Some(self.store.insert(rendered))
    }

    /// Interrupt the worker and wait at most `timeout` for it.
    ///
    /// Whatever it was rendering is disowned; a worker that does not stop in
    /// time is abandoned and a new one is spawned on the next request.
    pub fn interrupt(&mut self, timeout: Duration) -> StopOutcome {
        self.in_flight = None;
        self.generation = self.generation.next();
        match self.worker.take() {
            Some(worker) => worker.stop(timeout),
            None => StopOutcome::Stopped,
        }
    }

    /// A render is outstanding
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.store.size_bytes()
    }

    #[must_use]
    pub fn cached_pages(&self) -> Vec<usize> {
        self.store.pages().collect()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.store.len(),
            size_bytes: self.store.size_bytes(),
            resolution: self.resolution,
            busy: self.is_busy(),
        }
    }
}

impl fmt::Debug for CacheInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheInstance")
            .field("name", &self.name)
            .field("resolution", &self.resolution)
            .field("part", &self.part)
            .field("entries", &self.store.len())
            .field("size_bytes", &self.store.size_bytes())
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl Drop for CacheInstance {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop(self.stop_timeout);
        }
    }
}

/// Shared ownership handle to a cache instance.
///
/// Surfaces showing the same document at the same resolution hold clones
/// of one handle; the instance lives as long as any of them does.
#[derive(Clone, Debug)]
pub struct SharedCache(Rc<RefCell<CacheInstance>>);

impl SharedCache {
    #[must_use]
    pub fn new(instance: CacheInstance) -> Self {
        Self(Rc::new(RefCell::new(instance)))
    }

    #[must_use]
    pub fn borrow(&self) -> Ref<'_, CacheInstance> {
        self.0.borrow()
    }

    #[must_use]
    pub fn borrow_mut(&self) -> RefMut<'_, CacheInstance> {
        self.0.borrow_mut()
    }

    /// Both handles refer to the same instance
    #[must_use]
    pub fn same_instance(&self, other: &SharedCache) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Number of live handles
    #[must_use]
    pub fn sharers(&self) -> usize {
        Rc::strong_count(&self.0)
    }
}
