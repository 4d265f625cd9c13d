//! Deterministic stand-ins for a real document, shared by unit and
//! integration tests.

use std::collections::BTreeSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};

use crate::cache::{Document, PageRenderer, PageSize, RenderFault, Resolution};

/// Page size of every fake page, in points
pub const FAKE_PAGE_SIZE: PageSize = PageSize::new(100.0, 75.0);

const GATE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct GateState {
    held: bool,
    rendering: usize,
    log: Vec<usize>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory document whose pages render to solid colours.
///
/// Every page is [`FAKE_PAGE_SIZE`]; the colour depends on the page index
/// so bitmaps of different pages differ.
pub struct FakeDocument {
    page_count: usize,
    failing: BTreeSet<usize>,
    shared: Arc<Shared>,
}

impl FakeDocument {
    pub fn new(page_count: usize) -> Self {
        Self {
            page_count,
            failing: BTreeSet::new(),
            shared: Arc::default(),
        }
    }

    /// Rendering `page` fails with a backend error.
    pub fn failing_on(mut self, page: usize) -> Self {
        self.failing.insert(page);
        self
    }

    /// Block every render until the returned gate is released.
    pub fn hold_renders(&self) -> RenderGate {
        self.shared.lock().held = true;
        RenderGate {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Pages rendered so far, in order, on any thread
    pub fn rendered_pages(&self) -> Vec<usize> {
        self.shared.lock().log.clone()
    }
}

impl Document for FakeDocument {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn page_size(&self, page: usize) -> Option<PageSize> {
        (page < self.page_count).then_some(FAKE_PAGE_SIZE)
    }

    fn open_renderer(&self) -> Result<Box<dyn PageRenderer>, RenderFault> {
        Ok(Box::new(FakeRenderer {
            failing: self.failing.clone(),
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct FakeRenderer {
    failing: BTreeSet<usize>,
    shared: Arc<Shared>,
}

impl PageRenderer for FakeRenderer {
    fn render(&mut self, page: usize, resolution: Resolution) -> Result<RgbImage, RenderFault> {
        {
            let mut state = self.shared.lock();
            state.rendering += 1;
            self.shared.changed.notify_all();
            while state.held {
                state = self
                    .shared
                    .changed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            state.rendering -= 1;
            state.log.push(page);
        }

        if self.failing.contains(&page) {
            return Err(RenderFault::backend(format!("page {page} is broken")));
        }

        let width = (FAKE_PAGE_SIZE.width * resolution.scale()).round() as u32;
        let height = (FAKE_PAGE_SIZE.height * resolution.scale()).round() as u32;
        let shade = (page * 37 % 256) as u8;
        Ok(RgbImage::from_pixel(width, height, Rgb([shade, 255 - shade, 128])))
    }
}

/// Holds renders of a [`FakeDocument`] until released.
pub struct RenderGate {
    shared: Arc<Shared>,
}

impl RenderGate {
    /// Block renders that start from now on.
    pub fn hold(&self) {
        self.shared.lock().held = true;
    }

    pub fn release(&self) {
        self.shared.lock().held = false;
        self.shared.changed.notify_all();
    }

    /// Wait until some render is blocked on the gate.
    ///
    /// Panics after a few seconds so a broken test fails instead of hanging.
    pub fn wait_until_rendering(&self) {
        let deadline = Instant::now() + GATE_TIMEOUT;
        let mut state = self.shared.lock();
        while state.rendering == 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            assert!(!remaining.is_zero(), "no render started within {GATE_TIMEOUT:?}");
            state = self
                .shared
                .changed
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl Drop for RenderGate {
    fn drop(&mut self) {
        self.release();
    }
}
