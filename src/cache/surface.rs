//! Preview surface - the consumer side of a cache instance

use std::sync::Arc;

use image::RgbImage;
use log::debug;

use super::codec::decode_page;
use super::instance::SharedCache;
use super::types::{CompressedPage, PageSize, Resolution};

/// A UI surface showing pages of the document from a (possibly shared)
/// cache instance.
#[derive(Debug)]
pub struct PreviewSurface {
    name: String,
    cache: SharedCache,
    viewport: Option<(u32, u32)>,
}

impl PreviewSurface {
    #[must_use]
    pub fn new(name: impl Into<String>, cache: SharedCache) -> Self {
        Self {
            name: name.into(),
            cache,
            viewport: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    /// Last viewport passed to [`PreviewSurface::resize`]
    #[must_use]
    pub fn viewport(&self) -> Option<(u32, u32)> {
        self.viewport
    }

    /// Compressed page for display: the cached entry, or a synchronous
    /// render on a miss. `None` if the page cannot be rendered.
    pub fn page_bytes(&self, page: usize) -> Option<Arc<CompressedPage>> {
        if let Some(hit) = self.cache.borrow().lookup_bytes(page) {
            return Some(hit);
        }
        debug!("{}: cache miss for page {page}", self.name);
        self.cache.borrow_mut().render_blocking(page)
    }

    /// Decoded page for display, rendering synchronously on a miss.
    pub fn page_image(&self, page: usize) -> Option<RgbImage> {
        let bytes = self.page_bytes(page)?;
        decode_page(&bytes).ok()
    }

    /// Fit pages of `page_size` into a `width_px` x `height_px` viewport.
    ///
    /// Returns true if the resolution changed, in which case the cache
    /// instance was cleared. A controller following the instance rebuilds
    /// its region on the next tick or page change.
    pub fn resize(&mut self, width_px: u32, height_px: u32, page_size: PageSize) -> bool {
        self.viewport = Some((width_px, height_px));
        let mut cache = self.cache.borrow_mut();
        let visible = cache.part().visible_size(page_size);
        cache.set_resolution(Resolution::fit(visible, width_px, height_px))
    }

    /// Show pages from another instance. The old handle is returned; its
    /// entries live on while anyone else holds it.
    pub fn swap_cache(&mut self, cache: SharedCache) -> SharedCache {
        debug!("{}: switching cache instance", self.name);
        std::mem::replace(&mut self.cache, cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::instance::CacheInstance;
    use crate::cache::types::PagePart;
    use crate::test_utils::{FAKE_PAGE_SIZE, FakeDocument};

    fn shared(document: &Arc<FakeDocument>, part: PagePart) -> SharedCache {
        SharedCache::new(CacheInstance::new(
            "preview",
            document.clone(),
            Resolution::default(),
            part,
        ))
    }

    #[test]
    fn miss_renders_synchronously_and_stores() {
        let document = Arc::new(FakeDocument::new(3));
        let surface = PreviewSurface::new("notes", shared(&document, PagePart::Full));

        let image = surface.page_image(1).unwrap();
        assert_eq!(image.dimensions(), (100, 75));
        assert!(surface.cache().borrow().contains(1));

        // second lookup is a hit
        surface.page_image(1).unwrap();
        assert_eq!(document.rendered_pages(), vec![1]);
    }

    #[test]
    fn missing_page_yields_nothing() {
        let document = Arc::new(FakeDocument::new(2));
        let surface = PreviewSurface::new("notes", shared(&document, PagePart::Full));
        assert!(surface.page_image(7).is_none());
        assert!(surface.cache().borrow().is_empty());
    }

    #[test]
    fn resize_fits_visible_part() {
        let document = Arc::new(FakeDocument::new(2));
        let mut surface = PreviewSurface::new("slide", shared(&document, PagePart::RightHalf));
        surface.page_image(0).unwrap();

        // half of a 100pt wide page into 100px: 2 px per point
        assert!(surface.resize(100, 1000, FAKE_PAGE_SIZE));
        assert!(surface.cache().borrow().is_empty());
        assert!((surface.cache().borrow().resolution().dpi() - 144.0).abs() < 0.01);
        assert!(!surface.resize(100, 1000, FAKE_PAGE_SIZE));

        let image = surface.page_image(0).unwrap();
        assert_eq!(image.dimensions(), (100, 150));
    }

    #[test]
    fn swapping_keeps_entries_alive_for_other_sharer() {
        let document = Arc::new(FakeDocument::new(3));
        let common = shared(&document, PagePart::Full);
        let mut first = PreviewSurface::new("a", common.clone());
        let second = PreviewSurface::new("b", common);

        first.page_image(2).unwrap();
        let old = first.swap_cache(shared(&document, PagePart::Full));
        drop(old);

        assert!(second.cache().borrow().contains(2));
        assert!(!first.cache().borrow().contains(2));
    }
}
