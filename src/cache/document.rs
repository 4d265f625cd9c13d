//! Document collaborator interface
//!
//! PDF parsing and rasterization belong to an external library. The cache
//! only needs the page count, page geometry and a way to turn a page into
//! pixels at a given resolution.

use image::RgbImage;

use super::error::RenderFault;
use super::types::{PageSize, Resolution};

/// A page-providing document shared by every cache instance.
pub trait Document: Send + Sync {
    /// Number of pages
    fn page_count(&self) -> usize;

    /// Size of a page in points, `None` when out of range
    fn page_size(&self, page: usize) -> Option<PageSize>;

    /// Open a renderer for the calling thread.
    ///
    /// Each render worker opens its own renderer when it starts; PDF engines
    /// are generally not safe to share between threads.
    fn open_renderer(&self) -> Result<Box<dyn PageRenderer>, RenderFault>;
}

/// Thread-local rasterizer for one document.
pub trait PageRenderer {
    /// Render `page` at `resolution` into an RGB bitmap.
    fn render(&mut self, page: usize, resolution: Resolution) -> Result<RgbImage, RenderFault>;
}
