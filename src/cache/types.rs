//! Core types for the page-image cache

use std::fmt;

/// Page size in PDF points (1/72 inch)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Target rendering resolution in dots per inch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Resolution {
    dpi: f32,
}

impl Resolution {
    /// Smallest resolution accepted; anything below renders to nothing useful.
    pub const MIN_DPI: f32 = 1.0;

    #[must_use]
    pub fn from_dpi(dpi: f32) -> Self {
        Self {
            dpi: if dpi.is_finite() {
                dpi.max(Self::MIN_DPI)
            } else {
                Self::MIN_DPI
            },
        }
    }

    /// Resolution from pixels per PDF point.
    #[must_use]
    pub fn from_pixels_per_point(scale: f32) -> Self {
        Self::from_dpi(scale * 72.0)
    }

    /// Largest resolution at which a page of `page` size fits into
    /// a `width_px` x `height_px` viewport, keeping the aspect ratio.
    #[must_use]
    pub fn fit(page: PageSize, width_px: u32, height_px: u32) -> Self {
        if page.width <= 0.0 || page.height <= 0.0 {
            return Self::from_dpi(Self::MIN_DPI);
        }
        let scale_w = width_px as f32 / page.width;
        let scale_h = height_px as f32 / page.height;
        Self::from_pixels_per_point(scale_w.min(scale_h))
    }

    #[must_use]
    pub const fn dpi(self) -> f32 {
        self.dpi
    }

    /// Pixels per PDF point
    #[must_use]
    pub fn scale(self) -> f32 {
        self.dpi / 72.0
    }

    /// Two resolutions within half a dot per inch produce the same bitmaps.
    #[must_use]
    pub fn same_as(self, other: Self) -> bool {
        (self.dpi - other.dpi).abs() < 0.5
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::from_dpi(72.0)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}dpi", self.dpi)
    }
}

/// Part of a page kept by a cache instance.
///
/// Beamer presentations with notes on the second screen put the slide on one
/// half of the page and the notes on the other.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PagePart {
    #[default]
    Full,
    LeftHalf,
    RightHalf,
}

impl PagePart {
    /// Width of the page as seen through this part.
    #[must_use]
    pub fn visible_size(self, page: PageSize) -> PageSize {
        match self {
            PagePart::Full => page,
            PagePart::LeftHalf | PagePart::RightHalf => PageSize::new(page.width / 2.0, page.height),
        }
    }
}

/// A rendered page stored as a compressed (PNG) byte buffer.
///
/// Immutable once created; shared between the store and readers via `Arc`.
#[derive(Clone, PartialEq, Eq)]
pub struct CompressedPage {
    /// Page index (0-based)
    pub page: usize,
    /// Bitmap width in pixels
    pub width_px: u32,
    /// Bitmap height in pixels
    pub height_px: u32,
    bytes: Box<[u8]>,
}

impl CompressedPage {
    #[must_use]
    pub fn new(page: usize, width_px: u32, height_px: u32, bytes: Vec<u8>) -> Self {
        Self {
            page,
            width_px,
            height_px,
            bytes: bytes.into_boxed_slice(),
        }
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Footprint counted against the byte budget
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.bytes.len()
    }
}

impl fmt::Debug for CompressedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressedPage")
            .field("page", &self.page)
            .field("width_px", &self.width_px)
            .field("height_px", &self.height_px)
            .field("size_bytes", &self.bytes.len())
            .finish()
    }
}
