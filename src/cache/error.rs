//! Render failures

/// Errors from rendering a page into the cache.
///
/// None of these reach the UI as errors: the cache absorbs them into
/// "no entry available" and the surface falls back to a direct render.
#[derive(Debug, thiserror::Error)]
pub enum RenderFault {
    #[error("page {page} out of range (document has {page_count} pages)")]
    PageOutOfRange { page: usize, page_count: usize },

    #[error("renderer produced an empty image for page {page}")]
    EmptyImage { page: usize },

    #[error("image codec: {0}")]
    Encode(#[from] image::ImageError),

    #[cfg(feature = "pdf")]
    #[error("PDF engine: {0}")]
    Pdf(#[from] mupdf::error::Error),

    #[error("{detail}")]
    Backend { detail: String },
}

impl RenderFault {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend { detail: msg.into() }
    }
}
