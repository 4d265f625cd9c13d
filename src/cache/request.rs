//! Render job and response types

use super::error::RenderFault;
use super::types::{CompressedPage, PagePart, Resolution};

/// Cache generation a job was issued for.
///
/// Bumped every time an instance drops its entries or disowns its worker
/// (clear, resolution change, interrupt). Completions carrying an older
/// generation are stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(pub u64);

impl Generation {
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// One page to render, sent to a render worker
#[derive(Clone, Debug)]
pub struct RenderJob {
    pub generation: Generation,
    pub page: usize,
    pub resolution: Resolution,
    pub part: PagePart,
}

/// Message from the owning instance to its worker
#[derive(Debug)]
pub enum WorkerRequest {
    Render(RenderJob),
    Shutdown,
}

/// Message from a worker back to the owning instance
#[derive(Debug)]
pub enum RenderResponse {
    Rendered {
        generation: Generation,
        page: CompressedPage,
    },
    Failed {
        generation: Generation,
        page: usize,
        error: RenderFault,
    },
}

impl RenderResponse {
    #[must_use]
    pub fn generation(&self) -> Generation {
        match self {
            RenderResponse::Rendered { generation, .. }
            | RenderResponse::Failed { generation, .. } => *generation,
        }
    }

    #[must_use]
    pub fn page(&self) -> usize {
        match self {
            RenderResponse::Rendered { page, .. } => page.page,
            RenderResponse::Failed { page, .. } => *page,
        }
    }
}
