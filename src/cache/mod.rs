//! Page-image cache: compressed bitmaps of rendered pages, filled in the
//! background around the page currently shown

mod budget;
mod codec;
mod controller;
mod document;
mod error;
mod instance;
#[cfg(feature = "pdf")]
mod pdf;
mod region;
mod request;
mod store;
mod surface;
mod types;
mod worker;

pub use budget::{Budget, EvictionPolicy, Fraction};
pub use codec::{crop_part, decode_page, encode_page};
pub use controller::{
    CacheController, RunReport, SchedulerState, StepOutcome, StopReason,
    TickReport,
};
pub use document::{Document, PageRenderer};
pub use error::RenderFault;
pub use instance::{CacheEvent, CacheInstance, CacheStats, SharedCache};
#[cfg(feature = "pdf")]
pub use pdf::MupdfDocument;
pub use region::{CacheRegion, Window};
pub use request::{Generation, RenderJob, RenderResponse, WorkerRequest};
pub use store::PageStore;
pub use surface::PreviewSurface;
pub use types::*;
pub use worker::{DEFAULT_STOP_TIMEOUT, RenderWorker, StopOutcome};
