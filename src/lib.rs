// Export modules for use in tests
pub mod cache;
pub mod panic_handler;
pub mod settings;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use cache::{
    Budget, CacheController, CacheEvent, CacheInstance, PagePart, PreviewSurface, Resolution,
    SharedCache,
};
