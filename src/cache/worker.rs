//! Render worker - renders one page at a time on its own thread

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};

use super::codec::encode_page;
use super::document::{Document, PageRenderer};
use super::error::RenderFault;
use super::request::{RenderJob, RenderResponse, WorkerRequest};
use super::types::CompressedPage;

/// Default bounded wait for a worker to exit on teardown
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of asking a worker to stop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    /// The worker thread has exited
    Stopped,
    /// The bounded wait expired; the thread was detached and keeps running
    /// until its current render finishes
    Abandoned,
}

/// Handle to a render worker thread.
///
/// The worker never touches the cache map: it only sends compressed bytes
/// back over the response channel, which the owning instance drains on the
/// interaction thread.
pub struct RenderWorker {
    name: String,
    request_tx: Sender<WorkerRequest>,
    interrupted: Arc<AtomicBool>,
    exited_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl RenderWorker {
    /// Spawn a worker rendering pages of `document` and reporting to `responses`.
    pub fn spawn(
        name: impl Into<String>,
        document: Arc<dyn Document>,
        responses: Sender<RenderResponse>,
    ) -> Result<Self, RenderFault> {
        let name = name.into();
        let (request_tx, request_rx) = flume::unbounded();
        let (exited_tx, exited_rx) = flume::bounded(1);
        let interrupted = Arc::new(AtomicBool::new(false));

        let thread_interrupted = Arc::clone(&interrupted);
        let handle = std::thread::Builder::new()
            .name(format!("render-{name}"))
            .spawn(move || {
                render_worker(&*document, &request_rx, &responses, &thread_interrupted);
                let _ = exited_tx.send(());
            })
            .map_err(|e| RenderFault::backend(format!("failed to spawn render worker: {e}")))?;

        debug!("Started render worker {name}");

        Ok(Self {
            name,
            request_tx,
            interrupted,
            exited_rx,
            handle: Some(handle),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hand a job to the worker. Returns false if the worker is gone or
    /// has been interrupted.
    pub fn submit(&self, job: RenderJob) -> bool {
        if self.is_interrupted() {
            return false;
        }
        self.request_tx.send(WorkerRequest::Render(job)).is_ok()
    }

    /// Ask the worker to stop after the page it is currently rendering.
    pub fn request_interruption(&self) {
        self.interrupted.store(true, Ordering::Release);
        let _ = self.request_tx.send(WorkerRequest::Shutdown);
    }

    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    /// Interrupt the worker and wait at most `timeout` for it to exit.
    pub fn stop(mut self, timeout: Duration) -> StopOutcome {
        self.request_interruption();

        let exited = match self.exited_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        };

        if exited {
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
            debug!("Render worker {} stopped", self.name);
            StopOutcome::Stopped
        } else {
            warn!(
                "Render worker {} not stopped after {} ms, abandoning it",
                self.name,
                timeout.as_millis()
            );
            // Dropping the handle detaches the thread.
            self.handle.take();
            StopOutcome::Abandoned
        }
    }
}

impl Drop for RenderWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.request_interruption();
        }
    }
}

/// Worker loop - runs in a dedicated thread
fn render_worker(
    document: &dyn Document,
    requests: &Receiver<WorkerRequest>,
    responses: &Sender<RenderResponse>,
    interrupted: &AtomicBool,
) {
    let mut renderer: Option<Box<dyn PageRenderer>> = None;

    for request in requests.iter() {
        // Interruption is honored between pages, never in the middle of one.
        if interrupted.load(Ordering::Acquire) {
            break;
        }

        match request {
            WorkerRequest::Render(job) => {
                let response = match render_page(document, &mut renderer, &job) {
                    Ok(page) => RenderResponse::Rendered {
                        generation: job.generation,
                        page,
                    },
                    Err(error) => RenderResponse::Failed {
                        generation: job.generation,
                        page: job.page,
                        error,
                    },
                };
                if responses.send(response).is_err() {
                    break;
                }
            }
            WorkerRequest::Shutdown => break,
        }
    }
}

/// Render and compress one page, opening the renderer on first use.
pub(crate) fn render_page(
    document: &dyn Document,
    renderer: &mut Option<Box<dyn PageRenderer>>,
    job: &RenderJob,
) -> Result<CompressedPage, RenderFault> {
    let page = job.page;
    let page_count = document.page_count();
    if page >= page_count {
        return Err(RenderFault::PageOutOfRange { page, page_count });
    }

    if renderer.is_none() {
        *renderer = Some(document.open_renderer()?);
    }
    let Some(renderer) = renderer.as_mut() else {
        return Err(RenderFault::backend("renderer unavailable"));
    };

    let image = renderer.render(page, job.resolution)?;
    encode_page(page, image, job.part)
}
