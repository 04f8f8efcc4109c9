use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, TryRecvError};

use crate::foundation::error::{TimelapseError, TimelapseResult};
use crate::pipeline::orchestrator::Pipeline;
use crate::pipeline::request::{EncodeOutcome, EncodeRequest};

/// Cooperative cancellation flag, checked by the pipeline between images.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// New, not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// `true` once [`CancelToken::cancel`] was called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Handle to a request running on its own worker thread.
///
/// The worker sends exactly one result through a single-slot channel.
pub struct EncodeHandle {
    result: Receiver<TimelapseResult<EncodeOutcome>>,
    cancel: CancelToken,
    worker: Option<JoinHandle<()>>,
}

impl EncodeHandle {
    /// Ask the worker to stop after the current image. The request then fails with
    /// [`TimelapseError::Cancelled`] once teardown completed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block until the request finished.
    pub fn wait(mut self) -> TimelapseResult<EncodeOutcome> {
        let res = self.result.recv().unwrap_or_else(|_| Err(worker_lost()));
        self.join_worker();
        res
    }

    /// Return the result if the request already finished.
    ///
    /// The result is handed out once; later calls return `None`.
    pub fn try_wait(&mut self) -> Option<TimelapseResult<EncodeOutcome>> {
        match self.result.try_recv() {
            Ok(res) => {
                self.join_worker();
                Some(res)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => self.worker.take().map(|h| {
                let _ = h.join();
                Err(worker_lost())
            }),
        }
    }

    fn join_worker(&mut self) {
        if let Some(handle) = self.worker.take()
            && handle.join().is_err()
        {
            tracing::warn!("encode worker panicked after reporting its result");
        }
    }
}

fn worker_lost() -> TimelapseError {
    TimelapseError::Other(anyhow::anyhow!(
        "encode worker exited without reporting a result"
    ))
}

impl Pipeline {
    /// Run `req` on a dedicated background thread.
    pub fn spawn(self: Arc<Self>, req: EncodeRequest) -> TimelapseResult<EncodeHandle> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();

        let worker = std::thread::Builder::new()
            .name("timelapse-encode".to_string())
            .spawn(move || {
                let res = self.run_with_cancel(&req, &worker_cancel);
                // The handle may have been dropped; nobody is waiting then.
                let _ = tx.send(res);
            })
            .map_err(|e| TimelapseError::resource(format!("failed to spawn encode worker: {e}")))?;

        Ok(EncodeHandle {
            result: rx,
            cancel,
            worker: Some(worker),
        })
    }
}
