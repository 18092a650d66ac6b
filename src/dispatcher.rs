//! Request Dispatcher
//!
//! Runs each submitted request on a bounded worker pool. A worker owns the
//! request for its whole life: encode, enqueue, wait on the response slot,
//! retry once on timeout, classify the reply.
//!
//! ## Attempt
//!
//! ```text
//!  allocate opaque ─▶ register slot ─▶ push to queue ─▶ wait(response_timeout)
//!                                           │                  │
//!                                      full: QueueFull    timeout: retry once
//!                                                              │
//!                                                   reply: txnOk? Response : Server
//! ```

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use rand::Rng;

use crate::compression::{Compressor, SnappyCompressor};
use crate::context::ClientContext;
use crate::error::{RelayError, Result};
use crate::queue::{QueueEntry, ResponseSlot};
use crate::request::{PreparedRequest, Request, Response};

/// The eventual outcome of a submitted request
#[derive(Debug)]
pub struct ResponseHandle {
    receiver: Receiver<Result<Response>>,
}

impl ResponseHandle {
    fn pending() -> (Sender<Result<Response>>, Self) {
        let (sender, receiver) = channel::bounded(1);
        (sender, Self { receiver })
    }

    fn ready(result: Result<Response>) -> Self {
        let (sender, handle) = Self::pending();
        let _ = sender.send(result);
        handle
    }

    /// Block until the request resolves
    pub fn wait(self) -> Result<Response> {
        self.receiver.recv().unwrap_or(Err(RelayError::Shutdown))
    }

    /// Block up to `timeout`; `None` if the request is still running
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Response>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(RelayError::Shutdown)),
        }
    }

    /// Take the outcome if it is already available
    pub fn try_take(&self) -> Option<Result<Response>> {
        self.receiver.try_recv().ok()
    }
}

struct Job {
    request: Request,
    reply: Sender<Result<Response>>,
}

/// Bounded worker pool executing requests
pub struct RequestDispatcher {
    ctx: Arc<ClientContext>,
    compressor: Arc<dyn Compressor>,
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl RequestDispatcher {
    pub fn new(ctx: Arc<ClientContext>) -> Result<Self> {
        Self::with_compressor(ctx, Arc::new(SnappyCompressor))
    }

    pub fn with_compressor(ctx: Arc<ClientContext>, compressor: Arc<dyn Compressor>) -> Result<Self> {
        let config = ctx.config();
        let (jobs, queue) = channel::bounded::<Job>(config.worker_queue_capacity);

        let mut workers = Vec::with_capacity(config.worker_threads);
        for index in 0..config.worker_threads {
            let queue = queue.clone();
            let ctx = Arc::clone(&ctx);
            let compressor = Arc::clone(&compressor);
            let handle = thread::Builder::new()
                .name(format!("relaykv-worker-{}", index))
                .spawn(move || {
                    while let Ok(job) = queue.recv() {
                        let result = execute(&ctx, compressor.as_ref(), &job.request);
                        let _ = job.reply.send(result);
                    }
                })?;
            workers.push(handle);
        }
        tracing::debug!("Started {} dispatch workers", workers.len());

        Ok(Self {
            ctx,
            compressor,
            jobs: Some(jobs),
            workers,
        })
    }

    /// Hand a request to the pool without blocking
    pub fn submit(&self, request: Request) -> ResponseHandle {
        if self.ctx.is_shutdown() {
            return ResponseHandle::ready(Err(RelayError::Shutdown));
        }
        if let Err(e) = request.validate(self.ctx.config()) {
            return ResponseHandle::ready(Err(e));
        }
        let Some(jobs) = self.jobs.as_ref() else {
            return ResponseHandle::ready(Err(RelayError::Shutdown));
        };

        let (reply, handle) = ResponseHandle::pending();
        match jobs.try_send(Job { request, reply }) {
            Ok(()) => handle,
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Worker queue full, rejecting request");
                ResponseHandle::ready(Err(RelayError::TooManyRequests))
            }
            Err(TrySendError::Disconnected(_)) => ResponseHandle::ready(Err(RelayError::Shutdown)),
        }
    }

    /// Run a request on the calling thread
    pub fn execute(&self, request: &Request) -> Result<Response> {
        execute(&self.ctx, self.compressor.as_ref(), request)
    }

    /// Stop accepting work and wait for in-flight requests to resolve
    pub fn shutdown(&mut self) {
        if self.jobs.take().is_none() {
            return;
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("Dispatch worker panicked");
            }
        }
        tracing::debug!("Dispatch workers stopped");
    }
}

impl Drop for RequestDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// =============================================================================
// Request Execution
// =============================================================================

/// Full request lifecycle with the retry budget
pub(crate) fn execute(ctx: &ClientContext, compressor: &dyn Compressor, request: &Request) -> Result<Response> {
    let config = ctx.config();
    let prepared = request.prepare(config, compressor)?;
    let max_attempts: u32 = if config.retry_enabled { 2 } else { 1 };

    let mut attempt = 1;
    loop {
        match attempt_once(ctx, compressor, &prepared) {
            Err(RelayError::Timeout { .. }) => {
                ctx.record_timeout();
                tracing::debug!(
                    request_id = %prepared.request_id,
                    "{} timed out (attempt {}/{})",
                    prepared.operation.name(),
                    attempt,
                    max_attempts
                );
                if attempt >= max_attempts {
                    return Err(RelayError::Timeout { attempts: attempt });
                }
                ctx.record_retry();
                thread::sleep(retry_interval(
                    config.retry_min_interval_ms,
                    config.retry_max_interval_ms,
                ));
                attempt += 1;
            }
            other => return other,
        }
    }
}

fn retry_interval(min_ms: u64, max_ms: u64) -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms.max(min_ms)))
}

/// One attempt with a fresh opaque; the slot is always cleaned up
fn attempt_once(ctx: &ClientContext, compressor: &dyn Compressor, prepared: &PreparedRequest) -> Result<Response> {
    if !ctx.is_connected() {
        ctx.record_failed();
        return Err(RelayError::Connection("not connected to proxy".to_string()));
    }

    let slot = ctx.allocate_slot()?;
    let opaque = slot.opaque();
    let result = send_and_wait(ctx, compressor, prepared, &slot);
    ctx.correlator().cleanup(opaque);

    match &result {
        Ok(_) | Err(RelayError::Server { .. }) => ctx.record_received(),
        Err(_) => ctx.record_failed(),
    }
    result
}

fn send_and_wait(
    ctx: &ClientContext,
    compressor: &dyn Compressor,
    prepared: &PreparedRequest,
    slot: &ResponseSlot,
) -> Result<Response> {
    let opaque = slot.opaque();
    let bytes = prepared
        .to_message(opaque, ctx.local_ip().into())
        .encode()?;

    if !ctx.queue().push(QueueEntry::new(bytes, prepared.request_id, opaque)) {
        return Err(RelayError::QueueFull);
    }
    ctx.record_sent();
    tracing::trace!(opaque, request_id = %prepared.request_id, "Request queued");

    match slot.wait(ctx.config().response_timeout()) {
        Some(message) => prepared.parse_response(message, compressor),
        None => Err(RelayError::Timeout { attempts: 1 }),
    }
}
