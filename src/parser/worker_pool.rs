//! Fixed-size pool of parser threads
//!
//! Jobs go through a single FIFO queue; any idle worker takes the next one.
//! Results come back to the async side through oneshot channels, so callers
//! await a parse without blocking the runtime.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use tokio::sync::oneshot;

use crate::core::error::Error;
use crate::core::types::Result;
use super::types::{ParseCtmResult, ParseQuadsResult, ParseSectorResult};
use super::{ctm, f3d, i3d, GeometryFormat, ParseError};

/// Decoder for the three geometry formats.
pub trait SectorParser: Send + Sync {
    fn parse_sector(&self, bytes: &[u8]) -> std::result::Result<ParseSectorResult, ParseError>;
    fn parse_quads(&self, bytes: &[u8]) -> std::result::Result<ParseQuadsResult, ParseError>;
    fn parse_ctm(&self, bytes: &[u8]) -> std::result::Result<ParseCtmResult, ParseError>;
}

/// Built-in decoders for i3d, f3d and ctm
#[derive(Clone, Copy, Debug, Default)]
pub struct BinaryParser;

impl SectorParser for BinaryParser {
    fn parse_sector(&self, bytes: &[u8]) -> std::result::Result<ParseSectorResult, ParseError> {
        i3d::parse_sector(bytes)
    }

    fn parse_quads(&self, bytes: &[u8]) -> std::result::Result<ParseQuadsResult, ParseError> {
        f3d::parse_quads(bytes)
    }

    fn parse_ctm(&self, bytes: &[u8]) -> std::result::Result<ParseCtmResult, ParseError> {
        ctm::parse_ctm(bytes)
    }
}

type Reply<T> = oneshot::Sender<std::result::Result<T, ParseError>>;

enum ParseJob {
    Sector(Vec<u8>, Reply<ParseSectorResult>),
    Quads(Vec<u8>, Reply<ParseQuadsResult>),
    Ctm(Vec<u8>, Reply<ParseCtmResult>),
}

impl ParseJob {
    fn format(&self) -> GeometryFormat {
        match self {
            ParseJob::Sector(..) => GeometryFormat::I3d,
            ParseJob::Quads(..) => GeometryFormat::F3d,
            ParseJob::Ctm(..) => GeometryFormat::Ctm,
        }
    }

    fn run(self, parser: &dyn SectorParser) {
        // A dropped receiver means the caller lost interest; nothing to do
        match self {
            ParseJob::Sector(bytes, reply) => {
                let _ = reply.send(parser.parse_sector(&bytes));
            }
            ParseJob::Quads(bytes, reply) => {
                let _ = reply.send(parser.parse_quads(&bytes));
            }
            ParseJob::Ctm(bytes, reply) => {
                let _ = reply.send(parser.parse_ctm(&bytes));
            }
        }
    }
}

/// Pool of parser threads with a defined lifetime. Dropping the pool lets
/// queued jobs finish, then joins the workers.
pub struct ParserWorkerPool {
    job_sender: Option<crossbeam_channel::Sender<ParseJob>>,
    worker_handles: Vec<JoinHandle<()>>,
    in_flight: Arc<AtomicUsize>,
}

impl ParserWorkerPool {
    /// Spawn `worker_count` threads (at least one) using the built-in decoders
    pub fn new(worker_count: usize) -> Self {
        Self::with_parser(worker_count, Arc::new(BinaryParser))
    }

    /// Spawn `worker_count` threads (at least one) running `parser`
    pub fn with_parser(worker_count: usize, parser: Arc<dyn SectorParser>) -> Self {
        let worker_count = worker_count.max(1);
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<ParseJob>();
        let in_flight = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(worker_count);
        for worker in 0..worker_count {
            let rx = job_rx.clone();
            let parser = Arc::clone(&parser);
            let flight = Arc::clone(&in_flight);

            let spawned = std::thread::Builder::new()
                .name(format!("sector-parser-{}", worker))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        let format = job.format();
                        // A panicking decoder drops the reply; the worker stays up
                        if panic::catch_unwind(AssertUnwindSafe(|| job.run(parser.as_ref()))).is_err() {
                            log::error!("Parser worker {} panicked decoding {:?}", worker, format);
                        }
                        flight.fetch_sub(1, Ordering::Relaxed);
                    }
                    log::trace!("Parser worker {} exiting", worker);
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => log::error!("Failed to spawn parser worker {}: {}", worker, e),
            }
        }
        log::debug!("Started {} parser workers", handles.len());

        Self {
            job_sender: Some(job_tx),
            worker_handles: handles,
            in_flight,
        }
    }

    /// Number of live worker threads
    pub fn worker_count(&self) -> usize {
        self.worker_handles.len()
    }

    /// Jobs queued or being decoded
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    fn submit(&self, job: ParseJob) -> Result<()> {
        let sender = self
            .job_sender
            .as_ref()
            .ok_or_else(|| Error::Pipeline("parser pool is shut down".into()))?;
        if self.worker_handles.is_empty() {
            return Err(Error::Pipeline("parser pool has no workers".into()));
        }
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        if sender.send(job).is_err() {
            self.in_flight.fetch_sub(1, Ordering::Relaxed);
            return Err(Error::Pipeline("parser pool is shut down".into()));
        }
        Ok(())
    }

    async fn request<T>(
        &self,
        make_job: impl FnOnce(Reply<T>) -> ParseJob,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(make_job(reply_tx))?;
        let parsed = reply_rx
            .await
            .map_err(|_| Error::Pipeline("parser worker dropped the request".into()))?;
        Ok(parsed?)
    }

    /// Decode an i3d file
    pub async fn parse_sector(&self, bytes: Vec<u8>) -> Result<ParseSectorResult> {
        self.request(|reply| ParseJob::Sector(bytes, reply)).await
    }

    /// Decode an f3d file
    pub async fn parse_quads(&self, bytes: Vec<u8>) -> Result<ParseQuadsResult> {
        self.request(|reply| ParseJob::Quads(bytes, reply)).await
    }

    /// Decode a ctm file
    pub async fn parse_ctm(&self, bytes: Vec<u8>) -> Result<ParseCtmResult> {
        self.request(|reply| ParseJob::Ctm(bytes, reply)).await
    }

    /// Stop accepting jobs and join the workers once the queue drains.
    pub fn shutdown(&mut self) {
        self.job_sender.take();
        for handle in self.worker_handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for ParserWorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
