//! Per-connection context: the two message queues and the connected flag.
//!
//! A `ConnectionContext` is created fresh for every successful connection
//! attempt and never reused. The request and result queues are the only
//! coupling between the reader, executor, and writer duty cycles. Closing
//! the context flips `connected` off and drops the send sides so any
//! blocked receiver sees end-of-stream instead of an error.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::error::{AgentError, Result};
use crate::scrape::ScrapeResponse;

/// An opaque unit of work: invoking it performs the target fetch.
///
/// Produced by the reader cycle, consumed exactly once by the executor.
pub struct ScrapeRequestAction {
    fut: BoxFuture<'static, ScrapeResponse>,
}

impl ScrapeRequestAction {
    pub fn new<F>(fut: F) -> Self
    where
        F: Future<Output = ScrapeResponse> + Send + 'static,
    {
        Self { fut: Box::pin(fut) }
    }

    /// Perform the fetch. Failures are contained inside the future and
    /// come back as error-carrying responses.
    pub async fn invoke(self) -> ScrapeResponse {
        self.fut.await
    }
}

impl fmt::Debug for ScrapeRequestAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ScrapeRequestAction")
    }
}

/// State scoped to exactly one connection attempt.
pub struct ConnectionContext {
    connected: AtomicBool,
    request_tx: RwLock<Option<mpsc::Sender<ScrapeRequestAction>>>,
    request_rx: Mutex<Option<mpsc::Receiver<ScrapeRequestAction>>>,
    result_tx: RwLock<Option<mpsc::Sender<ScrapeResponse>>>,
    result_rx: Mutex<Option<mpsc::Receiver<ScrapeResponse>>>,
}

impl ConnectionContext {
    pub fn new(queue_capacity: usize) -> Self {
        let (request_tx, request_rx) = mpsc::channel(queue_capacity);
        let (result_tx, result_rx) = mpsc::channel(queue_capacity);
        Self {
            connected: AtomicBool::new(true),
            request_tx: RwLock::new(Some(request_tx)),
            request_rx: Mutex::new(Some(request_rx)),
            result_tx: RwLock::new(Some(result_tx)),
            result_rx: Mutex::new(Some(result_rx)),
        }
    }

    /// Whether this connection attempt is still live.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Enqueue a request action for the executor (reader cycle).
    ///
    /// Blocks when the bounded queue is full, backpressuring the reader.
    pub async fn enqueue_request(&self, action: ScrapeRequestAction) -> Result<()> {
        let tx = self
            .request_tx
            .read()
            .await
            .as_ref()
            .cloned()
            .ok_or(AgentError::Disconnected)?;
        tx.send(action).await.map_err(|_| AgentError::Disconnected)
    }

    /// Push a completed response for the writer (executor cycle).
    pub async fn send_result(&self, response: ScrapeResponse) -> Result<()> {
        let tx = self
            .result_tx
            .read()
            .await
            .as_ref()
            .cloned()
            .ok_or(AgentError::Disconnected)?;
        tx.send(response)
            .await
            .map_err(|_| AgentError::Disconnected)
    }

    /// Take the request queue's receive side. Yields once, to the executor.
    pub async fn take_request_rx(&self) -> Option<mpsc::Receiver<ScrapeRequestAction>> {
        self.request_rx.lock().await.take()
    }

    /// Take the result queue's receive side. Yields once, to the writer.
    pub async fn take_result_rx(&self) -> Option<mpsc::Receiver<ScrapeResponse>> {
        self.result_rx.lock().await.take()
    }

    /// Tear the context down: flip `connected` off and close both queues.
    pub async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.request_tx.write().await.take();
        self.result_tx.write().await.take();
    }
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("connected", &self.is_connected())
            .finish()
    }
}
