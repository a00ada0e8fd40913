//! Query reader infrastructure.
//!
//! - `Reader` - handle for sending queries
//! - `ReaderConfig` - configuration
//! - Worker pool consuming queries from an MPMC channel
//!
//! Queries are read-only against the shared storage handle; they never enter
//! the writer path except by sending a cleanup request through the writer
//! channel when a stale latest-index entry is discovered.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::processor::Processor;
use crate::query::{Query, QueryOutput};
use crate::request::RequestEnvelope;

// ============================================================================
// Reader
// ============================================================================

/// Configuration for the query reader.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Size of the MPMC channel buffer.
    pub channel_buffer_size: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            channel_buffer_size: 1000,
        }
    }
}

/// Envelope carrying one query and its reply channel.
pub type QueryRequest = RequestEnvelope<Query>;

/// Handle for sending queries to the reader pool.
#[derive(Clone)]
pub struct Reader {
    sender: flume::Sender<QueryRequest>,
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("sender", &"<flume::Sender>")
            .finish()
    }
}

impl Reader {
    pub(crate) fn new(sender: flume::Sender<QueryRequest>) -> Self {
        Reader { sender }
    }

    /// Send a prepared request to the reader pool.
    pub async fn send_query(&self, request: QueryRequest) -> Result<()> {
        self.sender
            .send_async(request)
            .await
            .context("Failed to send query to reader queue")
    }

    /// Send a query and await its reply.
    pub(crate) async fn request(&self, query: Query) -> Result<QueryOutput> {
        let (tx, rx) = oneshot::channel();
        self.send_query(QueryRequest::new(query, Some(tx))).await?;
        rx.await.context("Query reply channel dropped")?
    }

    /// Check if the reader is still active (all workers have exited).
    pub fn is_closed(&self) -> bool {
        self.sender.is_disconnected()
    }
}

// ============================================================================
// Worker Pool
// ============================================================================

async fn execute_request(processor: &Processor, mut request: QueryRequest) {
    tracing::debug!(query = %request.payload, "Processing query");

    let exec = processor.execute_query(&request.payload);
    let result = match request.timeout {
        Some(timeout) => match tokio::time::timeout(timeout, exec).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("Query timeout after {:?}", timeout)),
        },
        None => exec.await,
    };

    request.respond(result);
}

/// Create a reader and spawn `num_workers` query workers over a shared
/// processor.
pub fn spawn_query_workers(
    processor: Arc<Processor>,
    config: &ReaderConfig,
    num_workers: usize,
) -> (Reader, Vec<JoinHandle<()>>) {
    let (sender, receiver) = flume::bounded(config.channel_buffer_size);
    let reader = Reader::new(sender);

    let mut handles = Vec::with_capacity(num_workers);
    for worker_id in 0..num_workers {
        let receiver = receiver.clone();
        let processor = processor.clone();

        let handle = tokio::spawn(async move {
            tracing::info!(worker_id, "Query worker starting");

            while let Ok(request) = receiver.recv_async().await {
                execute_request(&processor, request).await;
            }

            tracing::info!(worker_id, "Query worker shutting down");
        });

        handles.push(handle);
    }

    tracing::info!(num_workers, "Spawned query worker pool");
    (reader, handles)
}

// ============================================================================
// Runnable
// ============================================================================

/// Execute a query through the reader pool and await its typed output.
#[async_trait::async_trait]
pub trait Runnable {
    type Output: Send;

    async fn run(self, reader: &Reader) -> Result<Self::Output>;
}
