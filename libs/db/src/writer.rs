//! Mutation writer infrastructure.
//!
//! - `Writer` - handle for sending mutations
//! - `WriterConfig` - configuration
//! - `Consumer` - processes mutation batches from the channel
//! - Spawn functions for creating consumers
//!
//! The single consumer task is the write-exclusion primitive for the whole
//! index: every mutating request (a store batch or a cleanup delete) is
//! processed to completion before the next is dequeued, in channel order.
//! Queries run elsewhere and only ever *send* a cleanup request here, so
//! the exclusion is never held across a scan.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::cache::LatestVersionCache;
use crate::mutation::{FlushMarker, Mutation, PendingLatest};
use crate::request::{new_request_id, RequestEnvelope, RequestMeta};

// ============================================================================
// MutationExecutor Trait
// ============================================================================

/// Trait for mutations to execute themselves directly against storage.
///
/// Each mutation type knows how to write itself into the open transaction.
/// Synchronous because RocksDB operations are blocking; latest-version
/// lookups layer the batch-local `pending` view over the shared cache.
pub trait MutationExecutor: Send + Sync {
    fn execute(
        &self,
        txn: &rocksdb::Transaction<'_, rocksdb::TransactionDB>,
        cache: &LatestVersionCache,
        pending: &mut PendingLatest,
    ) -> Result<()>;
}

// ============================================================================
// Processor Trait
// ============================================================================

/// Trait for processing batches of mutations atomically.
///
/// Consumers delegate to a Processor for the actual database work; the
/// separation keeps the channel plumbing testable with mock processors.
#[async_trait::async_trait]
pub trait Processor: Send + Sync {
    /// Process a batch of mutations atomically: either every mutation in
    /// the slice becomes visible or none does.
    async fn process_mutations(&self, mutations: &[Mutation]) -> Result<()>;
}

// ============================================================================
// Writer
// ============================================================================

/// Configuration for the mutation writer.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Size of the MPSC channel buffer.
    pub channel_buffer_size: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_buffer_size: 1000,
        }
    }
}

/// Envelope for mutation batches with an optional commit reply.
pub type MutationRequest = RequestEnvelope<Vec<Mutation>>;

impl RequestMeta for Vec<Mutation> {
    type Reply = ();

    fn request_kind(&self) -> &'static str {
        "mutation_batch"
    }
}

/// Handle for sending mutation batches to the writer.
///
/// ```rust,ignore
/// StoreManifest { manifest }.run(&writer).await?;
/// ```
#[derive(Clone)]
pub struct Writer {
    sender: mpsc::Sender<MutationRequest>,
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("sender", &"<mpsc::Sender>")
            .finish()
    }
}

impl Writer {
    pub fn new(sender: mpsc::Sender<MutationRequest>) -> Self {
        Writer { sender }
    }

    /// Downgrade to a handle that does not keep the channel open.
    ///
    /// The processor holds one of these so the consumer (which owns the
    /// processor) does not keep its own channel alive forever.
    pub(crate) fn downgrade(&self) -> WeakWriter {
        WeakWriter {
            sender: self.sender.downgrade(),
        }
    }

    /// Send a batch of mutations to be processed asynchronously.
    ///
    /// Returns after enqueueing; use `flush()` to wait for the commit, or
    /// `send_with_result()` to observe the commit outcome directly.
    pub async fn send(&self, mutations: Vec<Mutation>) -> Result<()> {
        self.sender
            .send(MutationRequest::new(mutations, None))
            .await
            .context("Failed to send mutations to writer queue")
    }

    /// Send a batch and wait for its commit result.
    pub async fn send_with_result(&self, mutations: Vec<Mutation>) -> Result<()> {
        if mutations.is_empty() {
            return Ok(());
        }
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MutationRequest::new(mutations, Some(tx)))
            .await
            .context("Failed to send mutations to writer queue")?;
        rx.await.context("Mutation reply channel dropped")?
    }

    /// Flush all pending mutations and wait for commit.
    ///
    /// Returns once every mutation sent before this call is committed and
    /// visible to readers.
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MutationRequest::new(
                vec![Mutation::Flush(FlushMarker::new(tx))],
                None,
            ))
            .await
            .context("Failed to send flush marker - channel closed")?;
        rx.await
            .context("Flush failed - consumer dropped completion channel")?;
        Ok(())
    }

    /// Send mutations and wait for commit; `send()` followed by `flush()`.
    pub async fn send_sync(&self, mutations: Vec<Mutation>) -> Result<()> {
        if mutations.is_empty() {
            return Ok(());
        }
        self.send(mutations).await?;
        self.flush().await
    }

    /// Check if the writer is still active (receiver hasn't been dropped).
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Non-owning writer handle held by the processor for query-side cleanup.
#[derive(Clone)]
pub struct WeakWriter {
    sender: mpsc::WeakSender<MutationRequest>,
}

impl WeakWriter {
    pub fn upgrade(&self) -> Option<Writer> {
        self.sender.upgrade().map(Writer::new)
    }
}

impl std::fmt::Debug for WeakWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakWriter").finish()
    }
}

/// Create a new mutation writer and receiver pair.
pub fn create_writer(config: &WriterConfig) -> (Writer, mpsc::Receiver<MutationRequest>) {
    let (sender, receiver) = mpsc::channel(config.channel_buffer_size);
    (Writer::new(sender), receiver)
}

// ============================================================================
// Consumer
// ============================================================================

/// Consumer that processes mutation batches using a Processor.
pub struct Consumer<P: Processor> {
    receiver: mpsc::Receiver<MutationRequest>,
    config: WriterConfig,
    processor: Arc<P>,
}

impl<P: Processor> Consumer<P> {
    pub fn new(
        receiver: mpsc::Receiver<MutationRequest>,
        config: WriterConfig,
        processor: Arc<P>,
    ) -> Self {
        Self {
            receiver,
            config,
            processor,
        }
    }

    /// Process mutation batches until the channel closes.
    #[tracing::instrument(skip(self), name = "mutation_consumer")]
    pub async fn run(mut self) -> Result<()> {
        tracing::info!(config = ?self.config, "Starting mutation consumer");

        loop {
            match self.receiver.recv().await {
                Some(request) => {
                    self.process_request(request).await;
                }
                None => {
                    tracing::info!("Mutation consumer shutting down - channel closed");
                    return Ok(());
                }
            }
        }
    }

    /// Process one batch: commit, answer the reply channel, signal flush
    /// markers. A failed batch is reported to its caller and the consumer
    /// keeps serving subsequent requests.
    #[tracing::instrument(skip(self, request), fields(batch_size = request.payload.len()))]
    async fn process_request(&self, mut request: MutationRequest) {
        for mutation in &request.payload {
            tracing::debug!(mutation = %mutation, "Processing mutation");
        }

        let result = self
            .processor
            .process_mutations(&request.payload)
            .await
            .with_context(|| format!("Failed to process batch of {}", request.payload.len()));

        match result {
            Ok(()) => {
                // All mutations before the markers are now visible to readers.
                for mutation in &request.payload {
                    if let Mutation::Flush(marker) = mutation {
                        if let Some(completion) = marker.take_completion() {
                            let _ = completion.send(());
                        }
                    }
                }
                request.respond(Ok(()));
            }
            Err(err) => {
                tracing::error!(err = %err, "Mutation batch failed");
                request.respond(Err(err));
            }
        }
    }
}

/// Spawn a mutation consumer as a background task.
pub fn spawn_consumer<P: Processor + 'static>(consumer: Consumer<P>) -> JoinHandle<Result<()>> {
    tokio::spawn(async move { consumer.run().await })
}

// ============================================================================
// Runnable
// ============================================================================

/// Execute a mutation against the writer and wait for its commit.
#[async_trait::async_trait]
pub trait Runnable {
    async fn run(self, writer: &Writer) -> Result<()>;
}

#[async_trait::async_trait]
impl Runnable for crate::mutation::StoreManifest {
    async fn run(self, writer: &Writer) -> Result<()> {
        writer.send_with_result(vec![Mutation::Store(self)]).await
    }
}

#[async_trait::async_trait]
impl Runnable for crate::mutation::PruneLatestIndex {
    async fn run(self, writer: &Writer) -> Result<()> {
        writer.send_with_result(vec![Mutation::Prune(self)]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::StoreManifest;
    use crate::Manifest;
    use tokio::time::Duration;

    #[tokio::test]
    async fn test_writer_closed_detection() {
        let (writer, receiver) = create_writer(&WriterConfig::default());
        assert!(!writer.is_closed());

        drop(receiver);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(writer.is_closed());
    }

    #[tokio::test]
    async fn test_weak_writer_does_not_hold_channel() {
        let (writer, receiver) = create_writer(&WriterConfig::default());
        let weak = writer.downgrade();
        assert!(weak.upgrade().is_some());

        drop(writer);
        drop(receiver);
        assert!(weak.upgrade().is_none());
    }

    #[tokio::test]
    async fn test_send_enqueues_batch() {
        let (writer, mut receiver) = create_writer(&WriterConfig::default());
        let mutation = StoreManifest {
            manifest: Manifest::new("a", "1.0.0"),
        };
        writer.send(vec![Mutation::Store(mutation)]).await.unwrap();

        let request = receiver.recv().await.unwrap();
        assert_eq!(request.payload.len(), 1);
        assert_eq!(request.kind(), "mutation_batch");
    }
}
