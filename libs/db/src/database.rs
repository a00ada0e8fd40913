//! The embedded API: a long-lived handle owning the storage, the
//! latest-version cache, the single mutation consumer and the query worker
//! pool.
//!
//! ```ignore
//! let db = Database::open(path, DatabaseConfig::default())?;
//!
//! db.store(Manifest::new("a", "1.0.0").with_dependency("b", "^1.2.0")).await?;
//!
//! let dependents = db.query(Dependents::new("b", "1.5.0")).await?;
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cache::LatestCacheConfig;
use crate::mutation::StoreManifest;
use crate::processor::Processor;
use crate::query::{Dependents, PackageVersion, PackageVersions};
use crate::reader::{spawn_query_workers, Reader, ReaderConfig, Runnable as _};
use crate::storage::Storage;
use crate::writer::{Runnable as _, Writer, WriterConfig};
use crate::Manifest;

/// Configuration for a [`Database`].
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub writer: WriterConfig,
    pub reader: ReaderConfig,
    pub cache: LatestCacheConfig,

    /// Number of query workers to spawn.
    pub query_workers: usize,

    /// Buffer size of streams returned by [`Database::stream`]; the
    /// producer suspends once this many manifests are undrained.
    pub stream_buffer_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            writer: WriterConfig::default(),
            reader: ReaderConfig::default(),
            cache: LatestCacheConfig::default(),
            query_workers: 2,
            stream_buffer_size: 16,
        }
    }
}

/// A reverse-dependency index over one RocksDB directory.
pub struct Database {
    processor: Arc<Processor>,
    writer: Writer,
    reader: Reader,
    writer_task: JoinHandle<Result<()>>,
    reader_tasks: Vec<JoinHandle<()>>,
    stream_buffer_size: usize,
}

impl Database {
    /// Open (or create) the index at `path` and start its consumers.
    ///
    /// Must be called within a tokio runtime.
    pub fn open(path: &Path, config: DatabaseConfig) -> Result<Self> {
        let mut storage = Storage::readwrite(path);
        storage.ready()?;
        let storage = Arc::new(storage);

        let (writer, receiver) = crate::writer::create_writer(&config.writer);
        let processor = Arc::new(Processor::new(storage, &writer, &config.cache));

        if config.cache.prewarm_limit > 0 {
            processor.prewarm_latest_cache(config.cache.prewarm_limit)?;
        }

        let consumer = crate::writer::Consumer::new(receiver, config.writer.clone(), processor.clone());
        let writer_task = crate::writer::spawn_consumer(consumer);
        let (reader, reader_tasks) =
            spawn_query_workers(processor.clone(), &config.reader, config.query_workers.max(1));

        Ok(Database {
            processor,
            writer,
            reader,
            writer_task,
            reader_tasks,
            stream_buffer_size: config.stream_buffer_size.max(1),
        })
    }

    /// Ingest a manifest; resolves once the batch has committed.
    pub async fn store(&self, manifest: Manifest) -> Result<()> {
        StoreManifest { manifest }.run(&self.writer).await
    }

    /// Run a dependents query and collect the full result set.
    pub async fn query(&self, query: Dependents) -> Result<Vec<Manifest>> {
        query.run(&self.reader).await
    }

    /// Run a dependents query as a lazy stream.
    ///
    /// The producer suspends when the buffer fills, so an undrained
    /// receiver applies backpressure; dropping the receiver cancels the
    /// scan. Errors arrive in-band and end the stream.
    pub fn stream(&self, query: Dependents) -> mpsc::Receiver<Result<Manifest>> {
        let (tx, rx) = mpsc::channel(self.stream_buffer_size);
        let processor = self.processor.clone();
        tokio::spawn(async move {
            query.produce(&processor, tx).await;
        });
        rx
    }

    /// Fetch a manifest: a specific version, or the latest when `None`.
    pub async fn manifest(&self, name: &str, version: Option<&str>) -> Result<Option<Manifest>> {
        PackageVersion::new(name, version.map(str::to_string))
            .run(&self.reader)
            .await
    }

    /// List the stored versions of a package.
    pub async fn versions(&self, name: &str) -> Result<Vec<String>> {
        PackageVersions::new(name).run(&self.reader).await
    }

    /// Wait until every previously submitted write is visible to readers.
    pub async fn flush(&self) -> Result<()> {
        self.writer.flush().await
    }

    /// The writer handle, for batched ingestion.
    pub fn writer(&self) -> &Writer {
        &self.writer
    }

    /// The reader handle, for running query types directly.
    pub fn reader(&self) -> &Reader {
        &self.reader
    }

    /// The underlying storage, for inspection and tooling.
    pub fn storage(&self) -> &Storage {
        self.processor.storage()
    }

    /// Shut down the consumers and wait for them to exit.
    ///
    /// Outstanding `Writer`/`Reader` clones keep their channels (and thus
    /// the consumers) alive; drop them before closing.
    pub async fn close(self) -> Result<()> {
        let Database {
            processor,
            writer,
            reader,
            writer_task,
            reader_tasks,
            ..
        } = self;

        drop(writer);
        drop(reader);
        drop(processor);

        writer_task
            .await
            .context("Mutation consumer panicked")??;
        for task in reader_tasks {
            let _ = task.await;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("processor", &self.processor)
            .finish()
    }
}
