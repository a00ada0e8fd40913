//! The long-lived engine core shared by the writer consumer and the query
//! workers.
//!
//! The processor owns the storage handle and the latest-version cache, and
//! carries a non-owning writer handle so query executors can route cleanup
//! deletes through the single mutation consumer. Cache updates staged by a
//! batch are applied only after its transaction commits, so a failed commit
//! can never leave the cache ahead of the store.

use std::sync::Arc;

use anyhow::Result;

use crate::cache::{LatestCacheConfig, LatestVersionCache};
use crate::mutation::{Mutation, PendingLatest};
use crate::query::{Query, QueryOutput};
use crate::schema::{unescape_name, LatestVersions, ValueCodec};
use crate::storage::Storage;
use crate::writer::{WeakWriter, Writer};

pub struct Processor {
    storage: Arc<Storage>,
    latest_cache: LatestVersionCache,
    writer: WeakWriter,
}

impl Processor {
    pub fn new(storage: Arc<Storage>, writer: &Writer, cache_config: &LatestCacheConfig) -> Self {
        Self {
            storage,
            latest_cache: LatestVersionCache::new(cache_config),
            writer: writer.downgrade(),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn latest_cache(&self) -> &LatestVersionCache {
        &self.latest_cache
    }

    /// Writer handle for query-side cleanup; `None` once the writer has
    /// shut down.
    pub(crate) fn writer(&self) -> Option<Writer> {
        self.writer.upgrade()
    }

    /// Load up to `limit` latest-version pointers into the cache.
    ///
    /// Committed store state is as trustworthy a source as the writes
    /// themselves, so prewarming does not violate the writes-only rule.
    pub fn prewarm_latest_cache(&self, limit: usize) -> Result<usize> {
        use rocksdb::{Direction, IteratorMode};

        let prefix = LatestVersions::PREFIX.as_bytes();
        let db = self.storage.transaction_db()?;

        let mut loaded = 0;
        for item in db.iterator(IteratorMode::From(prefix, Direction::Forward)) {
            let (key, value) = item?;
            if !key.starts_with(prefix) || loaded >= limit {
                break;
            }
            let fragment = std::str::from_utf8(&key[prefix.len()..])?;
            let version = LatestVersions::value_from_bytes(&value)?;
            self.latest_cache.insert(unescape_name(fragment), version);
            loaded += 1;
        }

        if loaded > 0 {
            tracing::info!(loaded, "Prewarmed latest-version cache");
        }
        Ok(loaded)
    }

    pub(crate) async fn execute_query(&self, query: &Query) -> Result<QueryOutput> {
        query.execute(self).await
    }
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("storage", &self.storage)
            .field("cached_latest", &self.latest_cache.len())
            .finish()
    }
}

#[async_trait::async_trait]
impl crate::writer::Processor for Processor {
    /// Process a batch of mutations in one transaction.
    #[tracing::instrument(skip(self, mutations), fields(mutation_count = mutations.len()))]
    async fn process_mutations(&self, mutations: &[Mutation]) -> Result<()> {
        if mutations.is_empty() {
            return Ok(());
        }

        let txn_db = self.storage.transaction_db()?;
        let txn = txn_db.transaction();
        let mut pending = PendingLatest::default();

        for mutation in mutations {
            mutation.execute(&txn, &self.latest_cache, &mut pending)?;
        }

        // Single commit for the whole batch; a failure drops the
        // transaction and the staged cache updates with it.
        txn.commit()?;

        for (name, version) in pending.drain() {
            self.latest_cache.insert(name, version);
        }

        tracing::debug!(count = mutations.len(), "Committed mutation batch");
        Ok(())
    }
}
