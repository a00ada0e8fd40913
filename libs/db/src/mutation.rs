//! Mutation types and their storage execution logic.
//!
//! This module contains only business logic - mutation type definitions and
//! their [`MutationExecutor`] implementations. Infrastructure (traits,
//! Writer, Consumer, spawn functions) is in the `writer` module.
//!
//! Every mutation writes through a single RocksDB transaction, so a batch
//! becomes visible atomically or not at all.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use tokio::sync::oneshot;

use crate::cache::LatestVersionCache;
use crate::range::encode_range_str;
use crate::schema::{
    DepKind, LatestIndex, LatestIndexEntry, LatestPackages, LatestVersions, Packages, ValueCodec,
    VersionIndex,
};
use crate::version::cmp_version_strings;
use crate::writer::MutationExecutor;
use crate::Manifest;

// ============================================================================
// Flush Marker
// ============================================================================

/// Marker for flush synchronization.
///
/// Contains a oneshot sender that signals when every mutation enqueued ahead
/// of it has been committed. Uses `Mutex<Option<...>>` to allow taking
/// ownership from a shared reference, since consumers see `&[Mutation]`.
pub struct FlushMarker {
    completion: Mutex<Option<oneshot::Sender<()>>>,
}

impl FlushMarker {
    pub fn new(completion: oneshot::Sender<()>) -> Self {
        Self {
            completion: Mutex::new(Some(completion)),
        }
    }

    /// Take the completion sender (can only be called once).
    pub fn take_completion(&self) -> Option<oneshot::Sender<()>> {
        self.completion.lock().ok()?.take()
    }
}

impl std::fmt::Debug for FlushMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let has_completion = self
            .completion
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false);
        f.debug_struct("FlushMarker")
            .field("has_completion", &has_completion)
            .finish()
    }
}

// Cloning a FlushMarker creates an empty one (no completion channel);
// only the original can signal completion.
impl Clone for FlushMarker {
    fn clone(&self) -> Self {
        Self {
            completion: Mutex::new(None),
        }
    }
}

// ============================================================================
// Mutation Enum
// ============================================================================

#[derive(Debug, Clone)]
pub enum Mutation {
    Store(StoreManifest),
    Prune(PruneLatestIndex),

    /// Flush marker for synchronization. Not persisted - the consumer
    /// signals its completion channel once the batch ahead of it commits.
    Flush(FlushMarker),
}

impl Mutation {
    pub fn is_flush(&self) -> bool {
        matches!(self, Mutation::Flush(_))
    }
}

impl std::fmt::Display for Mutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mutation::Store(m) => write!(
                f,
                "Store: {}@{}",
                m.manifest.name, m.manifest.version
            ),
            Mutation::Prune(p) => write!(
                f,
                "Prune: {}!{}!{} (seen {})",
                p.kind, p.dependency, p.dependent, p.seen_version
            ),
            Mutation::Flush(_) => write!(f, "Flush"),
        }
    }
}

/// Ingest one manifest: write its per-version records and, when it becomes
/// the latest known version of its package, refresh the latest families.
#[derive(Debug, Clone)]
pub struct StoreManifest {
    pub manifest: Manifest,
}

/// Delete a stale latest-index entry discovered by a query.
///
/// The delete only happens if the latest-version pointer still matches the
/// version the query saw; if the latest moved again in the meantime the
/// entry was rewritten by that store and must be left alone.
#[derive(Debug, Clone)]
pub struct PruneLatestIndex {
    pub kind: DepKind,
    pub dependency: String,
    pub dependent: String,
    pub seen_version: String,
}

// ============================================================================
// Batch-local Latest View
// ============================================================================

/// Latest-version updates staged by the current batch.
///
/// Lookups during a batch must see earlier mutations of the same batch
/// (a batch may carry several versions of one package), but the shared
/// cache may only absorb them after the transaction commits.
#[derive(Debug, Default)]
pub struct PendingLatest(HashMap<String, String>);

impl PendingLatest {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: String, version: String) {
        self.0.insert(name, version);
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (String, String)> + '_ {
        self.0.drain()
    }
}

// ============================================================================
// MutationExecutor Implementations
// ============================================================================

impl Mutation {
    pub(crate) fn execute(
        &self,
        txn: &rocksdb::Transaction<'_, rocksdb::TransactionDB>,
        cache: &LatestVersionCache,
        pending: &mut PendingLatest,
    ) -> Result<()> {
        match self {
            Mutation::Store(m) => m.execute(txn, cache, pending),
            Mutation::Prune(p) => p.execute(txn, cache, pending),
            Mutation::Flush(_) => Ok(()),
        }
    }
}

impl StoreManifest {
    /// Latest version currently on record for `name`: batch-staged updates
    /// first, then the shared cache, then the store itself.
    fn current_latest(
        &self,
        txn: &rocksdb::Transaction<'_, rocksdb::TransactionDB>,
        cache: &LatestVersionCache,
        pending: &PendingLatest,
        name: &str,
    ) -> Result<Option<String>> {
        if let Some(version) = pending.get(name) {
            return Ok(Some(version.to_string()));
        }
        if let Some(version) = cache.get(name) {
            return Ok(Some(version));
        }
        match txn.get(LatestVersions::key(name))? {
            Some(bytes) => Ok(Some(LatestVersions::value_from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl MutationExecutor for StoreManifest {
    fn execute(
        &self,
        txn: &rocksdb::Transaction<'_, rocksdb::TransactionDB>,
        cache: &LatestVersionCache,
        pending: &mut PendingLatest,
    ) -> Result<()> {
        let manifest = &self.manifest;
        tracing::debug!(
            name = %manifest.name,
            version = %manifest.version,
            "Executing StoreManifest mutation"
        );

        let current = self.current_latest(txn, cache, pending, &manifest.name)?;
        let is_latest = current.as_deref().map_or(true, |current| {
            cmp_version_strings(&manifest.version, current) == std::cmp::Ordering::Greater
        });

        for kind in DepKind::ALL {
            for (dependency, range) in manifest.dependencies_of(kind) {
                let Some(sets) = encode_range_str(range) else {
                    // The manifest is still stored; only this dependency is
                    // absent from the index.
                    tracing::debug!(
                        dependency = %dependency,
                        range = %range,
                        "Dropping dependency with unparseable range"
                    );
                    continue;
                };

                if is_latest {
                    let entry = LatestIndexEntry {
                        version: manifest.version.clone(),
                        sets: sets.clone(),
                    };
                    txn.put(
                        LatestIndex::key(kind, dependency, &manifest.name),
                        LatestIndex::value_to_bytes(&entry)?,
                    )?;
                }
                txn.put(
                    VersionIndex::key(kind, dependency, &manifest.name, &manifest.version),
                    VersionIndex::value_to_bytes(&sets)?,
                )?;
            }
        }

        txn.put(
            Packages::key(&manifest.name, &manifest.version),
            Packages::value_to_bytes(manifest)?,
        )?;

        if is_latest {
            txn.put(
                LatestPackages::key(&manifest.name),
                LatestPackages::value_to_bytes(manifest)?,
            )?;
            txn.put(
                LatestVersions::key(&manifest.name),
                LatestVersions::value_to_bytes(&manifest.version)?,
            )?;
            pending.insert(manifest.name.clone(), manifest.version.clone());
        }

        Ok(())
    }
}

impl MutationExecutor for PruneLatestIndex {
    fn execute(
        &self,
        txn: &rocksdb::Transaction<'_, rocksdb::TransactionDB>,
        _cache: &LatestVersionCache,
        _pending: &mut PendingLatest,
    ) -> Result<()> {
        let current = match txn.get(LatestVersions::key(&self.dependent))? {
            Some(bytes) => Some(LatestVersions::value_from_bytes(&bytes)?),
            None => None,
        };

        // The latest moved again since the query looked: the entry was
        // rewritten by that store and is no longer ours to delete.
        if current.as_deref() != Some(self.seen_version.as_str()) {
            tracing::debug!(
                dependent = %self.dependent,
                seen = %self.seen_version,
                current = ?current,
                "Latest pointer moved, skipping prune"
            );
            return Ok(());
        }

        tracing::debug!(
            kind = %self.kind,
            dependency = %self.dependency,
            dependent = %self.dependent,
            "Pruning stale latest-index entry"
        );
        txn.delete(LatestIndex::key(self.kind, &self.dependency, &self.dependent))?;
        Ok(())
    }
}
