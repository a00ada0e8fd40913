//! Query types and their execution logic.
//!
//! This module contains only business logic - query type definitions and
//! their executors. Infrastructure (Reader, worker pool, spawn functions)
//! is in the `reader` module.
//!
//! The central query is [`Dependents`]: a prefix scan over an index family
//! interleaved with per-record overlap tests, manifest fetches and, on the
//! latest path, re-validation with lazy cleanup of stale entries. The
//! executor is a producer that awaits a bounded channel send per emitted
//! manifest, so consumers apply backpressure by not draining and cancel by
//! dropping the receiver.

use anyhow::{bail, Result};
use rocksdb::{Direction, IteratorMode};
use tokio::sync::mpsc;

use crate::mutation::{Mutation, PruneLatestIndex};
use crate::processor::Processor;
use crate::range::normalize_query;
use crate::range::overlaps;
use crate::reader::{Reader, Runnable};
use crate::request::RequestMeta;
use crate::schema::{
    dependent_token, unescape_name, DepKind, LatestIndex, LatestPackages, Packages, ValueCodec,
    VersionIndex,
};
use crate::Manifest;

/// Buffer size for the executor's internal collect channel.
const COLLECT_BUFFER: usize = 64;

// ============================================================================
// Query Enum
// ============================================================================

/// Query enum representing all possible query types.
///
/// Internal infrastructure for the dispatch pipeline; users interact with
/// the parameter structs via the `Runnable` trait.
#[derive(Debug)]
pub enum Query {
    Dependents(Dependents),
    PackageVersion(PackageVersion),
    PackageVersions(PackageVersions),
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Query::Dependents(q) => write!(
                f,
                "Dependents: name={}, range={}, all={}, dev={}",
                q.name, q.range, q.all, q.dev
            ),
            Query::PackageVersion(q) => {
                write!(f, "PackageVersion: name={}, version={:?}", q.name, q.version)
            }
            Query::PackageVersions(q) => write!(f, "PackageVersions: name={}", q.name),
        }
    }
}

/// Typed replies for the query enum.
#[derive(Debug)]
pub enum QueryOutput {
    Dependents(Vec<Manifest>),
    PackageVersion(Option<Manifest>),
    PackageVersions(Vec<String>),
}

impl Query {
    pub(crate) async fn execute(&self, processor: &Processor) -> Result<QueryOutput> {
        match self {
            Query::Dependents(q) => q.execute(processor).await.map(QueryOutput::Dependents),
            Query::PackageVersion(q) => {
                q.execute(processor).await.map(QueryOutput::PackageVersion)
            }
            Query::PackageVersions(q) => {
                q.execute(processor).await.map(QueryOutput::PackageVersions)
            }
        }
    }
}

impl RequestMeta for Query {
    type Reply = QueryOutput;

    fn request_kind(&self) -> &'static str {
        match self {
            Query::Dependents(_) => "dependents",
            Query::PackageVersion(_) => "package_version",
            Query::PackageVersions(_) => "package_versions",
        }
    }
}

// ============================================================================
// Dependents
// ============================================================================

/// Find the packages that declare a dependency on `name` with a range
/// overlapping `range`.
///
/// By default the latest-only index is scanned and every candidate is
/// re-validated against its current latest manifest (pruning stale entries
/// along the way). With `all` set, the per-version index is scanned and
/// records are emitted without re-validation; because the stored encoding
/// treats `>` as `>=` and `<=` as `<` at the byte level, an `all` scan can
/// include a dependent whose true range misses the query by one patch at a
/// boundary.
#[derive(Debug, Clone)]
pub struct Dependents {
    /// The dependency being queried.
    pub name: String,

    /// Version range expression; a single conjunction (no `||`).
    pub range: String,

    /// Scan the per-version index instead of latest-only.
    pub all: bool,

    /// Scan the `dev` index family instead of `dep`.
    pub dev: bool,

    /// Resume cursor: start strictly after this dependent token.
    pub gt: Option<String>,

    /// Upper bound on raw scan emissions, applied before filtering.
    pub limit: Option<usize>,
}

impl Dependents {
    pub fn new(name: impl Into<String>, range: impl Into<String>) -> Self {
        Dependents {
            name: name.into(),
            range: range.into(),
            all: false,
            dev: false,
            gt: None,
            limit: None,
        }
    }

    /// Collect the full result set through the executor's stream.
    pub(crate) async fn execute(&self, processor: &Processor) -> Result<Vec<Manifest>> {
        let (tx, mut rx) = mpsc::channel(COLLECT_BUFFER);
        let producer = self.produce(processor, tx);
        let collector = async move {
            let mut manifests = Vec::new();
            while let Some(item) = rx.recv().await {
                manifests.push(item?);
            }
            Ok(manifests)
        };
        let ((), collected) = tokio::join!(producer, collector);
        collected
    }

    /// Run the scan, sending each matching manifest into `tx`.
    ///
    /// Errors are delivered in-band as the final stream item; a dropped
    /// receiver stops the scan promptly.
    pub(crate) async fn produce(&self, processor: &Processor, tx: mpsc::Sender<Result<Manifest>>) {
        if let Err(err) = self.scan_into(processor, &tx).await {
            let _ = tx.send(Err(err)).await;
        }
    }

    async fn scan_into(
        &self,
        processor: &Processor,
        tx: &mpsc::Sender<Result<Manifest>>,
    ) -> Result<()> {
        let interval = normalize_query(&self.range)?;
        let kind = DepKind::from_dev(self.dev);

        let prefix = if self.all {
            VersionIndex::scan_prefix(kind, &self.name)
        } else {
            LatestIndex::scan_prefix(kind, &self.name)
        };

        // Strictly-greater lower bound: seeking to `base ⧺ 0x00` skips the
        // cursor key itself (index keys never contain 0x00).
        let mut lower = prefix.clone();
        if let Some(gt) = &self.gt {
            lower.extend_from_slice(gt.as_bytes());
        }
        lower.push(0x00);

        let mut upper = prefix;
        upper.push(0xFF);

        let db = processor.storage().transaction_db()?;
        let mut remaining = self.limit;

        for item in db.iterator(IteratorMode::From(&lower, Direction::Forward)) {
            let (key, value) = item?;
            if key.as_ref() >= upper.as_slice() {
                break;
            }
            // The raw-emission limit counts every scanned record, matched
            // or not, so pagination cursors line up with scan positions.
            if let Some(n) = remaining.as_mut() {
                if *n == 0 {
                    break;
                }
                *n -= 1;
            }

            let (sets, _entry_version) = if self.all {
                (VersionIndex::value_from_bytes(&value)?, None)
            } else {
                let entry = LatestIndex::value_from_bytes(&value)?;
                (entry.sets, Some(entry.version))
            };

            if !interval.wildcard && !overlaps(&sets, &interval) {
                continue;
            }

            let token = dependent_token(&key);
            let manifest_key = if self.all {
                Packages::key_for_token(token)
            } else {
                LatestPackages::key_for_token(token)
            };

            let Some(manifest_bytes) = db.get(&manifest_key)? else {
                tracing::warn!(
                    key = %String::from_utf8_lossy(&key),
                    "Index entry without a manifest, skipping"
                );
                continue;
            };
            let manifest = if self.all {
                Packages::value_from_bytes(&manifest_bytes)?
            } else {
                LatestPackages::value_from_bytes(&manifest_bytes)?
            };

            if !self.all && !manifest.declares(kind, &self.name) {
                // Stale hit: the dependent's latest no longer declares this
                // dependency. Prune through the writer and move on.
                self.cleanup(processor, kind, token, &manifest.version).await?;
                continue;
            }

            if tx.send(Ok(manifest)).await.is_err() {
                // Consumer cancelled the stream.
                break;
            }
        }

        Ok(())
    }

    async fn cleanup(
        &self,
        processor: &Processor,
        kind: DepKind,
        token: &[u8],
        seen_version: &str,
    ) -> Result<()> {
        let dependent = unescape_name(std::str::from_utf8(token)?);
        tracing::debug!(
            dependency = %self.name,
            dependent = %dependent,
            "Stale latest-index hit, requesting cleanup"
        );

        let Some(writer) = processor.writer() else {
            bail!("Writer is gone, cannot clean up stale index entry");
        };
        writer
            .send_with_result(vec![Mutation::Prune(PruneLatestIndex {
                kind,
                dependency: self.name.clone(),
                dependent,
                seen_version: seen_version.to_string(),
            })])
            .await
    }
}

#[async_trait::async_trait]
impl Runnable for Dependents {
    type Output = Vec<Manifest>;

    async fn run(self, reader: &Reader) -> Result<Self::Output> {
        match reader.request(Query::Dependents(self)).await? {
            QueryOutput::Dependents(manifests) => Ok(manifests),
            other => bail!("Unexpected query reply: {:?}", other),
        }
    }
}

// ============================================================================
// PackageVersion
// ============================================================================

/// Fetch one manifest: a specific stored version, or the current latest
/// when `version` is `None`.
#[derive(Debug, Clone)]
pub struct PackageVersion {
    pub name: String,
    pub version: Option<String>,
}

impl PackageVersion {
    pub fn new(name: impl Into<String>, version: Option<String>) -> Self {
        PackageVersion {
            name: name.into(),
            version,
        }
    }

    pub(crate) async fn execute(&self, processor: &Processor) -> Result<Option<Manifest>> {
        let key = match &self.version {
            Some(version) => Packages::key(&self.name, version),
            None => LatestPackages::key(&self.name),
        };
        match processor.storage().get(&key)? {
            Some(bytes) => Ok(Some(Packages::value_from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl Runnable for PackageVersion {
    type Output = Option<Manifest>;

    async fn run(self, reader: &Reader) -> Result<Self::Output> {
        match reader.request(Query::PackageVersion(self)).await? {
            QueryOutput::PackageVersion(manifest) => Ok(manifest),
            other => bail!("Unexpected query reply: {:?}", other),
        }
    }
}

// ============================================================================
// PackageVersions
// ============================================================================

/// List the stored versions of a package, in store scan order.
#[derive(Debug, Clone)]
pub struct PackageVersions {
    pub name: String,
}

impl PackageVersions {
    pub fn new(name: impl Into<String>) -> Self {
        PackageVersions { name: name.into() }
    }

    pub(crate) async fn execute(&self, processor: &Processor) -> Result<Vec<String>> {
        let prefix = Packages::versions_prefix(&self.name);
        let db = processor.storage().transaction_db()?;

        let mut versions = Vec::new();
        for item in db.iterator(IteratorMode::From(&prefix, Direction::Forward)) {
            let (key, _value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let fragment = std::str::from_utf8(&key[prefix.len()..])?;
            versions.push(unescape_name(fragment));
        }
        Ok(versions)
    }
}

#[async_trait::async_trait]
impl Runnable for PackageVersions {
    type Output = Vec<String>;

    async fn run(self, reader: &Reader) -> Result<Self::Output> {
        match reader.request(Query::PackageVersions(self)).await? {
            QueryOutput::PackageVersions(versions) => Ok(versions),
            other => bail!("Unexpected query reply: {:?}", other),
        }
    }
}
