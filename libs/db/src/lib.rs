//! revdex-db - a reverse-dependency range index over RocksDB.
//!
//! Given a package name and a version range, the index answers "which
//! packages declare a dependency on that name whose declared range overlaps
//! the queried range" without scanning every dependent. Declared ranges are
//! encoded into lexicographically-comparable packed bounds at write time; a
//! query becomes a prefix scan over one index family with an in-memory
//! overlap test per record.
//!
//! ## Module Structure
//!
//! - `version` - packed version codec and version-string comparison
//! - `range` - range parsing, encoding, normalization, and the overlap test
//! - `schema` - key families and the value codec for the single keyspace
//! - `storage` - RocksDB lifecycle
//! - `cache` - bounded latest-version cache
//! - `mutation` / `writer` - mutation types and the single-consumer writer
//! - `query` / `reader` - query types and the worker pool
//! - `processor` - the shared engine core
//! - `database` - the embedded API handle

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod cache;
pub mod database;
pub mod mutation;
pub mod processor;
pub mod query;
pub mod range;
pub mod reader;
pub mod request;
pub mod schema;
pub mod storage;
pub mod version;
pub mod writer;

pub use cache::{LatestCacheConfig, LatestVersionCache};
pub use database::{Database, DatabaseConfig};
pub use mutation::{Mutation, PruneLatestIndex, StoreManifest};
pub use processor::Processor;
pub use query::{Dependents, PackageVersion, PackageVersions, Query, QueryOutput};
pub use range::{InvalidQueryRange, QueryInterval, RangeExpr, RangeGroup, RangeSets};
pub use reader::{Reader, ReaderConfig, Runnable as QueryRunnable};
pub use schema::DepKind;
pub use storage::Storage;
pub use writer::{Writer, WriterConfig, Runnable as MutationRunnable};

/// A package descriptor: name, version, and its dependency range maps.
///
/// Field names round-trip the manifest document format (`devDependencies`
/// stays camelCase); absent maps deserialize as empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub version: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,

    #[serde(
        default,
        rename = "devDependencies",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub dev_dependencies: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Manifest {
            name: name.into(),
            version: version.into(),
            dependencies: BTreeMap::new(),
            dev_dependencies: BTreeMap::new(),
        }
    }

    pub fn with_dependency(mut self, name: impl Into<String>, range: impl Into<String>) -> Self {
        self.dependencies.insert(name.into(), range.into());
        self
    }

    pub fn with_dev_dependency(
        mut self,
        name: impl Into<String>,
        range: impl Into<String>,
    ) -> Self {
        self.dev_dependencies.insert(name.into(), range.into());
        self
    }

    /// The dependency map backing the given index kind.
    pub fn dependencies_of(&self, kind: DepKind) -> &BTreeMap<String, String> {
        match kind {
            DepKind::Runtime => &self.dependencies,
            DepKind::Dev => &self.dev_dependencies,
        }
    }

    /// Does this manifest declare `name` in the given dependency kind?
    pub fn declares(&self, kind: DepKind, name: &str) -> bool {
        self.dependencies_of(kind).contains_key(name)
    }
}
