//! Key families and value serialization for the single ordered keyspace.
//!
//! ## Naming Convention
//!
//! Each key family is a unit marker struct carrying its `PREFIX` constant
//! and typed key builders. All keys are ASCII with `!` (0x21) as the field
//! separator; name fragments are escaped so `!` can never appear inside a
//! field. Values ride a shared MessagePack + LZ4 codec.
//!
//! | Family | Key shape | Value |
//! |---|---|---|
//! | `Packages` | `!pkg!<name>@<version>` | [`Manifest`] |
//! | `LatestPackages` | `!pkg-latest!<name>` | [`Manifest`] |
//! | `LatestVersions` | `!latest-version!<name>` | version `String` |
//! | `VersionIndex` | `!index!<kind>!<dep>!<dependent>@<version>` | [`RangeSets`] |
//! | `LatestIndex` | `!index-latest!<kind>!<dep>!<dependent>` | [`LatestIndexEntry`] |
//!
//! Versions inside keys stay as their canonical dotted string — keys are
//! compared for equality there, never for version order. Prefix scans use a
//! strict lower bound and `prefix ⧺ 0xFF` as the upper bound.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::range::RangeSets;
use crate::Manifest;

// ============================================================================
// Dependency Kind
// ============================================================================

/// Which dependency map of a manifest an index entry was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DepKind {
    /// `dependencies` — the `dep` index family.
    Runtime,
    /// `devDependencies` — the `dev` index family.
    Dev,
}

impl DepKind {
    pub const ALL: [DepKind; 2] = [DepKind::Runtime, DepKind::Dev];

    pub fn as_str(&self) -> &'static str {
        match self {
            DepKind::Runtime => "dep",
            DepKind::Dev => "dev",
        }
    }

    pub fn from_dev(dev: bool) -> Self {
        if dev {
            DepKind::Dev
        } else {
            DepKind::Runtime
        }
    }
}

impl std::fmt::Display for DepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Name Escaping
// ============================================================================

/// Escape a name fragment for use inside a key.
///
/// `%` becomes `%25` and `!` becomes `%21`, so the separator byte can never
/// appear inside an escaped fragment and escaping is prefix-free against it.
pub fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        match ch {
            '%' => out.push_str("%25"),
            '!' => out.push_str("%21"),
            _ => out.push(ch),
        }
    }
    out
}

/// Decode an escaped name fragment. Malformed escapes pass through verbatim.
pub fn unescape_name(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    let bytes = fragment.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 3 <= bytes.len() {
            match &bytes[i + 1..i + 3] {
                b"21" => {
                    out.push('!');
                    i += 3;
                    continue;
                }
                b"25" => {
                    out.push('%');
                    i += 3;
                    continue;
                }
                _ => {}
            }
        }
        let ch_len = utf8_len(bytes[i]);
        out.push_str(&fragment[i..i + ch_len]);
        i += ch_len;
    }
    out
}

fn utf8_len(first: u8) -> usize {
    match first {
        b if b < 0x80 => 1,
        b if b >= 0xF0 => 4,
        b if b >= 0xE0 => 3,
        _ => 2,
    }
}

/// The token after the final `!` of an index key: the escaped dependent name
/// (latest family) or `dependent@version` (per-version family).
pub fn dependent_token(key: &[u8]) -> &[u8] {
    match key.iter().rposition(|&b| b == b'!') {
        Some(i) => &key[i + 1..],
        None => key,
    }
}

// ============================================================================
// Value Codec
// ============================================================================

/// Shared value serialization: MessagePack, then LZ4 block compression.
pub(crate) trait ValueCodec {
    type Value: Serialize + serde::de::DeserializeOwned;

    fn value_to_bytes(value: &Self::Value) -> Result<Vec<u8>> {
        let msgpack = rmp_serde::to_vec(value)?;
        let compressed = lz4::block::compress(&msgpack, None, true)?;
        Ok(compressed)
    }

    fn value_from_bytes(bytes: &[u8]) -> Result<Self::Value> {
        let decompressed = lz4::block::decompress(bytes, None)?;
        Ok(rmp_serde::from_slice(&decompressed)?)
    }
}

// ============================================================================
// Key Families
// ============================================================================

/// Manifest-by-version family: `!pkg!<name>@<version>`.
pub struct Packages;

impl Packages {
    pub const PREFIX: &'static str = "!pkg!";

    pub fn key(name: &str, version: &str) -> Vec<u8> {
        let mut key = Self::PREFIX.as_bytes().to_vec();
        key.extend_from_slice(escape_name(name).as_bytes());
        key.push(b'@');
        key.extend_from_slice(escape_name(version).as_bytes());
        key
    }

    /// Key from a `dependent@version` token lifted out of an index key.
    pub fn key_for_token(token: &[u8]) -> Vec<u8> {
        let mut key = Self::PREFIX.as_bytes().to_vec();
        key.extend_from_slice(token);
        key
    }

    /// Scan prefix covering every stored version of one package.
    pub fn versions_prefix(name: &str) -> Vec<u8> {
        let mut prefix = Self::PREFIX.as_bytes().to_vec();
        prefix.extend_from_slice(escape_name(name).as_bytes());
        prefix.push(b'@');
        prefix
    }
}

impl ValueCodec for Packages {
    type Value = Manifest;
}

/// Latest-manifest family: `!pkg-latest!<name>`.
pub struct LatestPackages;

impl LatestPackages {
    pub const PREFIX: &'static str = "!pkg-latest!";

    pub fn key(name: &str) -> Vec<u8> {
        let mut key = Self::PREFIX.as_bytes().to_vec();
        key.extend_from_slice(escape_name(name).as_bytes());
        key
    }

    pub fn key_for_token(token: &[u8]) -> Vec<u8> {
        let mut key = Self::PREFIX.as_bytes().to_vec();
        key.extend_from_slice(token);
        key
    }
}

impl ValueCodec for LatestPackages {
    type Value = Manifest;
}

/// Latest-version pointer family: `!latest-version!<name>`.
pub struct LatestVersions;

impl LatestVersions {
    pub const PREFIX: &'static str = "!latest-version!";

    pub fn key(name: &str) -> Vec<u8> {
        let mut key = Self::PREFIX.as_bytes().to_vec();
        key.extend_from_slice(escape_name(name).as_bytes());
        key
    }
}

impl ValueCodec for LatestVersions {
    type Value = String;
}

/// Per-version forward index family:
/// `!index!<kind>!<dep>!<dependent>@<version>`. Entries here are never
/// rewritten or deleted.
pub struct VersionIndex;

impl VersionIndex {
    pub const PREFIX: &'static str = "!index!";

    pub fn key(kind: DepKind, dependency: &str, dependent: &str, version: &str) -> Vec<u8> {
        let mut key = Self::scan_prefix(kind, dependency);
        key.extend_from_slice(escape_name(dependent).as_bytes());
        key.push(b'@');
        key.extend_from_slice(escape_name(version).as_bytes());
        key
    }

    /// Prefix covering every dependent of `dependency` in this kind,
    /// terminated by the field separator.
    pub fn scan_prefix(kind: DepKind, dependency: &str) -> Vec<u8> {
        let mut prefix = Self::PREFIX.as_bytes().to_vec();
        prefix.extend_from_slice(kind.as_str().as_bytes());
        prefix.push(b'!');
        prefix.extend_from_slice(escape_name(dependency).as_bytes());
        prefix.push(b'!');
        prefix
    }
}

impl ValueCodec for VersionIndex {
    type Value = RangeSets;
}

/// Latest forward index family: `!index-latest!<kind>!<dep>!<dependent>`.
/// Entries reflect the dependent's latest version at write time and may go
/// stale; queries prune them lazily.
pub struct LatestIndex;

impl LatestIndex {
    pub const PREFIX: &'static str = "!index-latest!";

    pub fn key(kind: DepKind, dependency: &str, dependent: &str) -> Vec<u8> {
        let mut key = Self::scan_prefix(kind, dependency);
        key.extend_from_slice(escape_name(dependent).as_bytes());
        key
    }

    pub fn scan_prefix(kind: DepKind, dependency: &str) -> Vec<u8> {
        let mut prefix = Self::PREFIX.as_bytes().to_vec();
        prefix.extend_from_slice(kind.as_str().as_bytes());
        prefix.push(b'!');
        prefix.extend_from_slice(escape_name(dependency).as_bytes());
        prefix.push(b'!');
        prefix
    }
}

/// Value of a latest-index entry: the dependent's version when the entry was
/// written, plus the encoded range it declared then.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LatestIndexEntry {
    pub version: String,
    pub sets: RangeSets,
}

impl ValueCodec for LatestIndex {
    type Value = LatestIndexEntry;
}
