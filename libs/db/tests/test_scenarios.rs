//! End-to-end scenarios over a full database: ingest, query, lazy cleanup.

use revdex_db::schema::{DepKind, LatestIndex, LatestPackages, Packages, VersionIndex};
use revdex_db::{Database, DatabaseConfig, Dependents, InvalidQueryRange, Manifest};
use tempfile::TempDir;

fn open_db(temp_dir: &TempDir) -> Database {
    Database::open(temp_dir.path(), DatabaseConfig::default()).expect("open database")
}

#[tokio::test]
async fn test_basic_dependent_lookup() {
    let temp_dir = TempDir::new().unwrap();
    let db = open_db(&temp_dir);

    let manifest = Manifest::new("a", "1.0.0").with_dependency("b", "^1.2.0");
    db.store(manifest.clone()).await.unwrap();

    let results = db.query(Dependents::new("b", "1.5.0")).await.unwrap();
    assert_eq!(results, vec![manifest]);

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_dropped_dependency_is_pruned_lazily() {
    let temp_dir = TempDir::new().unwrap();
    let db = open_db(&temp_dir);

    db.store(Manifest::new("a", "1.0.0").with_dependency("b", "^1.2.0"))
        .await
        .unwrap();
    db.store(Manifest::new("a", "2.0.0")).await.unwrap();

    // The stale latest entry survives the store itself...
    let stale_key = LatestIndex::key(DepKind::Runtime, "b", "a");
    assert!(db.storage().get(&stale_key).unwrap().is_some());

    // ...and is discovered and deleted by the next query.
    let results = db.query(Dependents::new("b", "1.5.0")).await.unwrap();
    assert!(results.is_empty());
    assert!(db.storage().get(&stale_key).unwrap().is_none());

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_per_version_scan_still_finds_old_dependent() {
    let temp_dir = TempDir::new().unwrap();
    let db = open_db(&temp_dir);

    db.store(Manifest::new("a", "1.0.0").with_dependency("b", "^1.2.0"))
        .await
        .unwrap();
    db.store(Manifest::new("a", "2.0.0")).await.unwrap();

    // Latest-path query prunes the stale entry.
    assert!(db
        .query(Dependents::new("b", "1.5.0"))
        .await
        .unwrap()
        .is_empty());

    // The per-version index still answers historical questions...
    let all = db
        .query(Dependents {
            all: true,
            ..Dependents::new("b", "1.5.0")
        })
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].name, "a");
    assert_eq!(all[0].version, "1.0.0");

    // ...and does not resurrect the pruned latest entry.
    let stale_key = LatestIndex::key(DepKind::Runtime, "b", "a");
    assert!(db.storage().get(&stale_key).unwrap().is_none());

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_cleanup_never_deletes_manifests() {
    let temp_dir = TempDir::new().unwrap();
    let db = open_db(&temp_dir);

    db.store(Manifest::new("a", "1.0.0").with_dependency("b", "^1.2.0"))
        .await
        .unwrap();
    db.store(Manifest::new("a", "2.0.0")).await.unwrap();
    db.query(Dependents::new("b", "1.5.0")).await.unwrap();

    // The prune removed only the index entry; manifests are shared with the
    // per-version paths and must survive.
    assert!(db.storage().get(&Packages::key("a", "1.0.0")).unwrap().is_some());
    assert!(db.storage().get(&Packages::key("a", "2.0.0")).unwrap().is_some());
    assert!(db.storage().get(&LatestPackages::key("a")).unwrap().is_some());

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_tilde_range_boundaries() {
    let temp_dir = TempDir::new().unwrap();
    let db = open_db(&temp_dir);

    db.store(Manifest::new("x", "1.0.0").with_dependency("y", "~2.3.0"))
        .await
        .unwrap();

    assert!(db
        .query(Dependents::new("y", "2.4.0"))
        .await
        .unwrap()
        .is_empty());

    let results = db.query(Dependents::new("y", "2.3.5")).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].name, "x");
    assert_eq!(results[0].version, "1.0.0");

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_disjunctive_query_range_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let db = open_db(&temp_dir);

    let err = db
        .query(Dependents::new("y", "1.0.0 || 2.0.0"))
        .await
        .unwrap_err();
    assert!(
        err.downcast_ref::<InvalidQueryRange>().is_some(),
        "expected InvalidQueryRange, got: {err:#}"
    );

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_unparseable_declared_range_drops_only_the_index_entry() {
    let temp_dir = TempDir::new().unwrap();
    let db = open_db(&temp_dir);

    db.store(Manifest::new("w", "1.0.0").with_dependency("y", "not-a-range"))
        .await
        .unwrap();

    // The manifest itself is stored and retrievable.
    let manifest = db.manifest("w", None).await.unwrap().unwrap();
    assert_eq!(manifest.version, "1.0.0");
    assert_eq!(db.versions("w").await.unwrap(), vec!["1.0.0"]);

    // No index entry exists under the dependency.
    let latest_key = LatestIndex::key(DepKind::Runtime, "y", "w");
    let version_key = VersionIndex::key(DepKind::Runtime, "y", "w", "1.0.0");
    assert!(db.storage().get(&latest_key).unwrap().is_none());
    assert!(db.storage().get(&version_key).unwrap().is_none());

    // And a query over that dependency finds nothing.
    assert!(db.query(Dependents::new("y", "*")).await.unwrap().is_empty());

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_disjunctive_declared_range_is_preserved() {
    let temp_dir = TempDir::new().unwrap();
    let db = open_db(&temp_dir);

    db.store(Manifest::new("m", "1.0.0").with_dependency("b", "^1.0.0 || ^3.0.0"))
        .await
        .unwrap();

    assert_eq!(db.query(Dependents::new("b", "3.1.0")).await.unwrap().len(), 1);
    assert_eq!(db.query(Dependents::new("b", "1.1.0")).await.unwrap().len(), 1);
    assert!(db.query(Dependents::new("b", "2.0.0")).await.unwrap().is_empty());

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_wildcard_query_bypasses_filtering() {
    let temp_dir = TempDir::new().unwrap();
    let db = open_db(&temp_dir);

    db.store(Manifest::new("a", "1.0.0").with_dependency("b", "^1.0.0"))
        .await
        .unwrap();
    db.store(Manifest::new("c", "1.0.0").with_dependency("b", ">=4.0.0"))
        .await
        .unwrap();

    let results = db.query(Dependents::new("b", "*")).await.unwrap();
    assert_eq!(results.len(), 2);

    db.close().await.unwrap();
}
