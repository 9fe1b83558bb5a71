//! Fallback behaviour of the serving catalog.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use flowpulse_common::{
    CanonicalSnapshot, EvidenceRecord, Metric, Platform, Tiered, TrendParams,
};
use flowpulse_engine::{FileTarget, PublishTarget, SnapshotBuilder, TrendMerger};
use flowpulse_store::{
    Catalog, ListQuery, ReadError, SnapshotFile, SnapshotSource, StoreError, Tier, MAX_LIMIT,
};

/// In-memory stand-in for the Postgres store that can be switched off.
struct MemoryStore {
    snapshot: CanonicalSnapshot,
    up: AtomicBool,
}

#[async_trait]
impl SnapshotSource for MemoryStore {
    fn name(&self) -> &str {
        "store"
    }

    async fn load(&self) -> flowpulse_store::Result<CanonicalSnapshot> {
        if self.up.load(Ordering::SeqCst) {
            Ok(self.snapshot.clone())
        } else {
            Err(StoreError::Timeout(Duration::from_secs(1)))
        }
    }
}

struct HangingStore;

#[async_trait]
impl SnapshotSource for HangingStore {
    fn name(&self) -> &str {
        "store"
    }

    async fn load(&self) -> flowpulse_store::Result<CanonicalSnapshot> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(StoreError::Empty)
    }
}

fn rec(platform: Platform, id: &str, title: &str, views: u64, likes: u64) -> EvidenceRecord {
    let mut metrics = std::collections::BTreeMap::from([(Metric::Views, views)]);
    if platform != Platform::GoogleAds {
        metrics.insert(Metric::Likes, likes);
    }
    EvidenceRecord {
        platform,
        external_id: id.to_string(),
        raw_title: title.to_string(),
        url: format!("https://example.com/{id}"),
        metrics,
        country: Some("US".to_string()),
        collected_at: Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap(),
    }
}

async fn built_snapshot() -> CanonicalSnapshot {
    let records = vec![
        rec(Platform::YouTube, "1", "Slack bot", 900, 80),
        rec(Platform::YouTube, "2", "Gmail digest", 5000, 120),
        rec(Platform::YouTube, "3", "Notion sync", 40, 1),
        rec(Platform::YouTube, "4", "Airtable backup", 40, 1),
        rec(Platform::YouTube, "5", "Telegram assistant", 12000, 700),
        rec(Platform::YouTube, "6", "Discord moderator", 3, 0),
        rec(Platform::YouTube, "7", "RSS to Twitter", 700, 30),
        rec(Platform::GoogleAds, "8", "Stripe invoices", 100_000, 0),
    ];
    let builder = SnapshotBuilder::builder()
        .trends(TrendMerger::synthesized_only(TrendParams::default()))
        .build();
    builder.build(records, None).await.unwrap().0
}

async fn published_file(snapshot: &CanonicalSnapshot) -> (tempfile::TempDir, Arc<SnapshotFile>) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("canonical_workflows.json");
    FileTarget::new(&path).publish(snapshot).await.unwrap();
    (dir, Arc::new(SnapshotFile::new(path)))
}

#[tokio::test]
async fn top_by_platform_is_sorted_by_platform_score_then_id() {
    let snapshot = built_snapshot().await;
    let (_dir, file) = published_file(&snapshot).await;
    let catalog = Catalog::new(None, file, Duration::from_secs(1));

    let served = catalog.top(5, None, Some(Platform::YouTube)).await.unwrap();
    let top = served.value;
    assert!(top.len() <= 5);
    assert!(top.iter().all(|w| w.platforms.contains(&Platform::YouTube)));
    for pair in top.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let (sa, sb) = (
            a.popularity_score.for_platform(Some(Platform::YouTube)),
            b.popularity_score.for_platform(Some(Platform::YouTube)),
        );
        assert!(sa > sb || (sa == sb && a.id < b.id), "bad order: {} then {}", a.title, b.title);
    }
    assert_eq!(served.tier, Tier::Fallback);
}

#[tokio::test]
async fn store_and_file_answer_identically() {
    let snapshot = built_snapshot().await;
    let (_dir, file) = published_file(&snapshot).await;
    let store = Arc::new(MemoryStore {
        snapshot: snapshot.clone(),
        up: AtomicBool::new(true),
    });
    let catalog = Catalog::new(Some(store.clone() as Arc<dyn SnapshotSource>), file, Duration::from_secs(1));

    let query = ListQuery {
        q: Some("o".into()),
        limit: 3,
        page: 2,
        ..ListQuery::default()
    };
    let from_store = catalog.list(query.clone()).await.unwrap();
    assert_eq!(from_store.tier, Tier::Primary);
    assert!(from_store.degraded_reason.is_none());

    store.up.store(false, Ordering::SeqCst);
    let from_file = catalog.list(query).await.unwrap();
    assert_eq!(from_file.tier, Tier::Fallback);
    assert!(from_file.degraded_reason.as_deref().unwrap().contains("store"));
    assert_eq!(from_store.value, from_file.value);
}

#[tokio::test]
async fn hanging_store_times_out_to_file() {
    let snapshot = built_snapshot().await;
    let (_dir, file) = published_file(&snapshot).await;
    let catalog = Catalog::new(Some(Arc::new(HangingStore) as Arc<dyn SnapshotSource>), file, Duration::from_millis(100));

    match catalog.snapshot().await {
        Tiered::Degraded(served, reason) => {
            assert_eq!(served.snapshot_version, snapshot.snapshot_version);
            assert!(reason.contains("timed out"));
        }
        other => panic!("expected degraded read, got {other:?}"),
    }
}

#[tokio::test]
async fn get_finds_workflow_by_id() {
    let snapshot = built_snapshot().await;
    let (_dir, file) = published_file(&snapshot).await;
    let catalog = Catalog::new(None, file, Duration::from_secs(1));

    let wanted = snapshot.workflows[2].clone();
    let served = catalog.get(&wanted.id.to_string()).await.unwrap();
    assert_eq!(served.value, Some(wanted));
    let nil = uuid::Uuid::nil().to_string();
    assert!(catalog.get(&nil).await.unwrap().value.is_none());
}

#[tokio::test]
async fn get_resolves_member_source_ids() {
    let snapshot = built_snapshot().await;
    let (_dir, file) = published_file(&snapshot).await;
    let catalog = Catalog::new(None, file, Duration::from_secs(1));

    let by_key = catalog.get("YouTube:5").await.unwrap().value.unwrap();
    assert_eq!(by_key.title, "Telegram assistant");
    assert_eq!(by_key.source_ids, vec!["YouTube:5".to_string()]);

    let by_external_id = catalog.get("8").await.unwrap().value.unwrap();
    assert_eq!(by_external_id.title, "Stripe invoices");
    assert!(catalog.get("YouTube:404").await.unwrap().value.is_none());
}

#[tokio::test]
async fn top_returns_exactly_limit_and_rejects_out_of_range_limits() {
    let records: Vec<_> = (0..150)
        .map(|i| rec(Platform::YouTube, &format!("w{i}"), &format!("Sync app{i} with sheet{i}"), 100 + i, 1))
        .collect();
    let builder = SnapshotBuilder::builder()
        .trends(TrendMerger::synthesized_only(TrendParams::default()))
        .build();
    let (snapshot, _) = builder.build(records, None).await.unwrap();
    assert_eq!(snapshot.workflows.len(), 150);
    let (_dir, file) = published_file(&snapshot).await;
    let catalog = Catalog::new(None, file, Duration::from_secs(1));

    assert_eq!(catalog.top(MAX_LIMIT, None, None).await.unwrap().value.len(), MAX_LIMIT);
    assert_eq!(catalog.top(7, None, None).await.unwrap().value.len(), 7);
    assert!(matches!(
        catalog.top(0, None, None).await,
        Err(ReadError::InvalidQuery(_))
    ));
    assert!(matches!(
        catalog.top(120, None, None).await,
        Err(ReadError::InvalidQuery(_))
    ));
    let paged = ListQuery { page: 0, ..ListQuery::default() };
    assert!(matches!(catalog.list(paged).await, Err(ReadError::InvalidQuery(_))));
}

#[tokio::test]
async fn both_tiers_down_reports_sources_and_last_version() {
    let snapshot = built_snapshot().await;
    let (dir, file) = published_file(&snapshot).await;
    let store = Arc::new(MemoryStore {
        snapshot: snapshot.clone(),
        up: AtomicBool::new(true),
    });
    let catalog = Catalog::new(Some(store.clone() as Arc<dyn SnapshotSource>), file, Duration::from_secs(1));
    catalog.top(3, None, None).await.unwrap();

    store.up.store(false, Ordering::SeqCst);
    drop(dir);

    let err = match catalog.top(3, None, None).await {
        Err(ReadError::Unavailable(err)) => err,
        other => panic!("expected an outage, got {other:?}"),
    };
    let sources: Vec<_> = err.failures.iter().map(|f| f.source.as_str()).collect();
    assert_eq!(sources, vec!["store", "snapshot_file"]);
    assert_eq!(err.last_known_version.as_deref(), Some(snapshot.snapshot_version.as_str()));
    assert!(catalog.snapshot().await.is_unavailable());
}

#[tokio::test]
async fn last_known_version_survives_a_new_catalog() {
    let snapshot = built_snapshot().await;
    let (dir, file) = published_file(&snapshot).await;
    let version_dir = tempfile::tempdir().unwrap();
    let version_file = version_dir.path().join("last_served_version");

    let first = Catalog::new(None, file.clone(), Duration::from_secs(1)).with_version_file(&version_file);
    first.top(1, None, None).await.unwrap();
    drop(first);
    drop(dir);

    let second = Catalog::new(None, file, Duration::from_secs(1)).with_version_file(&version_file);
    assert_eq!(second.last_known_version().as_deref(), Some(snapshot.snapshot_version.as_str()));
    let err = second.get("YouTube:1").await.unwrap_err();
    assert_eq!(err.last_known_version.as_deref(), Some(snapshot.snapshot_version.as_str()));
}
