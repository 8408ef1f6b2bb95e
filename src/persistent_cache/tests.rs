use super::*;
use std::time::Duration;
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

fn options_in(dir: &TempDir) -> CacheOptions {
    CacheOptions {
        directory: Some(dir.path().to_path_buf()),
        ..Default::default()
    }
}

async fn pause() {
    // updatedAt ordering must be observable between consecutive writes
    tokio::time::sleep(Duration::from_millis(5)).await;
}

// ============================================================================
// get / set
// ============================================================================

#[tokio::test]
async fn set_then_get_returns_value_with_fresh_timestamp() {
    let dir = TempDir::new().unwrap();
    let cache: PersistentCache<String> = PersistentCache::open("values.json", options_in(&dir));

    let before = Utc::now();
    cache.set("alpha", "one".to_string()).await.expect("persist");

    let entry = cache.get("alpha").await.expect("entry present");
    assert_eq!(entry.value, "one");
    assert!(entry.updated_at >= before);
}

#[tokio::test]
async fn get_missing_key_returns_none() {
    let dir = TempDir::new().unwrap();
    let cache: PersistentCache<u32> = PersistentCache::open("values.json", options_in(&dir));
    assert!(cache.get("nope").await.is_none());
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn cached_null_is_distinct_from_missing() {
    let dir = TempDir::new().unwrap();
    let cache: PersistentCache<Option<String>> =
        PersistentCache::open("identities.json", options_in(&dir));

    cache.set("ghost", None).await.unwrap();

    let hit = cache.get_value("ghost").await;
    assert_eq!(hit, Some(None));
    assert_eq!(cache.get_value("other").await, None);
}

#[tokio::test]
async fn overwriting_refreshes_updated_at() {
    let dir = TempDir::new().unwrap();
    let cache: PersistentCache<u32> = PersistentCache::open("values.json", options_in(&dir));

    cache.set("k", 1).await.unwrap();
    let first = cache.get("k").await.unwrap().updated_at;
    pause().await;
    cache.set("k", 2).await.unwrap();
    let second = cache.get("k").await.unwrap();

    assert_eq!(second.value, 2);
    assert!(second.updated_at > first);
}

#[tokio::test]
async fn remove_deletes_entry() {
    let dir = TempDir::new().unwrap();
    let cache: PersistentCache<u32> = PersistentCache::open("values.json", options_in(&dir));

    cache.set("k", 1).await.unwrap();
    assert!(cache.remove("k").await.unwrap());
    assert!(!cache.remove("k").await.unwrap());
    assert!(cache.get("k").await.is_none());
}

// ============================================================================
// TTL and eviction
// ============================================================================

#[tokio::test]
async fn expired_entry_is_dropped_and_persisted() {
    let dir = TempDir::new().unwrap();
    let options = CacheOptions {
        max_age: Some(Duration::from_millis(40)),
        ..options_in(&dir)
    };
    let cache: PersistentCache<u32> = PersistentCache::open("ttl.json", options.clone());

    cache.set("short", 1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert!(cache.get("short").await.is_none());
    assert!(cache.entries_list().await.is_empty());

    let reopened: PersistentCache<u32> = PersistentCache::open(
        "ttl.json",
        CacheOptions {
            max_age: None,
            ..options
        },
    );
    assert!(reopened.get("short").await.is_none());
}

#[tokio::test]
async fn prune_expired_removes_only_stale_entries() {
    let dir = TempDir::new().unwrap();
    let options = CacheOptions {
        max_age: Some(Duration::from_millis(60)),
        ..options_in(&dir)
    };
    let cache: PersistentCache<u32> = PersistentCache::open("ttl.json", options);

    cache.set("old", 1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    cache.set("new", 2).await.unwrap();

    assert_eq!(cache.prune_expired().await, 1);
    let keys: Vec<String> = cache.entries_list().await.into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["new".to_string()]);
}

#[tokio::test]
async fn prune_without_ttl_is_noop() {
    let dir = TempDir::new().unwrap();
    let cache: PersistentCache<u32> = PersistentCache::open("values.json", options_in(&dir));
    cache.set("k", 1).await.unwrap();
    assert_eq!(cache.prune_expired().await, 0);
    assert_eq!(cache.len().await, 1);
}

#[tokio::test]
async fn inserting_past_max_entries_evicts_single_oldest() {
    let dir = TempDir::new().unwrap();
    let options = CacheOptions {
        max_entries: Some(3),
        ..options_in(&dir)
    };
    let cache: PersistentCache<u32> = PersistentCache::open("bounded.json", options);

    for (i, key) in ["a", "b", "c", "d"].iter().enumerate() {
        cache.set(key, i as u32).await.unwrap();
        pause().await;
    }

    assert_eq!(cache.len().await, 3);
    assert!(cache.get("a").await.is_none());
    for key in ["b", "c", "d"] {
        assert!(cache.get(key).await.is_some(), "{key} should survive");
    }
}

#[tokio::test]
async fn rewriting_old_key_protects_it_from_eviction() {
    let dir = TempDir::new().unwrap();
    let options = CacheOptions {
        max_entries: Some(2),
        ..options_in(&dir)
    };
    let cache: PersistentCache<u32> = PersistentCache::open("bounded.json", options);

    cache.set("a", 1).await.unwrap();
    pause().await;
    cache.set("b", 2).await.unwrap();
    pause().await;
    cache.set("a", 3).await.unwrap();
    pause().await;
    cache.set("c", 4).await.unwrap();

    assert!(cache.get("b").await.is_none());
    assert_eq!(cache.get_value("a").await, Some(3));
    assert_eq!(cache.get_value("c").await, Some(4));
}

#[test]
fn prune_interval_is_clamped() {
    let options = CacheOptions {
        prune_interval: Some(Duration::from_secs(1)),
        ..Default::default()
    };
    assert_eq!(options.effective_prune_interval(), MIN_PRUNE_INTERVAL);
    assert_eq!(
        CacheOptions::default().effective_prune_interval(),
        DEFAULT_PRUNE_INTERVAL
    );
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn round_trip_through_disk() {
    let dir = TempDir::new().unwrap();
    {
        let cache: PersistentCache<Vec<u32>> =
            PersistentCache::open("roundtrip.json", options_in(&dir));
        cache.set("x", vec![1, 2]).await.unwrap();
        cache.set("y", vec![]).await.unwrap();
    }

    let reopened: PersistentCache<Vec<u32>> =
        PersistentCache::open("roundtrip.json", options_in(&dir));
    let entries = reopened.entries_list().await;
    let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, vec!["x", "y"]);
    assert_eq!(reopened.get_value("x").await, Some(vec![1, 2]));
    assert_eq!(reopened.get_value("y").await, Some(vec![]));
}

#[tokio::test]
async fn file_uses_documented_layout() {
    let dir = TempDir::new().unwrap();
    let cache: PersistentCache<Option<String>> =
        PersistentCache::open("layout.json", options_in(&dir));
    cache
        .set("jane", Some("https://github.com/jane".to_string()))
        .await
        .unwrap();

    let mut bytes = std::fs::read(dir.path().join("layout.json")).unwrap();
    let value: simd_json::OwnedValue = simd_json::to_owned_value(&mut bytes).unwrap();
    let text = value.to_string();
    assert!(text.contains(r#""version":1"#), "{text}");
    assert!(text.contains(r#""updatedAt""#), "{text}");
    assert!(text.contains(r#""value":"https://github.com/jane""#), "{text}");
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn unknown_version_is_treated_as_empty() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("old.json"),
        r#"{"version":99,"entries":{"k":{"value":1,"updatedAt":"2024-01-01T00:00:00Z"}}}"#,
    )
    .unwrap();

    let cache: PersistentCache<u32> = PersistentCache::open("old.json", options_in(&dir));
    assert!(cache.get("k").await.is_none());
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn malformed_file_is_treated_as_empty() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("bad.json"), r#"{"version":1,"entries":[1,2,3]}"#).unwrap();

    let cache: PersistentCache<u32> = PersistentCache::open("bad.json", options_in(&dir));
    assert!(cache.is_empty().await);

    // The cache still works and overwrites the bad file.
    cache.set("k", 5).await.unwrap();
    let reopened: PersistentCache<u32> = PersistentCache::open("bad.json", options_in(&dir));
    assert_eq!(reopened.get_value("k").await, Some(5));
}

#[tokio::test]
async fn failed_write_degrades_to_memory_only() {
    let dir = TempDir::new().unwrap();
    // A directory squatting on the target path makes the rename fail.
    std::fs::create_dir(dir.path().join("blocked.json")).unwrap();

    let cache: PersistentCache<u32> = PersistentCache::open("blocked.json", options_in(&dir));
    let result = cache.set("k", 9).await;

    assert!(result.is_err());
    assert_eq!(cache.get_value("k").await, Some(9));
    // the abandoned temp file is cleaned up
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn separate_handles_on_one_file_never_tear_writes() {
    let dir = TempDir::new().unwrap();
    let first: PersistentCache<u32> = PersistentCache::open("twice.json", options_in(&dir));
    let second: PersistentCache<u32> = PersistentCache::open("twice.json", options_in(&dir));

    let mut handles = Vec::new();
    for i in 0..32u32 {
        let cache = if i % 2 == 0 { first.clone() } else { second.clone() };
        handles.push(tokio::spawn(async move {
            cache.set(&format!("key-{i}"), i).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // whichever handle wrote last, the file is a complete payload
    let path = dir.path().join("twice.json");
    let on_disk = load_payload::<u32>(&path).await;
    assert!(!on_disk.is_empty());
    assert!(on_disk.iter().all(|(key, entry)| *key == format!("key-{}", entry.value)));
    let names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, ["twice.json"]);
}

#[tokio::test]
async fn concurrent_writers_all_land_on_disk() {
    let dir = TempDir::new().unwrap();
    let cache: PersistentCache<usize> = PersistentCache::open("concurrent.json", options_in(&dir));

    let mut handles = Vec::new();
    for i in 0..16 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            cache.set(&format!("key-{i}"), i).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let reopened: PersistentCache<usize> =
        PersistentCache::open("concurrent.json", options_in(&dir));
    assert_eq!(reopened.len().await, 16);
}

#[tokio::test]
async fn concurrent_first_access_sees_loaded_entries() {
    let dir = TempDir::new().unwrap();
    {
        let cache: PersistentCache<u32> = PersistentCache::open("shared.json", options_in(&dir));
        cache.set("k", 42).await.unwrap();
    }

    let cache: PersistentCache<u32> = PersistentCache::open("shared.json", options_in(&dir));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move { cache.get_value("k").await }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), Some(42));
    }
}
