//! Concurrent access to a shared coordinator and pattern store

use std::sync::Arc;
use std::thread;

use locheal_common::{
    now, Error, FailureReport, HealSource, HealingPattern, HealingStatus, RecordStore,
    SqliteStore,
};
use locheal_engine::{HealingConfig, HealingCoordinator, PatternStore, PATTERN_NAMESPACE};

const THREADS: usize = 8;

fn sqlite(dir: &tempfile::TempDir) -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open(dir.path().join("state.db")).expect("open store"))
}

/// Parallel submissions for one failure key agree on the repair, and the
/// pattern counts exactly the reuses
#[test]
fn parallel_submissions_share_one_pattern() {
    let dir = tempfile::tempdir().expect("tempdir");
    let coordinator = HealingCoordinator::new(sqlite(&dir), HealingConfig::default());

    let items: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let coordinator = &coordinator;
                s.spawn(move || {
                    let report = FailureReport::new(
                        format!("t-{i}"),
                        "checkout",
                        "waiting for selector \"#pay-now\"",
                    )
                    .with_page_url(format!("https://shop.test/cart/{i}"))
                    .with_dom(r#"<form><button data-testid="pay-now">Pay</button></form>"#);
                    coordinator.submit_failure(report).expect("submit")
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("worker thread"))
            .collect()
    });

    assert!(items.iter().all(|i| i.status == HealingStatus::Healed));
    assert!(items
        .iter()
        .all(|i| i.chosen_locator.as_deref() == Some(r#"[data-testid="pay-now"]"#)));

    let patterns = coordinator.patterns().list().expect("list");
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].page_context, "shop.test/cart/:id");

    let reuses = items
        .iter()
        .filter(|i| i.heal_source == Some(HealSource::Pattern))
        .count();
    assert_eq!(patterns[0].success_count, reuses as i64);

    let summary = coordinator.queue_summary().expect("summary");
    assert_eq!(summary.total, THREADS);
    assert_eq!(summary.healed, THREADS);
}

/// Outcomes on distinct keys never interfere with each other
#[test]
fn parallel_outcomes_on_distinct_keys() {
    let dir = tempfile::tempdir().expect("tempdir");
    let patterns = PatternStore::new(sqlite(&dir));

    let stored: Vec<_> = (0..4)
        .map(|i| {
            patterns
                .store("ui", &format!("#old-{i}"), &format!("#new-{i}"), 0.6, "app.test/")
                .expect("store")
        })
        .collect();

    thread::scope(|s| {
        for pattern in &stored {
            for _ in 0..2 {
                let patterns = &patterns;
                s.spawn(move || {
                    for _ in 0..25 {
                        patterns.record_outcome(pattern, true).expect("record");
                    }
                });
            }
        }
    });

    for i in 0..4 {
        let pattern = patterns
            .find("ui", &format!("#old-{i}"), "app.test/")
            .expect("find")
            .expect("pattern exists");
        assert_eq!(pattern.success_count, 50);
        assert!(pattern.confidence > 0.6 && pattern.confidence <= 1.0);
    }

    let stats = patterns.stats().expect("stats");
    assert_eq!(stats.patterns, 4);
    assert_eq!(stats.total_successes, 200);
}

/// Mixed successes and failures on one key: every success is counted
#[test]
fn mixed_outcomes_on_one_key() {
    let dir = tempfile::tempdir().expect("tempdir");
    let patterns = PatternStore::new(sqlite(&dir));
    let pattern = patterns
        .store("ui", "#menu", "nav [role=menu]", 0.8, "app.test/")
        .expect("store");

    thread::scope(|s| {
        for worker in 0..THREADS {
            let patterns = &patterns;
            let pattern = &pattern;
            s.spawn(move || {
                for _ in 0..10 {
                    patterns
                        .record_outcome(pattern, worker % 2 == 0)
                        .expect("record");
                }
            });
        }
    });

    let stored = patterns
        .find("ui", "#menu", "app.test/")
        .expect("find")
        .expect("pattern exists");
    assert_eq!(stored.success_count, (THREADS as i64 / 2) * 10);
    assert!((0.0..=1.0).contains(&stored.confidence));
}

/// Retention sweeps while outcomes land on fresh and stale patterns:
/// fresh patterns keep every success and every stored record decodes
#[test]
fn cleanup_races_with_outcomes() {
    const ROUNDS: usize = 25;

    let dir = tempfile::tempdir().expect("tempdir");
    let store = sqlite(&dir);
    let patterns = PatternStore::new(store.clone());

    let store_pattern = |prefix: &str, i: usize| {
        patterns
            .store(
                "ui",
                &format!("#{prefix}-{i}"),
                &format!("[data-testid=\"{prefix}-{i}\"]"),
                0.6,
                "app.test/",
            )
            .expect("store")
    };
    let fresh: Vec<HealingPattern> = (0..3).map(|i| store_pattern("fresh", i)).collect();
    let stale: Vec<HealingPattern> = (0..3).map(|i| store_pattern("stale", i)).collect();

    let long_ago = now() - 90 * 86_400;
    for record in store.list(PATTERN_NAMESPACE).expect("list records") {
        let pattern: HealingPattern = record.decode().expect("decode");
        if pattern.original_locator.starts_with("#stale") {
            store
                .put(PATTERN_NAMESPACE, &record.key, &record.value, long_ago)
                .expect("age record");
        }
    }

    thread::scope(|s| {
        s.spawn(|| {
            for _ in 0..ROUNDS * 2 {
                patterns.cleanup(30).expect("cleanup");
            }
        });

        for _ in 0..THREADS {
            s.spawn(|| {
                for round in 0..ROUNDS {
                    for pattern in &fresh {
                        patterns
                            .record_outcome(pattern, round % 2 == 0)
                            .expect("fresh outcome");
                        patterns
                            .find("ui", &pattern.original_locator, "app.test/")
                            .expect("decode fresh")
                            .expect("fresh pattern survives cleanup");
                    }
                    for pattern in &stale {
                        match patterns.record_outcome(pattern, true) {
                            Ok(updated) => assert!((0.0..=1.0).contains(&updated.confidence)),
                            Err(Error::NotFound { .. }) => {}
                            Err(e) => panic!("unexpected error on stale pattern: {e}"),
                        }
                        patterns
                            .find("ui", &pattern.original_locator, "app.test/")
                            .expect("decode stale");
                    }
                }
            });
        }
    });

    let successes = (THREADS * ((ROUNDS + 1) / 2)) as i64;
    for pattern in &fresh {
        let current = patterns
            .find("ui", &pattern.original_locator, "app.test/")
            .expect("find")
            .expect("fresh pattern");
        assert_eq!(current.success_count, successes);
        assert!((0.0..=1.0).contains(&current.confidence));
    }
    let all = patterns.list().expect("every record decodes");
    assert!(all.len() >= fresh.len());
}
