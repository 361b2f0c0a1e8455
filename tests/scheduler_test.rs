//! Integration tests for the cron scheduler
//!
//! These tests validate:
//! - Immediate, untracked runs for an empty cron expression
//! - Due detection, `times` accounting and removal of exhausted entries
//! - Unbounded entries
//! - Lookup and removal by key or name
//! - Concurrent passes never double-fire an entry
//! - The scheduler server loop

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use prometheus_background::builders::{Background, BackgroundBuilder};
use prometheus_background::config::{BackgroundConfig, LeaseConfig};
use prometheus_background::core::{
    CronScheduler, JobDescriptor, JobRegistry, KeyValueStore, TaskError,
};
use prometheus_background::infra::InMemoryStore;
use prometheus_background::runtime::TokioSpawner;
use prometheus_background::util::{Clock, ManualClock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// HELPERS
// ============================================================================

fn start_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 30).unwrap()
}

fn config() -> BackgroundConfig {
    let mut config = BackgroundConfig::default();
    config.dispatch.poll_interval_ms = 5;
    config.scheduler.lease = LeaseConfig::new("tasker_server", 300, 400, 40);
    config
}

fn build(store: &Arc<InMemoryStore>, clock: &Arc<ManualClock>, hits: &Arc<AtomicUsize>) -> Background {
    let mut registry = JobRegistry::new();
    let counter = hits.clone();
    registry
        .register_fn("tick", move |_ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .unwrap();
    BackgroundBuilder::new(config())
        .with_store(store.clone())
        .with_registry(registry)
        .with_clock(clock.clone())
        .build()
        .unwrap()
}

struct Fixture {
    background: Background,
    store: Arc<InMemoryStore>,
    clock: Arc<ManualClock>,
    hits: Arc<AtomicUsize>,
}

impl Fixture {
    fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let hits = Arc::new(AtomicUsize::new(0));
        let background = build(&store, &clock, &hits);
        Self {
            background,
            store,
            clock,
            hits,
        }
    }

    fn scheduler(&self) -> &CronScheduler {
        self.background.scheduler()
    }

    async fn hits_reach(&self, expected: usize) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            if self.hits.load(Ordering::SeqCst) >= expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

// ============================================================================
// ADD / RUN
// ============================================================================

#[tokio::test]
async fn test_empty_cron_runs_now_untracked() {
    let fx = Fixture::new();
    let key = fx
        .scheduler()
        .add("", JobDescriptor::named("tick"), "now", 1)
        .await
        .unwrap();

    assert_eq!(key, "");
    assert!(fx.scheduler().list().await.unwrap().is_empty());
    assert!(fx.hits_reach(1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fx.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_single_run_entry_fires_once_then_is_removed() {
    let fx = Fixture::new();
    let key = fx
        .scheduler()
        .add("* * * * *", JobDescriptor::named("tick"), "minutely", 1)
        .await
        .unwrap();

    let entry = fx.scheduler().get(&key).await.unwrap().unwrap();
    assert_eq!(entry.next, Utc.with_ymd_and_hms(2026, 3, 2, 9, 1, 0).unwrap());
    assert_eq!(entry.times, 1);
    assert!(!entry.loop_forever);

    assert_eq!(fx.scheduler().run().await.unwrap(), 0);

    fx.clock.advance(ChronoDuration::minutes(1));
    assert_eq!(fx.scheduler().run().await.unwrap(), 1);
    let entry = fx.scheduler().get(&key).await.unwrap().unwrap();
    assert_eq!(entry.times, 0);
    assert!(entry.next > fx.clock.now());
    assert!(fx.hits_reach(1).await);

    fx.clock.advance(ChronoDuration::minutes(5));
    assert_eq!(fx.scheduler().run().await.unwrap(), 0);
    assert!(fx.scheduler().get(&key).await.unwrap().is_none());
    assert_eq!(fx.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unbounded_entry_keeps_firing() {
    let fx = Fixture::new();
    let key = fx
        .scheduler()
        .add("*/5 * * * *", JobDescriptor::named("tick"), "every five", -1)
        .await
        .unwrap();

    for _ in 0..3 {
        fx.clock.advance(ChronoDuration::minutes(5));
        assert_eq!(fx.scheduler().run().await.unwrap(), 1);
    }
    let entry = fx.scheduler().get(&key).await.unwrap().unwrap();
    assert_eq!(entry.times, -1);
    assert!(entry.loop_forever);
    assert!(fx.hits_reach(3).await);
}

#[tokio::test]
async fn test_missed_fires_collapse_into_one() {
    let fx = Fixture::new();
    let key = fx
        .scheduler()
        .add("* * * * *", JobDescriptor::named("tick"), "catch-up", 10)
        .await
        .unwrap();

    fx.clock.advance(ChronoDuration::minutes(30));
    assert_eq!(fx.scheduler().run().await.unwrap(), 1);
    assert_eq!(fx.scheduler().run().await.unwrap(), 0);
    assert_eq!(fx.scheduler().get(&key).await.unwrap().unwrap().times, 9);
}

#[tokio::test]
async fn test_rejects_bad_input() {
    let fx = Fixture::new();
    let bad_cron = fx
        .scheduler()
        .add("every tuesday", JobDescriptor::named("tick"), "bad", 1)
        .await;
    assert!(matches!(bad_cron, Err(TaskError::InvalidCron(_))));

    let bad_times = fx
        .scheduler()
        .add("* * * * *", JobDescriptor::named("tick"), "zero", 0)
        .await;
    assert!(matches!(bad_times, Err(TaskError::InvalidConfig(_))));

    let bad_timeout = fx
        .scheduler()
        .add_with_timeout(
            "* * * * *",
            JobDescriptor::named("tick"),
            "hasty",
            1,
            Duration::from_millis(500),
        )
        .await;
    assert!(matches!(bad_timeout, Err(TaskError::InvalidConfig(_))));
    assert!(fx.scheduler().list().await.unwrap().is_empty());
}

// ============================================================================
// LOOKUP / REMOVAL
// ============================================================================

#[tokio::test]
async fn test_has_and_del_match_key_or_name() {
    let fx = Fixture::new();
    let scheduler = fx.scheduler();
    let first = scheduler
        .add("0 * * * *", JobDescriptor::named("tick"), "hourly", -1)
        .await
        .unwrap();
    scheduler
        .add("0 0 * * *", JobDescriptor::named("tick"), "nightly", -1)
        .await
        .unwrap();

    assert!(scheduler.has(&first).await.unwrap());
    assert!(scheduler.has("nightly").await.unwrap());
    assert!(!scheduler.has("weekly").await.unwrap());

    assert_eq!(scheduler.del("nightly").await.unwrap(), 1);
    assert_eq!(scheduler.del(&first).await.unwrap(), 1);
    assert_eq!(scheduler.del("nightly").await.unwrap(), 0);
    assert!(scheduler.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_clean_drops_the_list() {
    let fx = Fixture::new();
    fx.scheduler()
        .add("0 * * * *", JobDescriptor::named("tick"), "hourly", -1)
        .await
        .unwrap();
    assert!(fx.store.get("tasker_list").await.unwrap().is_some());

    fx.scheduler().clean().await.unwrap();
    assert_eq!(fx.store.get("tasker_list").await.unwrap(), None);
    assert!(fx.scheduler().list().await.unwrap().is_empty());
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_passes_fire_once() {
    let fx = Fixture::new();
    let other = build(&fx.store, &fx.clock, &fx.hits);
    fx.scheduler()
        .add("* * * * *", JobDescriptor::named("tick"), "shared", -1)
        .await
        .unwrap();
    fx.clock.advance(ChronoDuration::minutes(1));

    let (a, b) = tokio::join!(fx.scheduler().run(), other.scheduler().run());
    assert_eq!(a.unwrap() + b.unwrap(), 1);
    assert!(fx.hits_reach(1).await);
}

// ============================================================================
// SERVER LOOP
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_server_loop_fires_due_entries() {
    let fx = Fixture::new();
    let scheduler = fx.scheduler();
    let spawner = TokioSpawner::current().unwrap();
    scheduler
        .add("* * * * *", JobDescriptor::named("tick"), "loop", 2)
        .await
        .unwrap();
    fx.clock.advance(ChronoDuration::minutes(1));

    let server = scheduler.start(&spawner).await.unwrap().expect("lease was free");
    assert!(fx.hits_reach(1).await);

    server.stop().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), server.join())
        .await
        .expect("scheduler server exits after stop");
    assert_eq!(fx.hits.load(Ordering::SeqCst), 1);
}
