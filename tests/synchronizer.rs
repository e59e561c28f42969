//! Polling behavior under simulated time.

use sheet_inventory::config::PollSettings;
use sheet_inventory::session::SessionGateway;
use sheet_inventory::sheets::TableStore;
use sheet_inventory::{ModifiedToken, SnapshotStore, SyncState, Synchronizer};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::sleep;

mod common;
use common::{Call, FakeAuth, FakeSheets, inventory_values, remote_table};

fn setup(fake: &Arc<FakeSheets>) -> (Synchronizer, Arc<SnapshotStore>) {
    let table: Arc<dyn TableStore> = remote_table(fake);
    let store = Arc::new(SnapshotStore::new(table.clone()));
    let sync = Synchronizer::new(table, store.clone(), PollSettings::default());
    (sync, store)
}

fn reloads(fake: &FakeSheets) -> usize {
    fake.count(|c| matches!(c, Call::Get(_)))
}

fn checks(fake: &FakeSheets) -> usize {
    fake.count(|c| matches!(c, Call::Modified))
}

#[tokio::test(start_paused = true)]
async fn unchanged_token_does_not_reload() {
    let fake = FakeSheets::with_values(inventory_values());
    let (sync, store) = setup(&fake);

    sync.start();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(reloads(&fake), 1);
    assert_eq!(sync.last_known_token(), Some(ModifiedToken::new("v0")));
    assert_eq!(
        store.current().and_then(|s| s.modified().cloned()),
        Some(ModifiedToken::new("v0"))
    );

    sleep(Duration::from_secs(60)).await;
    assert_eq!(checks(&fake), 3);
    assert_eq!(reloads(&fake), 1);
}

#[tokio::test(start_paused = true)]
async fn changed_token_reloads_once() {
    let fake = FakeSheets::with_values(inventory_values());
    let (sync, _store) = setup(&fake);

    sync.start();
    sleep(Duration::from_secs(1)).await;
    fake.touch();

    sleep(Duration::from_secs(30)).await;
    assert_eq!(reloads(&fake), 2);
    assert_eq!(sync.last_known_token(), Some(ModifiedToken::new("v1")));

    sleep(Duration::from_secs(30)).await;
    assert_eq!(reloads(&fake), 2);
}

#[tokio::test(start_paused = true)]
async fn failing_checks_keep_at_most_two_outstanding() {
    let fake = FakeSheets::with_values(inventory_values());
    fake.fail_modified.store(true, Ordering::SeqCst);
    *fake.modified_latency.lock().unwrap() = Duration::from_secs(20);
    let (sync, _store) = setup(&fake);

    sync.start();
    sleep(Duration::from_secs(25)).await;
    assert_eq!(sync.state(), SyncState::BackoffWait);

    sleep(Duration::from_secs(90)).await;

    // Timer checks at 0, 30, 60 and 90, one deferred retry at 80.
    assert_eq!(checks(&fake), 5);
    assert_eq!(fake.peak_checks.load(Ordering::SeqCst), 2);
    assert_eq!(sync.peak_concurrent_checks(), 2);
    assert_eq!(reloads(&fake), 0);
    assert_eq!(sync.live_timers(), 1);
}

#[tokio::test(start_paused = true)]
async fn recovery_after_backoff_loads_table() {
    let fake = FakeSheets::with_values(inventory_values());
    fake.fail_modified.store(true, Ordering::SeqCst);
    let (sync, store) = setup(&fake);

    sync.start();
    sleep(Duration::from_secs(1)).await;
    assert!(store.current().is_none());

    fake.fail_modified.store(false, Ordering::SeqCst);
    sleep(Duration::from_secs(30)).await;
    assert_eq!(reloads(&fake), 1);
    assert!(store.current().is_some());
}

#[tokio::test(start_paused = true)]
async fn failed_reload_is_retried_on_next_tick() {
    let fake = FakeSheets::with_values(inventory_values());
    fake.fail_get.store(true, Ordering::SeqCst);
    let (sync, store) = setup(&fake);

    sync.start();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(reloads(&fake), 1);
    assert_eq!(sync.last_known_token(), None);

    fake.fail_get.store(false, Ordering::SeqCst);
    sleep(Duration::from_secs(30)).await;
    assert_eq!(reloads(&fake), 2);
    assert!(store.current().is_some());
}

#[tokio::test(start_paused = true)]
async fn pending_retry_is_inert_after_stop() {
    let fake = FakeSheets::with_values(inventory_values());
    fake.fail_modified.store(true, Ordering::SeqCst);
    let (sync, _store) = setup(&fake);

    sync.start();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(sync.state(), SyncState::BackoffWait);

    sync.stop();
    let before = checks(&fake);
    sleep(Duration::from_secs(180)).await;
    assert_eq!(checks(&fake), before);
    assert_eq!(sync.state(), SyncState::Idle);
}

#[tokio::test(start_paused = true)]
async fn session_transitions_never_leak_timers() {
    let fake = FakeSheets::with_values(inventory_values());
    let (sync, store) = setup(&fake);
    let gateway = Arc::new(SessionGateway::new(Arc::new(FakeAuth::default())));
    sync.follow_session(gateway.clone());

    let sequence = [true, true, false, true, false, false, true, true, false, true];
    for signed_in in sequence {
        if signed_in {
            gateway.sign_in("code").await.unwrap();
        } else {
            gateway.sign_out().await.unwrap();
        }
        sleep(Duration::from_millis(100)).await;

        let live = sync.live_timers();
        assert!(live <= 1, "{} timers alive", live);
        assert_eq!(live == 1, gateway.currently_signed_in());
        assert_eq!(sync.is_active(), gateway.currently_signed_in());
    }

    gateway.sign_out().await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(sync.live_timers(), 0);
    assert!(store.current().is_none());
}

#[tokio::test(start_paused = true)]
async fn rapid_transitions_settle_to_one_timer() {
    let fake = FakeSheets::with_values(inventory_values());
    let (sync, _store) = setup(&fake);
    let gateway = Arc::new(SessionGateway::new(Arc::new(FakeAuth::default())));
    sync.follow_session(gateway.clone());

    for _ in 0..10 {
        gateway.sign_in("code").await.unwrap();
        gateway.sign_out().await.unwrap();
    }
    gateway.sign_in("code").await.unwrap();
    sleep(Duration::from_secs(1)).await;

    assert_eq!(sync.live_timers(), 1);
    assert_eq!(sync.state(), SyncState::Active);
}
