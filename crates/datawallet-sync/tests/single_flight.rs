//! Concurrent callers share one physical synchronization.

mod common;

use std::sync::Arc;
use std::time::Duration;

use datawallet_sync::{BackboneError, SyncError};
use datawallet_types::SyncScope;

use common::{FakeBackbone, controller};

const OVERLAP: Duration = Duration::from_millis(50);

fn slow_backbone(version: u32) -> Arc<FakeBackbone> {
    let backbone = FakeBackbone::at_version(version);
    backbone.delay_datawallet(OVERLAP);
    backbone
}

#[tokio::test]
async fn test_same_scope_callers_share_one_run() {
    let backbone = slow_backbone(1);
    let controller = controller(backbone.clone(), 1);

    let (a, b) = tokio::join!(
        controller.sync(SyncScope::OnlyDatawallet),
        controller.sync(SyncScope::OnlyDatawallet)
    );

    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(backbone.count("get_datawallet"), 1);
    assert!(!controller.is_syncing());
}

#[tokio::test]
async fn test_datawallet_request_attaches_to_running_everything() {
    let backbone = slow_backbone(1);
    let controller = controller(backbone.clone(), 1);

    let (everything, datawallet) = tokio::join!(
        controller.sync(SyncScope::Everything),
        controller.sync(SyncScope::OnlyDatawallet)
    );

    everything.unwrap();
    datawallet.unwrap();
    assert_eq!(backbone.count("start_sync_run"), 1);
    // Version check plus the datawallet sync after NoNewEvents.
    assert_eq!(backbone.count("get_datawallet"), 2);
}

#[tokio::test]
async fn test_everything_waits_for_running_datawallet_sync() {
    let backbone = slow_backbone(1);
    let controller = controller(backbone.clone(), 1);

    let (datawallet, everything) = tokio::join!(
        controller.sync(SyncScope::OnlyDatawallet),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            controller.sync(SyncScope::Everything).await
        }
    );

    datawallet.unwrap();
    everything.unwrap();
    let calls = backbone.calls();
    assert_eq!(backbone.count("get_datawallet"), 3);
    assert_eq!(backbone.count("start_sync_run"), 1);
    // The Everything run started only after the datawallet run finished.
    let first_pull = calls
        .iter()
        .position(|c| *c == "get_datawallet_modifications")
        .unwrap();
    let run_start = calls.iter().position(|c| *c == "start_sync_run").unwrap();
    assert!(first_pull < run_start);
}

#[tokio::test]
async fn test_sequential_calls_start_fresh_runs() {
    let backbone = FakeBackbone::at_version(1);
    let controller = controller(backbone.clone(), 1);

    controller.sync(SyncScope::OnlyDatawallet).await.unwrap();
    controller.sync(SyncScope::OnlyDatawallet).await.unwrap();

    assert_eq!(backbone.count("get_datawallet"), 2);
}

#[tokio::test]
async fn test_abandoned_caller_does_not_cancel_the_run() {
    let backbone = slow_backbone(1);
    let controller = controller(backbone.clone(), 1);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(5),
        controller.sync(SyncScope::OnlyDatawallet),
    )
    .await;
    assert!(abandoned.is_err());
    assert!(controller.is_syncing());

    controller.sync(SyncScope::OnlyDatawallet).await.unwrap();

    assert_eq!(backbone.count("get_datawallet"), 1);
    assert!(!controller.is_syncing());
    assert!(
        controller
            .last_completed_sync(SyncScope::OnlyDatawallet)
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_shared_failure_reaches_every_caller() {
    let backbone = slow_backbone(1);
    backbone.fail_next("get_datawallet_modifications", BackboneError::Transport("offline".into()));
    let controller = controller(backbone.clone(), 1);

    let (a, b) = tokio::join!(
        controller.sync(SyncScope::OnlyDatawallet),
        controller.sync(SyncScope::OnlyDatawallet)
    );

    assert_eq!(a.unwrap_err(), b.unwrap_err());
    assert_eq!(backbone.count("get_datawallet"), 1);

    // The slot is free again.
    controller.sync(SyncScope::OnlyDatawallet).await.unwrap();
}

#[tokio::test]
async fn test_initialize_does_not_overlap_a_sync() {
    let backbone = slow_backbone(0);
    let controller = controller(backbone.clone(), 1);

    let (initialized, synced) = tokio::join!(
        controller.initialize_datawallet(),
        controller.sync(SyncScope::OnlyDatawallet)
    );

    initialized.unwrap();
    synced.unwrap();
    assert_eq!(backbone.count("start_sync_run"), 1);
    assert_eq!(backbone.count("finalize_datawallet_version_upgrade"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_tasks_share_one_run() {
    let backbone = slow_backbone(1);
    let controller = Arc::new(controller(backbone.clone(), 1));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let controller = controller.clone();
            tokio::spawn(async move { controller.sync(SyncScope::OnlyDatawallet).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(backbone.count("get_datawallet"), 1);
}

#[test]
fn test_sync_on_a_shut_down_runtime_fails_instead_of_hanging() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let handle = runtime.handle().clone();
    let controller = Arc::new(controller(FakeBackbone::at_version(1), 1));
    runtime.shutdown_background();

    let (tx, rx) = std::sync::mpsc::channel();
    let caller = controller.clone();
    std::thread::spawn(move || {
        let result = handle.block_on(caller.sync(SyncScope::OnlyDatawallet));
        let _ = tx.send(result);
    });

    let result = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("sync returned");
    assert!(matches!(result, Err(SyncError::Processing(_))));
    assert!(!controller.is_syncing());
}
