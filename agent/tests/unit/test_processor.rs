//! Deployment processor tests

mod mocks;

use std::os::unix::fs::PermissionsExt;
use std::sync::atomic::Ordering;
use std::time::Duration;

use ddi_models::{Execution, FinishedResult, Progress};
use tokio_test::{assert_err, assert_ok};

use fmupdate::deploy::processor::{NO_CHUNKS_MESSAGE, PROCEEDING_MESSAGE};
use fmupdate::errors::AgentError;
use fmupdate::models::deployment::{PART_APP, PART_OS};
use fmupdate::filesys::file::File;
use fmupdate::storage::reboot::{RebootRecord, RebootStore, ROLLBACK_MESSAGE};

use mocks::{chunk, deployment, Harness, Sent};

fn app_chunk(name: &str) -> ddi_models::Chunk {
    chunk(PART_APP, name, &[("rev", "r2"), ("autostart", "1")])
}

fn os_chunk() -> ddi_models::Chunk {
    chunk(PART_OS, "fmu-image", &[("rev", "os2")])
}

#[tokio::test]
async fn test_app_deployment_success() {
    let harness = Harness::new();
    harness.ddi.add_deployment(deployment("7", vec![app_chunk("web")]));
    let mut processor = harness.processor();

    assert_ok!(processor.process("7", "res").await);

    let sent = harness.ddi.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(
        sent[0],
        Sent::Deployment {
            id: "7".to_string(),
            execution: Execution::Proceeding,
            result: FinishedResult::None,
            details: vec![PROCEEDING_MESSAGE.to_string()],
            progress: Some(Progress { cnt: 0, of: 1 }),
        }
    );

    let closed = harness.ddi.closed();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].0, "7");
    assert_eq!(closed[0].1, FinishedResult::Success);
    assert_eq!(
        closed[0].2[0],
        "All applications have been updated and correctly restarted."
    );

    assert_eq!(
        harness.store.calls(),
        vec![
            "init_container_remote web",
            "pull r2 web",
            "checkout web r2",
            "register_container web",
        ]
    );
    assert_eq!(
        harness.init.calls(),
        vec![
            "create_unit web",
            "reload",
            "start_or_remove web autostart=true autoremove=false first_install=true",
        ]
    );
    assert_eq!(processor.current_action(), None);
}

#[tokio::test]
async fn test_existing_unit_is_stopped_first() {
    let harness = Harness::new();
    harness.init.units.lock().unwrap().insert("web".to_string());
    harness.ddi.add_deployment(deployment("7", vec![app_chunk("web")]));

    assert_ok!(harness.processor().process("7", "res").await);
    let calls = harness.init.calls();
    assert_eq!(calls[0], "stop_unit web");
    assert_eq!(
        calls.last().unwrap(),
        "start_or_remove web autostart=true autoremove=false first_install=false"
    );
}

#[tokio::test]
async fn test_empty_deployment_is_rejected() {
    let harness = Harness::new();
    harness.ddi.add_deployment(deployment("8", vec![]));
    let mut processor = harness.processor();

    let err = processor.process("8", "res").await.unwrap_err();
    assert!(matches!(err, AgentError::ProtocolError(_)));

    let sent = harness.ddi.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0],
        Sent::Deployment {
            id: "8".to_string(),
            execution: Execution::Closed,
            result: FinishedResult::Failure,
            details: vec![NO_CHUNKS_MESSAGE.to_string()],
            progress: None,
        }
    );
    assert_eq!(processor.current_action(), None);
}

#[tokio::test]
async fn test_multiple_os_chunks_are_rejected() {
    let harness = Harness::new();
    harness
        .ddi
        .add_deployment(deployment("9", vec![os_chunk(), os_chunk()]));

    assert_err!(harness.processor().process("9", "res").await);

    let closed = harness.ddi.closed();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].1, FinishedResult::Failure);
    assert!(harness.store.calls().is_empty());
}

#[tokio::test]
async fn test_failed_app_is_named_in_feedback() {
    let harness = Harness::new();
    harness.store.fail("checkout");
    harness.ddi.add_deployment(deployment(
        "10",
        vec![app_chunk("web"), chunk(PART_APP, "db", &[("rev", "d1")])],
    ));

    assert_ok!(harness.processor().process("10", "res").await);

    let closed = harness.ddi.closed();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].1, FinishedResult::Failure);
    assert_eq!(closed[0].2[0], "web db failed to update and / or to restart.");
}

#[tokio::test]
async fn test_start_failure_fails_the_chunk() {
    let harness = Harness::new();
    harness.init.start_ok.store(false, Ordering::SeqCst);
    harness.ddi.add_deployment(deployment("11", vec![app_chunk("web")]));

    assert_ok!(harness.processor().process("11", "res").await);

    let closed = harness.ddi.closed();
    assert_eq!(closed[0].1, FinishedResult::Failure);
    assert!(closed[0].2.contains(&"App web v.1.0 Deployment failed".to_string()));
}

#[tokio::test]
async fn test_unknown_part_fails_the_deployment() {
    let harness = Harness::new();
    harness.ddi.add_deployment(deployment(
        "12",
        vec![chunk("firmware", "mcu", &[]), app_chunk("web")],
    ));

    assert_ok!(harness.processor().process("12", "res").await);

    let closed = harness.ddi.closed();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].1, FinishedResult::Failure);
    assert_eq!(closed[0].2[0], "mcu failed to update and / or to restart.");
    assert!(closed[0].2.iter().any(|line| line.starts_with("Chunk mcu v.1.0 rejected")));
    assert!(closed[0].2.contains(&"App web v.1.0 Deployment succeed".to_string()));
    assert!(!harness.store.calls().iter().any(|call| call.contains("mcu")));
}

#[tokio::test]
async fn test_bad_flag_fails_the_deployment() {
    let harness = Harness::new();
    harness.ddi.add_deployment(deployment(
        "13",
        vec![chunk(PART_APP, "web", &[("rev", "r2"), ("autostart", "2")])],
    ));
    let mut processor = harness.processor();

    assert_ok!(processor.process("13", "res").await);

    let closed = harness.ddi.closed();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].0, "13");
    assert_eq!(closed[0].1, FinishedResult::Failure);
    assert_eq!(closed[0].2[0], "web failed to update and / or to restart.");
    assert!(harness.store.calls().is_empty());
    assert!(harness.init.calls().is_empty());
    assert_eq!(processor.current_action(), None);
}

#[tokio::test]
async fn test_deployment_ignored_while_action_in_progress() {
    let harness = Harness::new();
    harness.store.hang.store(true, Ordering::SeqCst);
    harness.ddi.add_deployment(deployment("14", vec![app_chunk("web")]));
    harness.ddi.add_deployment(deployment("15", vec![app_chunk("db")]));
    let mut processor = harness.processor();

    // the pull never returns, leaving action 14 in flight
    let stalled =
        tokio::time::timeout(Duration::from_millis(100), processor.process("14", "res")).await;
    assert!(stalled.is_err());
    assert_eq!(processor.current_action(), Some("14"));

    let sent_before = harness.ddi.sent().len();
    let calls_before = harness.store.calls().len();
    assert_ok!(processor.process("15", "res").await);
    assert_eq!(harness.ddi.sent().len(), sent_before);
    assert_eq!(harness.store.calls().len(), calls_before);
    assert_eq!(processor.current_action(), Some("14"));

    harness.store.hang.store(false, Ordering::SeqCst);
    processor.clear_action();
    assert_ok!(processor.process("15", "res").await);
    let closed = harness.ddi.closed();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].0, "15");
}

#[tokio::test]
async fn test_os_update_defers_feedback_to_reboot() {
    let harness = Harness::new();
    harness.ddi.add_deployment(deployment("20", vec![os_chunk()]));
    let mut processor = harness.processor();

    assert_ok!(processor.process("20", "res").await);

    assert!(harness.ddi.closed().is_empty());
    assert_eq!(
        harness.store.calls(),
        vec!["pull os2 os", "stage_os os2", "clear_boot_counter"]
    );
    assert_eq!(harness.init.calls(), vec!["reboot"]);

    let record: RebootRecord = harness.reboot_store().file().read_json().await.unwrap();
    assert_eq!(record.action_id, "20");
    assert_eq!(record.execution_state, Execution::Closed);
    assert_eq!(record.result_state, FinishedResult::Success);
    assert!(record.msg.contains("OS fmu-image v.1.0 Deployment succeed"));
    assert_eq!(processor.current_action(), None);
}

#[tokio::test]
async fn test_feedback_replayed_after_reboot() {
    let harness = Harness::new();
    harness.ddi.add_deployment(deployment("21", vec![os_chunk()]));

    assert_ok!(harness.processor().process("21", "res").await);
    let pulls_before = harness.store.calls().len();

    // a fresh processor stands in for the restarted agent
    let mut restarted = harness.processor();
    assert_ok!(restarted.process("21", "res").await);

    let closed = harness.ddi.closed();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].0, "21");
    assert_eq!(closed[0].1, FinishedResult::Success);
    assert_eq!(harness.store.calls().len(), pulls_before);
    assert!(!harness.reboot_store().file().exists().await);
    assert_eq!(restarted.current_action(), None);
}

#[tokio::test]
async fn test_replay_skips_apps_listed_before_the_os() {
    let harness = Harness::new();
    harness
        .ddi
        .add_deployment(deployment("27", vec![app_chunk("web"), os_chunk()]));

    assert_ok!(harness.processor().process("27", "res").await);
    let store_calls = harness.store.calls();
    let init_calls = harness.init.calls();

    let mut restarted = harness.processor();
    assert_ok!(restarted.process("27", "res").await);

    assert_eq!(harness.store.calls(), store_calls);
    assert_eq!(harness.init.calls(), init_calls);

    let closed = harness.ddi.closed();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].0, "27");
    assert_eq!(closed[0].1, FinishedResult::Success);
    assert!(closed[0].2[0].contains("App web v.1.0 Deployment succeed"));
    assert!(closed[0].2[0].contains("OS fmu-image v.1.0 Deployment succeed"));
    assert_eq!(restarted.current_action(), None);
}

#[tokio::test]
async fn test_reboot_record_survives_write_and_take() {
    let harness = Harness::new();
    let reboot_store = harness.reboot_store();
    let record = RebootRecord::new(
        "28",
        Execution::Closed,
        FinishedResult::Success,
        "All applications have been updated and correctly restarted.\nOS fmu-image v.1.0 Deployment succeed",
    );

    assert_ok!(reboot_store.write(&record).await);
    let taken = assert_ok!(reboot_store.take("os2", harness.store.as_ref()).await);

    assert_eq!(taken, Some(record));
    assert!(!reboot_store.file().exists().await);
    assert_eq!(assert_ok!(reboot_store.take("os2", harness.store.as_ref()).await), None);
}

#[tokio::test]
async fn test_undeletable_record_is_still_returned() {
    let harness = Harness::new();
    let dir = harness.dir.path().join("locked");
    std::fs::create_dir(&dir).unwrap();
    let reboot_store = RebootStore::new(File::new(dir.join("reboot_data.json")));
    let record = RebootRecord::new("29", Execution::Closed, FinishedResult::Success, "ok");
    assert_ok!(reboot_store.write(&record).await);

    std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o500)).unwrap();
    // root ignores directory permissions
    if std::fs::write(dir.join("writable"), b"").is_ok() {
        return;
    }

    let taken = assert_ok!(reboot_store.take("os2", harness.store.as_ref()).await);
    std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700)).unwrap();

    assert_eq!(taken, Some(record));
}

#[tokio::test]
async fn test_replay_reports_rollback() {
    let harness = Harness::new();
    harness.ddi.add_deployment(deployment("22", vec![os_chunk()]));
    assert_ok!(harness.processor().process("22", "res").await);

    harness.store.rolled_back.store(true, Ordering::SeqCst);
    assert_ok!(harness.processor().process("22", "res").await);

    let closed = harness.ddi.closed();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].1, FinishedResult::Failure);
    assert_eq!(closed[0].2, vec![ROLLBACK_MESSAGE.to_string()]);
}

#[tokio::test]
async fn test_replay_keeps_record_when_feedback_fails() {
    let harness = Harness::new();
    harness.ddi.add_deployment(deployment("23", vec![os_chunk()]));
    assert_ok!(harness.processor().process("23", "res").await);

    harness.ddi.fail_closed.store(true, Ordering::SeqCst);
    assert_err!(harness.processor().process("23", "res").await);
    assert!(harness.reboot_store().file().exists().await);
}

#[tokio::test]
async fn test_os_failure_stops_the_deployment() {
    let harness = Harness::new();
    harness.store.fail("stage_os");
    harness
        .ddi
        .add_deployment(deployment("24", vec![os_chunk(), app_chunk("web")]));
    let mut processor = harness.processor();

    assert_ok!(processor.process("24", "res").await);

    let closed = harness.ddi.closed();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].1, FinishedResult::Failure);
    assert_eq!(closed[0].2, vec!["OS fmu-image v.1.0 Deployment failed".to_string()]);
    assert!(!harness.store.calls().iter().any(|call| call.contains("web")));
    assert!(harness.init.calls().is_empty());
    assert!(!harness.reboot_store().file().exists().await);
    assert_eq!(processor.current_action(), None);
}

#[tokio::test]
async fn test_os_and_apps_share_the_reboot_record() {
    let harness = Harness::new();
    harness.store.fail("checkout");
    harness
        .ddi
        .add_deployment(deployment("25", vec![app_chunk("web"), os_chunk()]));

    assert_ok!(harness.processor().process("25", "res").await);

    assert!(harness.ddi.closed().is_empty());
    let record: RebootRecord = harness.reboot_store().file().read_json().await.unwrap();
    assert_eq!(record.result_state, FinishedResult::Failure);
    assert!(record.msg.contains("web failed to update"));
    assert!(record.msg.contains("OS fmu-image v.1.0 Deployment succeed"));
}

#[tokio::test]
async fn test_reboot_failure_is_not_fatal() {
    let harness = Harness::new();
    harness.init.fail_reboot.store(true, Ordering::SeqCst);
    harness.ddi.add_deployment(deployment("26", vec![os_chunk()]));

    assert_ok!(harness.processor().process("26", "res").await);
    assert!(harness.reboot_store().file().exists().await);
}
