//! Lifecycle tests against real child processes: state machine discipline,
//! auto-restart with budget, concurrent control and reconciliation.

mod common;

use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::mpsc;

use common::*;
use streamwarden::database::ChannelRepository;
use streamwarden::errors::ErrorKind;
use streamwarden::models::{ChannelStatus, EncoderParams};
use streamwarden::services::{
    ChannelEvent, HealthMonitor, ProcessStatsCollector, SubscriptionManager,
};

async fn wait_for_status(
    channels: &ChannelRepository,
    id: uuid::Uuid,
    expected: ChannelStatus,
    timeout: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(Some(channel)) = channels.get(id).await {
            if channel.status == expected {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

fn drain_started(
    receiver: &mut tokio::sync::broadcast::Receiver<ChannelEvent>,
    started: &mut usize,
) {
    loop {
        match receiver.try_recv() {
            Ok(ChannelEvent::Started { .. }) => *started += 1,
            Ok(_) => {}
            Err(TryRecvError::Lagged(_)) => {}
            Err(_) => break,
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_stop_keeps_status_and_pid_consistent() {
    let tmp = TempDir::new().unwrap();
    let program = sleeper_stub(tmp.path());
    let h = harness(&program, fast_settings()).await;

    let channel = create_channel(&h.channels, EncoderParams::default(), false).await;

    h.supervisor.start(channel.id).await.unwrap();

    let running = h.channels.get(channel.id).await.unwrap().unwrap();
    assert_eq!(running.status, ChannelStatus::Running);
    let pid = running.pid.expect("running channel must carry a pid");
    assert!(streamwarden::services::supervisor::pid_alive(pid));
    assert!(h.supervisor.has_slot(channel.id).await);

    // starting a running channel is a conflict and spawns nothing new
    let err = h.supervisor.start(channel.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    let after = h.channels.get(channel.id).await.unwrap().unwrap();
    assert_eq!(after.pid, Some(pid));

    h.supervisor.stop(channel.id, false).await.unwrap();
    let stopped = h.channels.get(channel.id).await.unwrap().unwrap();
    assert_eq!(stopped.status, ChannelStatus::Stopped);
    assert_eq!(stopped.pid, None);
    assert!(!h.supervisor.has_slot(channel.id).await);
    assert!(!streamwarden::services::supervisor::pid_alive(pid));

    // stopping a stopped channel is a conflict
    let err = h.supervisor.stop(channel.id, false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unexpected_exit_restarts_within_budget_then_gives_up() {
    let tmp = TempDir::new().unwrap();
    let program = crasher_stub(tmp.path());
    let h = harness(&program, fast_settings()).await;

    let channel = create_channel(&h.channels, EncoderParams::default(), true).await;
    let mut receiver = h.events.subscribe();

    h.supervisor.start(channel.id).await.unwrap();

    // every crash schedules a fresh start until the budget is exhausted
    let mut started = 0usize;
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        drain_started(&mut receiver, &mut started);
        let current = h.channels.get(channel.id).await.unwrap().unwrap();
        if current.status == ChannelStatus::Error
            && started >= 2
            && !h.supervisor.has_slot(channel.id).await
            && !h.supervisor.is_restarting(channel.id)
        {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "auto-restart cycle did not settle (started={started})"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // give any stray attempt time to surface, then verify the cap held:
    // the initial start plus at most max_restart_attempts automatic ones
    tokio::time::sleep(Duration::from_millis(800)).await;
    drain_started(&mut receiver, &mut started);
    let max = 1 + h.settings.max_restart_attempts as usize;
    assert!(
        started <= max,
        "restart budget exceeded: {started} starts, cap {max}"
    );

    let settled = h.channels.get(channel.id).await.unwrap().unwrap();
    assert_eq!(settled.status, ChannelStatus::Error);
    assert_eq!(settled.pid, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_during_restart_aborts_at_recheck() {
    let tmp = TempDir::new().unwrap();
    let program = sleeper_stub(tmp.path());
    let h = harness(&program, fast_settings()).await;

    let channel = create_channel(&h.channels, EncoderParams::default(), false).await;
    let mut receiver = h.events.subscribe();

    h.supervisor.start(channel.id).await.unwrap();

    let supervisor = h.supervisor.clone();
    let id = channel.id;
    let restart_task = tokio::spawn(async move { supervisor.restart(id).await });

    // let the restart pass its stop phase and enter the pause
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.supervisor.stop(channel.id, false).await.unwrap();

    restart_task.await.unwrap().unwrap();

    let settled = h.channels.get(channel.id).await.unwrap().unwrap();
    assert_eq!(settled.status, ChannelStatus::Stopped);
    assert_eq!(settled.pid, None);
    assert!(!h.supervisor.has_slot(channel.id).await);

    // only the initial spawn ever happened; the restart never re-spawned
    let mut started = 0usize;
    drain_started(&mut receiver, &mut started);
    assert_eq!(started, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_restart_is_a_conflict() {
    let tmp = TempDir::new().unwrap();
    let program = sleeper_stub(tmp.path());
    let h = harness(&program, fast_settings()).await;

    let channel = create_channel(&h.channels, EncoderParams::default(), false).await;
    h.supervisor.start(channel.id).await.unwrap();

    let supervisor = h.supervisor.clone();
    let id = channel.id;
    let first = tokio::spawn(async move { supervisor.restart(id).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let err = h.supervisor.restart(channel.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    first.await.unwrap().unwrap();
    assert!(wait_for_status(&h.channels, channel.id, ChannelStatus::Running, Duration::from_secs(5)).await);

    h.supervisor.stop(channel.id, false).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_vaapi_start_fails_fast_with_resource_error() {
    let tmp = TempDir::new().unwrap();
    let program = sleeper_stub(tmp.path());
    let h = harness(&program, fast_settings()).await;

    let params = EncoderParams {
        video_codec: Some("h264_vaapi".to_string()),
        gpu_index: Some(60),
        ..EncoderParams::default()
    };
    let channel = create_channel(&h.channels, params, false).await;

    let err = h.supervisor.start(channel.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);

    // the failure happened before any process was spawned
    assert!(!h.supervisor.has_slot(channel.id).await);
    let settled = h.channels.get(channel.id).await.unwrap().unwrap();
    assert_eq!(settled.status, ChannelStatus::Error);
    assert_eq!(settled.pid, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_spawn_failure_marks_channel_error() {
    let tmp = TempDir::new().unwrap();
    let program = tmp.path().join("does-not-exist");
    let h = harness(&program, fast_settings()).await;

    let channel = create_channel(&h.channels, EncoderParams::default(), false).await;

    let err = h.supervisor.start(channel.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Spawn);

    let settled = h.channels.get(channel.id).await.unwrap().unwrap();
    assert_eq!(settled.status, ChannelStatus::Error);
    assert_eq!(settled.pid, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_health_pass_corrects_divergence() {
    let tmp = TempDir::new().unwrap();
    let program = sleeper_stub(tmp.path());
    let h = harness(&program, fast_settings()).await;

    let health = HealthMonitor::new(
        h.supervisor.clone(),
        h.channels.clone(),
        Duration::from_secs(30),
    );

    // running with a dead pid becomes an error
    let dead = create_channel(&h.channels, EncoderParams::default(), false).await;
    h.channels
        .set_status_and_pid(dead.id, ChannelStatus::Running, Some(4_000_000))
        .await
        .unwrap();

    // running with no pid at all is a torn record, corrected to stopped
    let torn = create_channel(&h.channels, EncoderParams::default(), false).await;
    h.channels
        .set_status_and_pid(torn.id, ChannelStatus::Running, None)
        .await
        .unwrap();

    health.run_once().await.unwrap();

    let dead = h.channels.get(dead.id).await.unwrap().unwrap();
    assert_eq!(dead.status, ChannelStatus::Error);
    assert_eq!(dead.pid, None);

    let torn = h.channels.get(torn.id).await.unwrap().unwrap();
    assert_eq!(torn.status, ChannelStatus::Stopped);
    assert_eq!(torn.pid, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_health_pass_revives_auto_restart_channel() {
    let tmp = TempDir::new().unwrap();
    let program = sleeper_stub(tmp.path());
    let h = harness(&program, fast_settings()).await;

    let health = HealthMonitor::new(
        h.supervisor.clone(),
        h.channels.clone(),
        Duration::from_secs(30),
    );

    let channel = create_channel(&h.channels, EncoderParams::default(), true).await;
    h.channels
        .set_status_and_pid(channel.id, ChannelStatus::Running, Some(4_000_000))
        .await
        .unwrap();

    health.run_once().await.unwrap();

    // the dead process is reported, then a delayed fresh start follows
    assert!(
        wait_for_status(
            &h.channels,
            channel.id,
            ChannelStatus::Running,
            Duration::from_secs(5)
        )
        .await,
        "channel was not revived"
    );
    let revived = h.channels.get(channel.id).await.unwrap().unwrap();
    let pid = revived.pid.expect("revived channel must carry a pid");
    assert!(streamwarden::services::supervisor::pid_alive(pid));

    h.supervisor.stop(channel.id, false).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fanout_pushes_snapshots_until_unfollow() {
    let tmp = TempDir::new().unwrap();
    let program = sleeper_stub(tmp.path());
    let h = harness(&program, fast_settings()).await;

    let channel = create_channel(&h.channels, EncoderParams::default(), false).await;
    h.supervisor.start(channel.id).await.unwrap();

    let fanout = SubscriptionManager::new(
        h.supervisor.clone(),
        h.channels.clone(),
        ProcessStatsCollector::new(),
        Duration::from_millis(100),
    );

    let (tx, mut rx) = mpsc::channel(16);
    fanout
        .follow_channel("viewer-1", channel.id, tx)
        .await
        .unwrap();
    assert_eq!(fanout.active_follows(), 1);

    let snapshot = tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("snapshot cadence")
        .expect("snapshot");
    assert_eq!(snapshot.channel.id, channel.id);
    assert_eq!(snapshot.channel.status, ChannelStatus::Running);
    let process = snapshot.process.expect("live process info");
    assert_eq!(Some(process.pid), snapshot.channel.pid);

    fanout.unfollow("viewer-1", Some(channel.id));
    assert_eq!(fanout.active_follows(), 0);

    // follow-all delivers per-channel snapshots and disconnect drains it
    let (tx, mut rx) = mpsc::channel(16);
    fanout.follow_all("viewer-2", tx).await.unwrap();
    let snapshot = tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("snapshot cadence")
        .expect("snapshot");
    assert_eq!(snapshot.channel.id, channel.id);
    fanout.disconnect("viewer-2");
    assert_eq!(fanout.active_follows(), 0);

    h.supervisor.stop(channel.id, false).await.unwrap();

    // unknown channels cannot be followed
    let (tx, _rx) = mpsc::channel(4);
    let err = fanout
        .follow_channel("viewer-3", uuid::Uuid::new_v4(), tx)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_terminates_children() {
    let tmp = TempDir::new().unwrap();
    let program = sleeper_stub(tmp.path());
    let h = harness(&program, fast_settings()).await;

    let a = create_channel(&h.channels, EncoderParams::default(), false).await;
    let b = create_channel(&h.channels, EncoderParams::default(), false).await;
    h.supervisor.start(a.id).await.unwrap();
    h.supervisor.start(b.id).await.unwrap();

    let pid_a = h.channels.get(a.id).await.unwrap().unwrap().pid.unwrap();
    let pid_b = h.channels.get(b.id).await.unwrap().unwrap().pid.unwrap();

    h.supervisor.shutdown().await;

    assert!(!h.supervisor.has_slot(a.id).await);
    assert!(!h.supervisor.has_slot(b.id).await);
    assert!(!streamwarden::services::supervisor::pid_alive(pid_a));
    assert!(!streamwarden::services::supervisor::pid_alive(pid_b));
}
