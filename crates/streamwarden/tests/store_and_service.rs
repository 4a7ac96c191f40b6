//! Store round-trips, log retention, and the operator service rules.

mod common;

use std::time::{Duration, Instant};

use chrono::Utc;
use tempfile::TempDir;

use common::*;
use streamwarden::database::{ChannelCreateRequest, ChannelUpdateRequest};
use streamwarden::errors::ErrorKind;
use streamwarden::models::{ChannelStatus, EncoderParams, LogLevel, Output};
use streamwarden::services::{
    ChannelEvent, ChannelService, LogPersister, MediaPaths, MediaProber, ProcessStatsCollector,
    SubscriptionManager,
};

fn service_for(h: &Harness) -> ChannelService {
    let fanout = SubscriptionManager::new(
        h.supervisor.clone(),
        h.channels.clone(),
        ProcessStatsCollector::new(),
        Duration::from_millis(500),
    );
    ChannelService::new(
        h.channels.clone(),
        h.logs.clone(),
        h.supervisor.clone(),
        fanout,
        ProcessStatsCollector::new(),
        MediaProber::new("false".to_string()),
        MediaPaths::new(h.media_root.clone()),
    )
}

#[tokio::test]
async fn test_channel_round_trip_preserves_params_and_outputs() {
    let tmp = TempDir::new().unwrap();
    let program = sleeper_stub(tmp.path());
    let h = harness(&program, fast_settings()).await;

    let params = EncoderParams {
        video_codec: Some("libx264".to_string()),
        audio_codec: Some("aac".to_string()),
        video_bitrate: Some("2500k".to_string()),
        preset: Some("veryfast".to_string()),
        gpu_index: Some(1),
        ..EncoderParams::default()
    };
    let outputs = vec![
        Output::Udp {
            host: "239.0.0.1".to_string(),
            port: 1234,
            pkt_size: Some(1316),
            buffer_size: None,
            hls_program_index: None,
            map_video: None,
            map_audio: None,
            realtime: Some(false),
        },
        Output::Hls {},
    ];

    let created = h
        .channels
        .create(ChannelCreateRequest {
            name: "sports-hd".to_string(),
            input_url: "rtsp://cam/stream".to_string(),
            encoder_params: params.clone(),
            outputs: outputs.clone(),
            auto_restart: true,
        })
        .await
        .unwrap();

    assert_eq!(created.status, ChannelStatus::Stopped);
    assert_eq!(created.pid, None);

    let loaded = h.channels.get(created.id).await.unwrap().unwrap();
    assert_eq!(loaded.name, "sports-hd");
    assert_eq!(loaded.encoder_params, params);
    assert_eq!(loaded.outputs, outputs);
    assert!(loaded.auto_restart);

    // paired status/pid update is atomic and visible
    h.channels
        .set_status_and_pid(created.id, ChannelStatus::Running, Some(1234))
        .await
        .unwrap();
    let running = h.channels.get(created.id).await.unwrap().unwrap();
    assert_eq!(running.status, ChannelStatus::Running);
    assert_eq!(running.pid, Some(1234));

    let by_status = h
        .channels
        .list_by_status(ChannelStatus::Running)
        .await
        .unwrap();
    assert_eq!(by_status.len(), 1);
    assert_eq!(by_status[0].id, created.id);

    assert!(h.channels.delete(created.id).await.unwrap());
    assert!(h.channels.get(created.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_log_retention_keeps_only_newest_entries() {
    let tmp = TempDir::new().unwrap();
    let program = sleeper_stub(tmp.path());
    let h = harness(&program, fast_settings()).await;

    let channel = create_channel(&h.channels, EncoderParams::default(), false).await;

    for i in 0..30 {
        h.logs
            .append(
                channel.id,
                if i % 2 == 0 {
                    LogLevel::Info
                } else {
                    LogLevel::Error
                },
                &format!("line {i}"),
                Utc::now(),
                10,
            )
            .await
            .unwrap();
    }

    assert_eq!(h.logs.count(channel.id).await.unwrap(), 10);

    let newest = h.logs.list(channel.id, None, 5, 0).await.unwrap();
    assert_eq!(newest.len(), 5);
    assert_eq!(newest[0].message, "line 29");
    assert_eq!(newest[4].message, "line 25");

    let next_page = h.logs.list(channel.id, None, 5, 5).await.unwrap();
    assert_eq!(next_page[0].message, "line 24");

    let errors = h
        .logs
        .list(channel.id, Some(LogLevel::Error), 50, 0)
        .await
        .unwrap();
    assert!(!errors.is_empty());
    assert!(errors.iter().all(|l| l.level == LogLevel::Error));

    assert!(h.logs.delete_for_channel(channel.id).await.unwrap() > 0);
    assert_eq!(h.logs.count(channel.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_log_persister_writes_bus_events() {
    let tmp = TempDir::new().unwrap();
    let program = sleeper_stub(tmp.path());
    let h = harness(&program, fast_settings()).await;

    let channel = create_channel(&h.channels, EncoderParams::default(), false).await;

    let _handle = LogPersister::new(h.logs.clone(), 100).spawn(&h.events);

    h.events.publish(ChannelEvent::Started {
        channel_id: channel.id,
        pid: 4242,
    });
    h.events.publish(ChannelEvent::Log {
        channel_id: channel.id,
        level: LogLevel::Warning,
        message: "deprecated option used".to_string(),
        timestamp: Utc::now(),
    });
    h.events.publish(ChannelEvent::Error {
        channel_id: channel.id,
        error: "encoder exited unexpectedly with code 1".to_string(),
    });

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if h.logs.count(channel.id).await.unwrap() >= 3 {
            break;
        }
        assert!(Instant::now() < deadline, "log persister did not catch up");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let logs = h.logs.list(channel.id, None, 10, 0).await.unwrap();
    assert_eq!(logs.len(), 3);
    assert!(logs.iter().any(|l| l.level == LogLevel::Error));
    assert!(logs.iter().any(|l| l.level == LogLevel::Warning));
    assert!(logs.iter().any(|l| l.message.contains("pid 4242")));
}

#[tokio::test]
async fn test_update_rules_depend_on_channel_state() {
    let tmp = TempDir::new().unwrap();
    let program = sleeper_stub(tmp.path());
    let h = harness(&program, fast_settings()).await;
    let service = service_for(&h);

    let channel = create_channel(&h.channels, EncoderParams::default(), false).await;

    // while stopped everything may change
    let updated = service
        .update_channel(
            channel.id,
            ChannelUpdateRequest {
                input_url: Some("http://other/stream.m3u8".to_string()),
                ..ChannelUpdateRequest::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.input_url, "http://other/stream.m3u8");

    // pretend the channel is running
    h.channels
        .set_status_and_pid(channel.id, ChannelStatus::Running, Some(std::process::id()))
        .await
        .unwrap();

    // critical fields are frozen while running
    let err = service
        .update_channel(
            channel.id,
            ChannelUpdateRequest {
                input_url: Some("http://third/stream.m3u8".to_string()),
                ..ChannelUpdateRequest::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    // name and auto_restart stay editable
    let renamed = service
        .update_channel(
            channel.id,
            ChannelUpdateRequest {
                name: Some("evening news".to_string()),
                auto_restart: Some(true),
                ..ChannelUpdateRequest::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(renamed.name, "evening news");
    assert!(renamed.auto_restart);

    // validation still applies
    let err = service
        .update_channel(
            channel.id,
            ChannelUpdateRequest {
                name: Some("   ".to_string()),
                ..ChannelUpdateRequest::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_delete_channel_implies_stop_and_cleanup() {
    let tmp = TempDir::new().unwrap();
    let program = sleeper_stub(tmp.path());
    let h = harness(&program, fast_settings()).await;
    let service = service_for(&h);

    let channel = create_channel(&h.channels, EncoderParams::default(), false).await;
    h.supervisor.start(channel.id).await.unwrap();
    let pid = h
        .channels
        .get(channel.id)
        .await
        .unwrap()
        .unwrap()
        .pid
        .unwrap();

    h.logs
        .append(channel.id, LogLevel::Info, "hello", Utc::now(), 100)
        .await
        .unwrap();

    service.delete_channel(channel.id).await.unwrap();

    assert!(h.channels.get(channel.id).await.unwrap().is_none());
    assert_eq!(h.logs.count(channel.id).await.unwrap(), 0);
    assert!(!h.supervisor.has_slot(channel.id).await);
    assert!(!streamwarden::services::supervisor::pid_alive(pid));
    assert!(!h.media_root.join(channel.id.to_string()).exists());

    let err = service.get_channel(channel.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_create_validation() {
    let tmp = TempDir::new().unwrap();
    let program = sleeper_stub(tmp.path());
    let h = harness(&program, fast_settings()).await;
    let service = service_for(&h);

    let err = service
        .create_channel(ChannelCreateRequest {
            name: String::new(),
            input_url: "http://src".to_string(),
            encoder_params: EncoderParams::default(),
            outputs: vec![udp_output()],
            auto_restart: false,
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = service
        .create_channel(ChannelCreateRequest {
            name: "no outputs".to_string(),
            input_url: "http://src".to_string(),
            encoder_params: EncoderParams::default(),
            outputs: vec![],
            auto_restart: false,
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = service.analyze_audio_tracks("  ").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_get_status_snapshot_for_stopped_channel() {
    let tmp = TempDir::new().unwrap();
    let program = sleeper_stub(tmp.path());
    let h = harness(&program, fast_settings()).await;
    let service = service_for(&h);

    let channel = create_channel(&h.channels, EncoderParams::default(), false).await;
    let snapshot = service.get_status(channel.id).await.unwrap();
    assert_eq!(snapshot.channel.id, channel.id);
    assert!(snapshot.process.is_none());
    assert!(snapshot.metrics.is_none());

    let stats = service.get_stats(channel.id).await.unwrap();
    assert_eq!(stats.pid, 0);

    let err = service.get_status(uuid::Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
