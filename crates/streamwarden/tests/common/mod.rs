//! Shared test infrastructure: a file-backed database in a temp directory,
//! stub encoder scripts, and a fully wired supervisor.
#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use uuid::Uuid;

use streamwarden::config::{DatabaseConfig, EncoderConfig, SupervisorConfig};
use streamwarden::database::{
    ChannelCreateRequest, ChannelLogRepository, ChannelRepository, Database,
};
use streamwarden::models::{Channel, EncoderParams, Output};
use streamwarden::services::{
    ChannelSupervisor, CommandBuilder, EventBus, HwAccelProbe, MediaPaths, ProgressParser,
};

pub struct Harness {
    pub database: Database,
    pub channels: ChannelRepository,
    pub logs: ChannelLogRepository,
    pub supervisor: ChannelSupervisor,
    pub events: EventBus,
    pub media_root: PathBuf,
    pub settings: SupervisorConfig,
    _tmp: TempDir,
}

/// Supervisor settings tightened for fast tests.
pub fn fast_settings() -> SupervisorConfig {
    SupervisorConfig {
        max_restart_attempts: 3,
        restart_window_secs: 60,
        auto_restart_delay_ms: 100,
        restart_pause_ms: 300,
        restarting_timeout_secs: 5,
        stop_grace_ms: 500,
        kill_wait_ms: 200,
        event_bus_capacity: 256,
    }
}

pub async fn test_database(dir: &Path) -> Database {
    let config = DatabaseConfig {
        url: format!("sqlite://{}", dir.join("test.db").display()),
        max_connections: 5,
    };
    let database = Database::connect(&config).await.expect("connect database");
    database.migrate().await.expect("run migrations");
    database
}

/// Write an executable stub that stands in for the encoder binary.
pub fn stub_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write stub");
    let mut perms = std::fs::metadata(&path).expect("stat stub").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod stub");
    path
}

/// A stub that runs until terminated.
pub fn sleeper_stub(dir: &Path) -> PathBuf {
    stub_script(dir, "encoder-ok.sh", "exec sleep 30")
}

/// A stub that fails immediately, simulating an encoder crash.
pub fn crasher_stub(dir: &Path) -> PathBuf {
    stub_script(dir, "encoder-crash.sh", "exit 7")
}

pub async fn harness(program: &Path, settings: SupervisorConfig) -> Harness {
    let tmp = TempDir::new().expect("tempdir");
    let database = test_database(tmp.path()).await;
    let channels = ChannelRepository::new(database.pool());
    let logs = ChannelLogRepository::new(database.pool());

    let media_root = tmp.path().join("media");

    let encoder = EncoderConfig {
        program: program.display().to_string(),
        vaapi_default_device: None,
        ..EncoderConfig::default()
    };
    // keep capability probing instant: a binary that exits non-zero yields
    // an empty capability set without waiting on the probe timeout
    let probe_encoder = EncoderConfig {
        program: "false".to_string(),
        vaapi_default_device: None,
        ..EncoderConfig::default()
    };

    let events = EventBus::new(settings.event_bus_capacity);
    let supervisor = ChannelSupervisor::new(
        channels.clone(),
        CommandBuilder::new(encoder, media_root.clone()),
        Arc::new(HwAccelProbe::new(&probe_encoder)),
        Arc::new(ProgressParser::new()),
        events.clone(),
        MediaPaths::new(media_root.clone()),
        settings.clone(),
    );

    Harness {
        database,
        channels,
        logs,
        supervisor,
        events,
        media_root,
        settings,
        _tmp: tmp,
    }
}

pub fn udp_output() -> Output {
    Output::Udp {
        host: "127.0.0.1".to_string(),
        port: 5000,
        pkt_size: None,
        buffer_size: None,
        hls_program_index: None,
        map_video: None,
        map_audio: None,
        realtime: None,
    }
}

pub async fn create_channel(
    channels: &ChannelRepository,
    params: EncoderParams,
    auto_restart: bool,
) -> Channel {
    channels
        .create(ChannelCreateRequest {
            name: format!("test-{}", Uuid::new_v4()),
            input_url: "http://example.com/live.m3u8".to_string(),
            encoder_params: params,
            outputs: vec![udp_output()],
            auto_restart,
        })
        .await
        .expect("create channel")
}
