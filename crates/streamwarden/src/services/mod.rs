//! Core services: capability probing, command synthesis, process
//! supervision, observation, and the operator-facing API.

pub mod channel_service;
pub mod command_builder;
pub mod events;
pub mod fanout;
pub mod health;
pub mod hwaccel;
pub mod log_persister;
pub mod media_paths;
pub mod media_prober;
pub mod process_stats;
pub mod progress;
pub mod supervisor;

pub use channel_service::ChannelService;
pub use command_builder::{BuiltCommand, CommandBuilder};
pub use events::{ChannelEvent, EventBus};
pub use fanout::SubscriptionManager;
pub use health::HealthMonitor;
pub use hwaccel::HwAccelProbe;
pub use log_persister::LogPersister;
pub use media_paths::MediaPaths;
pub use media_prober::MediaProber;
pub use process_stats::ProcessStatsCollector;
pub use progress::ProgressParser;
pub use supervisor::{ChannelSupervisor, ProcessSlot};
