//! Data models shared across the supervisor core.

pub mod channel;
pub mod hwaccel;
pub mod metrics;

pub use channel::*;
pub use hwaccel::*;
pub use metrics::*;
