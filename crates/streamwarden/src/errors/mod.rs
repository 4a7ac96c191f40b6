//! Error handling for the supervisor core.

pub mod types;

pub use types::{ErrorKind, SupervisorError, SupervisorResult};
