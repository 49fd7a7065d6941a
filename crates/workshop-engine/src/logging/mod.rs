//! Logging setup.
//!
//! Everything in the engine logs through the `log` facade; binaries call
//! [`init_logging`] once to install `env_logger` as the backend.

mod init;

pub use init::{init_logging, LoggingConfig};
