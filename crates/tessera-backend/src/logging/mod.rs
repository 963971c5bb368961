//! Logging setup.
//!
//! Everything in this crate reports through the `log` facade; this module only
//! installs `env_logger` as the sink for binaries and tools.

mod init;

pub use init::{init_logging, LoggingConfig};
