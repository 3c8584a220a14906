//! Logging utilities.
//!
//! The engine only talks to the `log` facade. This module wires that facade to
//! `env_logger` for binaries and tests that want output without choosing a
//! backend themselves.

mod init;

pub use init::{init_logging, LoggingConfig, GL_TARGET};
