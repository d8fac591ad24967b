//! xrd-cli: the `xrdmux` command-line tool
//!
//! Opens a multiplexed session against a server to probe what it
//! negotiates or to measure concurrent pings.

pub mod commands;
pub mod output;
