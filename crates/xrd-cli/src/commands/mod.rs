//! xrdmux command implementations

mod config;
mod ping;
mod probe;

pub use config::{config_init, config_path, config_show, load_client_config};
pub use ping::{ping_command, run_pings, PingResult};
pub use probe::{probe_command, ProbeReport};

use anyhow::{Context, Result};

use xrd_client::{Role, Session};
use xrd_core::{ClientConfig, Credentials};

/// Open an initial session with the configured user
pub(crate) async fn open_session(addr: &str, config: &ClientConfig) -> Result<Session> {
    let creds = Credentials::new(config.username.clone());
    tracing::debug!(addr, user = %config.username, "opening session");
    Session::open(addr, &creds, config, Role::Initial)
        .await
        .with_context(|| format!("Failed to open session to {}", addr))
}
