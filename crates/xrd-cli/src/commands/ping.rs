//! `xrdmux ping`

use std::time::{Duration, Instant};

use anyhow::Result;
use futures::future::join_all;

use xrd_client::{Outcome, Session};
use xrd_core::ClientConfig;
use xrd_protocol::request::Ping;

use super::open_session;
use crate::output::{format_pings, print_success, print_warning};

/// Result of one ping
#[derive(Debug, Clone)]
pub struct PingResult {
    pub ok: bool,
    pub outcome: String,
    pub elapsed: Duration,
}

/// Send `count` pings concurrently over one session
pub async fn run_pings(session: &Session, count: usize) -> Vec<PingResult> {
    let pings = (0..count).map(|_| async {
        let started = Instant::now();
        let (ok, outcome) = match session.send(Ping).await {
            Ok(Outcome::Response(())) => (true, "ok".to_string()),
            Ok(Outcome::Redirect(to)) => (false, format!("redirected to {}", to)),
            Err(e) => (false, format!("error: {}", e)),
        };
        PingResult {
            ok,
            outcome,
            elapsed: started.elapsed(),
        }
    });
    join_all(pings).await
}

pub async fn ping_command(addr: &str, config: &ClientConfig, count: usize) -> Result<()> {
    let session = open_session(addr, config).await?;
    let results = run_pings(&session, count).await;
    println!("{}", format_pings(&results));

    if let Err(e) = session.close().await {
        print_warning(&format!("Close failed: {}", e));
    }

    let failed = results.iter().filter(|r| !r.ok).count();
    if failed > 0 {
        anyhow::bail!("{} of {} pings failed", failed, results.len());
    }
    print_success(&format!("{} pings to {} answered", results.len(), session.addr()));
    Ok(())
}
