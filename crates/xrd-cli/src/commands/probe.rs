//! `xrdmux probe`: log in and report what the server negotiated

use anyhow::Result;

use xrd_client::Session;
use xrd_core::ClientConfig;
use xrd_protocol::{RequestId, RequestKind, ServerType};

use super::open_session;
use crate::output::{format_probe, print_warning};

/// Requests this client can issue, as the signing policy sees them
const REQUESTS: &[(&str, RequestKind)] = &[
    (
        "ping",
        RequestKind {
            id: RequestId::PING,
            modifies: false,
        },
    ),
    (
        "read",
        RequestKind {
            id: RequestId::READ,
            modifies: false,
        },
    ),
    (
        "write",
        RequestKind {
            id: RequestId::WRITE,
            modifies: true,
        },
    ),
];

/// What a freshly opened session knows about its server
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub addr: String,
    pub server_type: String,
    pub login_id: String,
    pub protocol_version: i32,
    pub flags: u32,
    pub security_level: String,
    /// Names of the requests that must be signed
    pub signed: Vec<String>,
}

impl ProbeReport {
    pub fn from_session(session: &Session) -> Self {
        let server_type = match session.server_type() {
            ServerType::LoadBalancer => "load balancer",
            ServerType::DataServer => "data server",
        };
        let (protocol_version, flags, security_level) = match session.server_info() {
            Some(info) => (
                info.protocol_version,
                info.flags,
                format!("{:?}", info.security_level),
            ),
            None => (0, 0, "unknown".to_string()),
        };
        let signed = session
            .signing_requirements()
            .map(|reqs| {
                REQUESTS
                    .iter()
                    .filter(|(_, kind)| reqs.needed(*kind))
                    .map(|(name, _)| name.to_string())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            addr: session.addr().to_string(),
            server_type: server_type.to_string(),
            login_id: session
                .login_id()
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            protocol_version,
            flags,
            security_level,
            signed,
        }
    }
}

pub async fn probe_command(addr: &str, config: &ClientConfig) -> Result<()> {
    let session = open_session(addr, config).await?;
    let report = ProbeReport::from_session(&session);
    println!("{}", format_probe(&report));

    if let Err(e) = session.close().await {
        print_warning(&format!("Close failed: {}", e));
    }
    Ok(())
}
