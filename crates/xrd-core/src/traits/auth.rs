//! Authentication providers

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;

use crate::error::SessionError;
use crate::types::Credentials;

/// Produces the credentials for one security protocol.
///
/// After login the server lists the protocols it accepts; the session
/// picks the first one a provider is registered for and sends the bytes
/// returned by [`AuthProvider::credentials`] in an auth request.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Protocol name as announced by the server (at most 4 bytes on the wire)
    fn protocol(&self) -> &str;

    /// Credential bytes for this protocol
    async fn credentials(
        &self,
        creds: &Credentials,
        security_info: &[u8],
    ) -> Result<Bytes, SessionError>;
}

/// The `unix` protocol: user and group names sent in clear
#[derive(Debug, Clone)]
pub struct UnixAuth {
    group: String,
}

impl UnixAuth {
    /// Provider presenting `group` as the user's group
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
        }
    }
}

impl Default for UnixAuth {
    fn default() -> Self {
        Self::new("nogroup")
    }
}

#[async_trait]
impl AuthProvider for UnixAuth {
    fn protocol(&self) -> &str {
        "unix"
    }

    async fn credentials(
        &self,
        creds: &Credentials,
        _security_info: &[u8],
    ) -> Result<Bytes, SessionError> {
        if creds.username.is_empty() {
            return Err(SessionError::Auth("unix: empty user name".into()));
        }
        let mut out = BytesMut::new();
        out.put_slice(b"unix\0");
        out.put_slice(creds.username.as_bytes());
        out.put_u8(b' ');
        out.put_slice(self.group.as_bytes());
        out.put_u8(0);
        Ok(out.freeze())
    }
}

/// First provider matching a protocol offered by the server
pub fn select_provider(
    providers: &[Arc<dyn AuthProvider>],
    offered: &[String],
) -> Option<Arc<dyn AuthProvider>> {
    offered.iter().find_map(|name| {
        providers
            .iter()
            .find(|p| p.protocol() == name)
            .cloned()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Krb5;

    #[async_trait]
    impl AuthProvider for Krb5 {
        fn protocol(&self) -> &str {
            "krb5"
        }

        async fn credentials(&self, _: &Credentials, _: &[u8]) -> Result<Bytes, SessionError> {
            Ok(Bytes::from_static(b"ticket"))
        }
    }

    #[tokio::test]
    async fn test_unix_credentials() {
        let bytes = UnixAuth::new("staff")
            .credentials(&Credentials::new("alice"), b"&P=unix")
            .await
            .unwrap();
        assert_eq!(bytes.as_ref(), b"unix\0alice staff\0");
    }

    #[tokio::test]
    async fn test_unix_rejects_empty_user() {
        let result = UnixAuth::default()
            .credentials(&Credentials::new(""), b"")
            .await;
        assert!(matches!(result, Err(SessionError::Auth(_))));
    }

    #[test]
    fn test_select_follows_server_preference() {
        let providers: Vec<Arc<dyn AuthProvider>> = vec![Arc::new(UnixAuth::default()), Arc::new(Krb5)];

        let offered = vec!["gsi".to_string(), "krb5".to_string(), "unix".to_string()];
        let chosen = select_provider(&providers, &offered).unwrap();
        assert_eq!(chosen.protocol(), "krb5");

        assert!(select_provider(&providers, &["gsi".to_string()]).is_none());
    }
}
