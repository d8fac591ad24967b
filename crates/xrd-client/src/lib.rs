//! xrd-client: Multiplexed session client for XRootD-style storage servers
//!
//! A [`Session`] owns one TCP connection to a server and carries any number
//! of concurrent requests over it, each identified by a stream id. Bulk
//! data may travel on pooled data-path sub-sessions. The reader task
//! implements the server-directed control flow: partial responses,
//! errors, redirections, waits and asynchronous notifications.
//!
//! ```no_run
//! use xrd_client::{Outcome, Role, Session};
//! use xrd_core::{ClientConfig, Credentials};
//! use xrd_protocol::request::Ping;
//!
//! # async fn demo() -> Result<(), xrd_core::SessionError> {
//! let config = ClientConfig::default();
//! let creds = Credentials::new(config.username.clone());
//! let session = Session::open("root://eos.example.org", &creds, &config, Role::Initial).await?;
//! if let Outcome::Redirect(to) = session.send(Ping).await? {
//!     println!("ping redirected to {}", to);
//! }
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod mux;
pub mod session;

pub use mux::{Delivery, Mux, MuxError};
pub use session::{Outcome, Role, ServerInfo, Session};
