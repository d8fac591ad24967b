//! xrd-core: Shared abstractions and configuration for xrdmux
//!
//! This crate provides the error taxonomy, client configuration,
//! credentials and the authentication-provider seam used by the session
//! and the CLI.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::ClientConfig;
pub use error::{ConfigError, SessionError};
pub use traits::{select_provider, AuthProvider, UnixAuth};
pub use types::{normalize_addr, Credentials};
