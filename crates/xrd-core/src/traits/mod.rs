//! Core trait definitions

mod auth;

pub use auth::{select_provider, AuthProvider, UnixAuth};
