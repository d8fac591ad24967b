//! Serde helpers shared by configuration types

/// `Duration` stored as whole seconds, which reads naturally in TOML.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Limits {
///     #[serde(with = "xrd_core::config::serde_utils::duration_secs")]
///     connect_timeout: Duration,
/// }
/// ```
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
