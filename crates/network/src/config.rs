use core::time::Duration;

use multiaddr::Multiaddr;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 6600;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct NetworkConfig {
    pub listen: Vec<Multiaddr>,

    /// Peers dialed at startup; each address must end in `/p2p/<peer id>`.
    #[serde(default)]
    pub bootstrap: Vec<Multiaddr>,

    #[serde(
        rename = "idle_timeout_ms",
        with = "serde_duration",
        default = "default_idle_timeout"
    )]
    pub idle_timeout: Duration,
}

const fn default_idle_timeout() -> Duration {
    DEFAULT_IDLE_TIMEOUT
}

impl NetworkConfig {
    #[must_use]
    pub const fn new(listen: Vec<Multiaddr>, bootstrap: Vec<Multiaddr>) -> Self {
        Self {
            listen,
            bootstrap,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        let listen = format!("/ip4/0.0.0.0/tcp/{DEFAULT_PORT}")
            .parse()
            .map_or_else(|_| Vec::new(), |addr| vec![addr]);

        Self::new(listen, Vec::new())
    }
}

/// Durations as integer milliseconds.
pub mod serde_duration {
    use core::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
