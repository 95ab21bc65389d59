use core::time::Duration;
use std::fs::{read_to_string, write};

use camino::{Utf8Path, Utf8PathBuf};
use eyre::{Result as EyreResult, WrapErr};
use libp2p_identity::Keypair;
use meridian_mempool::DEFAULT_MAX_BYTES;
use meridian_network::admission::DEFAULT_QUEUE_DEPTH;
use meridian_network::config::{serde_duration, NetworkConfig};
use meridian_network::request::{Deadlines, DEFAULT_READ_TIMEOUT, DEFAULT_WRITE_TIMEOUT};
use meridian_primitives::genesis::GenesisConfig;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "config.toml";

pub const DEFAULT_ANN_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_ANN_RESP_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_BLK_GET_TIMEOUT: Duration = Duration::from_secs(90);
pub const DEFAULT_BLK_SEND_TIMEOUT: Duration = Duration::from_secs(45);
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 10;
pub const DEFAULT_TX_REANNOUNCE_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_TX_READ_LIMIT: u64 = 30_000_000;
pub const DEFAULT_BLK_READ_LIMIT: u64 = 300_000_000;
pub const DEFAULT_ANN_READ_LIMIT: usize = 1 << 20;

#[derive(Debug, Deserialize, Serialize)]
#[non_exhaustive]
pub struct NodeConfig {
    #[serde(skip)]
    pub home: Utf8PathBuf,

    #[serde(
        with = "serde_identity",
        default = "libp2p_identity::Keypair::generate_ed25519"
    )]
    pub identity: Keypair,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub mempool: MempoolConfig,

    pub genesis: GenesisConfig,
}

impl NodeConfig {
    #[must_use]
    pub fn new(home: Utf8PathBuf, identity: Keypair, genesis: GenesisConfig) -> Self {
        Self {
            home,
            identity,
            network: NetworkConfig::default(),
            sync: SyncConfig::default(),
            mempool: MempoolConfig::default(),
            genesis,
        }
    }

    #[must_use]
    pub fn exists(dir: &Utf8Path) -> bool {
        dir.join(CONFIG_FILE).is_file()
    }

    pub fn load(dir: &Utf8Path) -> EyreResult<Self> {
        let path = dir.join(CONFIG_FILE);
        let content = read_to_string(&path)
            .wrap_err_with(|| format!("failed to read configuration from {path:?}"))?;

        let mut config: Self = toml::from_str(&content)?;
        config.home = dir.to_owned();

        Ok(config)
    }

    pub fn save(&self, dir: &Utf8Path) -> EyreResult<()> {
        let path = dir.join(CONFIG_FILE);
        let content = toml::to_string_pretty(self)?;

        write(&path, content)
            .wrap_err_with(|| format!("failed to write configuration to {path:?}"))?;

        Ok(())
    }
}

/// Timeouts, limits and retry schedule of the sync protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct SyncConfig {
    #[serde(rename = "request_read_timeout_ms", with = "serde_duration")]
    pub request_read_timeout: Duration,
    #[serde(rename = "request_write_timeout_ms", with = "serde_duration")]
    pub request_write_timeout: Duration,

    #[serde(rename = "ann_write_timeout_ms", with = "serde_duration")]
    pub ann_write_timeout: Duration,
    #[serde(rename = "ann_resp_timeout_ms", with = "serde_duration")]
    pub ann_resp_timeout: Duration,

    #[serde(rename = "blk_get_timeout_ms", with = "serde_duration")]
    pub blk_get_timeout: Duration,
    #[serde(rename = "blk_send_timeout_ms", with = "serde_duration")]
    pub blk_send_timeout: Duration,

    #[serde(rename = "retry_base_delay_ms", with = "serde_duration")]
    pub retry_base_delay: Duration,
    pub retry_attempts: u32,

    #[serde(rename = "tx_reannounce_interval_ms", with = "serde_duration")]
    pub tx_reannounce_interval: Duration,

    /// Queued advertisements per peer beyond the one in flight.
    pub ann_queue_depth: usize,

    pub tx_read_limit: u64,
    pub blk_read_limit: u64,
    pub ann_read_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_read_timeout: DEFAULT_READ_TIMEOUT,
            request_write_timeout: DEFAULT_WRITE_TIMEOUT,
            ann_write_timeout: DEFAULT_ANN_WRITE_TIMEOUT,
            ann_resp_timeout: DEFAULT_ANN_RESP_TIMEOUT,
            blk_get_timeout: DEFAULT_BLK_GET_TIMEOUT,
            blk_send_timeout: DEFAULT_BLK_SEND_TIMEOUT,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            tx_reannounce_interval: DEFAULT_TX_REANNOUNCE_INTERVAL,
            ann_queue_depth: DEFAULT_QUEUE_DEPTH,
            tx_read_limit: DEFAULT_TX_READ_LIMIT,
            blk_read_limit: DEFAULT_BLK_READ_LIMIT,
            ann_read_limit: DEFAULT_ANN_READ_LIMIT,
        }
    }
}

impl SyncConfig {
    /// Serving a fixed-size request.
    #[must_use]
    pub const fn request_deadlines(&self) -> Deadlines {
        Deadlines::new(self.request_read_timeout, self.request_write_timeout)
    }

    /// Advertising to a peer: the write of the announcement and content, and
    /// the wait for its pull request.
    #[must_use]
    pub const fn ann_deadlines(&self) -> Deadlines {
        Deadlines::new(self.ann_resp_timeout, self.ann_write_timeout)
    }

    /// Advertising a block, whose content may take long to send.
    #[must_use]
    pub const fn blk_ann_deadlines(&self) -> Deadlines {
        Deadlines::new(self.ann_resp_timeout, self.blk_send_timeout)
    }

    /// Pulling a block.
    #[must_use]
    pub const fn blk_get_deadlines(&self) -> Deadlines {
        Deadlines::new(self.blk_get_timeout, self.request_write_timeout)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct MempoolConfig {
    pub max_bytes: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

/// The node key as its base58 peer id and protobuf-encoded keypair.
pub mod serde_identity {
    use core::fmt::{self, Formatter};

    use libp2p_identity::Keypair;
    use serde::de::{self, MapAccess};
    use serde::ser::{self, SerializeMap};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(key: &Keypair, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut keypair = serializer.serialize_map(Some(2))?;
        keypair.serialize_entry("peer_id", &key.public().to_peer_id().to_base58())?;
        keypair.serialize_entry(
            "keypair",
            &bs58::encode(&key.to_protobuf_encoding().map_err(ser::Error::custom)?).into_string(),
        )?;
        keypair.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Keypair, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct IdentityVisitor;

        impl<'de> de::Visitor<'de> for IdentityVisitor {
            type Value = Keypair;

            fn expecting(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
                formatter.write_str("an identity")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut peer_id = None::<String>;
                let mut priv_key = None::<String>;

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "peer_id" => peer_id = Some(map.next_value()?),
                        "keypair" => priv_key = Some(map.next_value()?),
                        _ => {
                            let _ignored = map.next_value::<de::IgnoredAny>()?;
                        }
                    }
                }

                let peer_id = peer_id.ok_or_else(|| de::Error::missing_field("peer_id"))?;
                let priv_key = priv_key.ok_or_else(|| de::Error::missing_field("keypair"))?;

                let decoded = bs58::decode(&priv_key)
                    .into_vec()
                    .map_err(de::Error::custom)?;

                let keypair = Keypair::from_protobuf_encoding(&decoded).map_err(de::Error::custom)?;

                if keypair.public().to_peer_id().to_base58() != peer_id {
                    return Err(de::Error::custom("peer id does not match the keypair"));
                }

                Ok(keypair)
            }
        }

        deserializer.deserialize_map(IdentityVisitor)
    }
}
