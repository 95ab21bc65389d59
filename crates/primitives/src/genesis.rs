//! Genesis configuration.

use serde::{Deserialize, Serialize};

use crate::chain::MigrationContext;
use crate::hash::Hash;
use crate::params::NetworkParameters;
use crate::validator::{AccountId, Validator};

pub const DEFAULT_INITIAL_HEIGHT: i64 = 1;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct GenesisConfig {
    pub chain_id: String,
    #[serde(default = "default_initial_height")]
    pub initial_height: i64,
    /// Application hash of the genesis state.
    #[serde(default)]
    pub state_hash: Hash,
    #[serde(default)]
    pub validators: Vec<Validator>,
    #[serde(default)]
    pub alloc: Vec<GenesisAlloc>,
    #[serde(default)]
    pub network_parameters: NetworkParameters,
    #[serde(default)]
    pub migration: MigrationParams,
}

const fn default_initial_height() -> i64 {
    DEFAULT_INITIAL_HEIGHT
}

impl GenesisConfig {
    #[must_use]
    pub fn new(chain_id: String, network_parameters: NetworkParameters) -> Self {
        Self {
            chain_id,
            initial_height: DEFAULT_INITIAL_HEIGHT,
            state_hash: Hash::ZERO,
            validators: Vec::new(),
            alloc: Vec::new(),
            network_parameters,
            migration: MigrationParams::default(),
        }
    }

    #[must_use]
    pub const fn migration_context(&self) -> Option<MigrationContext> {
        MigrationContext::from_heights(self.migration.start_height, self.migration.end_height)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct MigrationParams {
    pub start_height: i64,
    pub end_height: i64,
}

impl MigrationParams {
    #[must_use]
    pub const fn new(start_height: i64, end_height: i64) -> Self {
        Self {
            start_height,
            end_height,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAlloc {
    pub id: AccountId,
    #[serde(with = "serde_amount")]
    pub amount: u128,
}

/// Amounts are decimal strings; TOML integers stop at 64 bits.
mod serde_amount {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(amount: &u128, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(amount)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u128, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::KeyType;

    #[test]
    fn test_genesis_toml_round_trip() {
        let mut genesis = GenesisConfig::new("meridian-test".to_owned(), NetworkParameters::default());
        genesis.alloc.push(GenesisAlloc {
            id: AccountId::new(vec![1; 32], KeyType::Ed25519),
            amount: u128::from(u64::MAX) * 4,
        });
        genesis.migration = MigrationParams::new(10, 20);

        let encoded = toml::to_string(&genesis).unwrap();
        let decoded: GenesisConfig = toml::from_str(&encoded).unwrap();

        assert_eq!(decoded, genesis);
        assert_eq!(
            decoded.migration_context(),
            Some(MigrationContext {
                start_height: 10,
                end_height: 20
            })
        );
    }

    #[test]
    fn test_migration_context_requires_both_heights() {
        let mut genesis = GenesisConfig::new("c".to_owned(), NetworkParameters::default());
        genesis.migration = MigrationParams::new(10, 0);

        assert_eq!(genesis.migration_context(), None);
    }

    #[test]
    fn test_minimal_genesis_uses_defaults() {
        let genesis: GenesisConfig = toml::from_str(r#"chain_id = "minimal""#).unwrap();

        assert_eq!(genesis.initial_height, DEFAULT_INITIAL_HEIGHT);
        assert_eq!(genesis.network_parameters, NetworkParameters::default());
        assert!(genesis.validators.is_empty());
    }
}
