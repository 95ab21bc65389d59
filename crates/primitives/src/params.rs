//! Consensus-critical network parameters and their per-block update sets.

#[cfg(test)]
#[path = "tests/params.rs"]
mod tests;

use std::collections::btree_map::{self, BTreeMap};

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;

pub const DEFAULT_MAX_BLOCK_SIZE: i64 = 6 * 1024 * 1024;
pub const DEFAULT_JOIN_EXPIRY: i64 = 14_400;
pub const DEFAULT_VOTE_EXPIRY: i64 = 108_000;
pub const DEFAULT_MAX_VOTES_PER_TX: i64 = 200;

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MigrationStatus {
    #[default]
    NoActiveMigration,
    GenesisMigration,
    MigrationInProgress,
    MigrationCompleted,
}

impl MigrationStatus {
    const fn stage(self) -> u8 {
        match self {
            Self::NoActiveMigration | Self::GenesisMigration => 0,
            Self::MigrationInProgress => 1,
            Self::MigrationCompleted => 2,
        }
    }

    /// Whether moving from `self` to `next` keeps the status monotonic.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        let (from, to) = (self.stage(), next.stage());

        if from == 0 && to == 0 {
            return matches!(
                (self, next),
                (Self::NoActiveMigration, Self::NoActiveMigration)
                    | (Self::GenesisMigration, Self::GenesisMigration)
            );
        }

        to >= from
    }

    #[must_use]
    pub const fn is_halted(self) -> bool {
        matches!(self, Self::MigrationCompleted)
    }
}

#[derive(
    Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[serde(default)]
pub struct NetworkParameters {
    /// Public key of the leader.
    #[serde(with = "hex")]
    pub leader: Vec<u8>,
    pub max_block_size: i64,
    pub join_expiry: i64,
    pub vote_expiry: i64,
    pub disabled_gas_costs: bool,
    pub max_votes_per_tx: i64,
    pub migration_status: MigrationStatus,
}

impl Default for NetworkParameters {
    fn default() -> Self {
        Self {
            leader: Vec::new(),
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            join_expiry: DEFAULT_JOIN_EXPIRY,
            vote_expiry: DEFAULT_VOTE_EXPIRY,
            disabled_gas_costs: true,
            max_votes_per_tx: DEFAULT_MAX_VOTES_PER_TX,
            migration_status: MigrationStatus::NoActiveMigration,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParamsError {
    #[error("parameter {name} expects a {expected} value")]
    TypeMismatch {
        name: ParamName,
        expected: &'static str,
    },
    #[error("migration status cannot move from {from} to {to}")]
    MigrationRegression {
        from: MigrationStatus,
        to: MigrationStatus,
    },
    #[error("parameter {0} must be positive")]
    NotPositive(ParamName),
}

impl NetworkParameters {
    /// Applies `updates` in place. Either every update applies or none does.
    pub fn merge_updates(&mut self, updates: &ParamUpdates) -> Result<(), ParamsError> {
        let mut next = self.clone();

        for (name, value) in updates.iter() {
            next.apply(*name, value)?;
        }

        *self = next;

        Ok(())
    }

    fn apply(&mut self, name: ParamName, value: &ParamValue) -> Result<(), ParamsError> {
        match (name, value) {
            (ParamName::Leader, ParamValue::Bytes(leader)) => self.leader.clone_from(leader),
            (ParamName::MaxBlockSize, ParamValue::Int(size)) => {
                self.max_block_size = positive(name, *size)?;
            }
            (ParamName::JoinExpiry, ParamValue::Int(expiry)) => {
                self.join_expiry = positive(name, *expiry)?;
            }
            (ParamName::VoteExpiry, ParamValue::Int(expiry)) => {
                self.vote_expiry = positive(name, *expiry)?;
            }
            (ParamName::DisabledGasCosts, ParamValue::Bool(disabled)) => {
                self.disabled_gas_costs = *disabled;
            }
            (ParamName::MaxVotesPerTx, ParamValue::Int(max)) => {
                self.max_votes_per_tx = positive(name, *max)?;
            }
            (ParamName::MigrationStatus, ParamValue::Migration(status)) => {
                if !self.migration_status.can_transition_to(*status) {
                    return Err(ParamsError::MigrationRegression {
                        from: self.migration_status,
                        to: *status,
                    });
                }
                self.migration_status = *status;
            }
            (name, _) => {
                return Err(ParamsError::TypeMismatch {
                    name,
                    expected: name.value_kind(),
                })
            }
        }

        Ok(())
    }

    /// The updates that turn `old` into `new`.
    #[must_use]
    pub fn diff(old: &Self, new: &Self) -> ParamUpdates {
        let mut updates = ParamUpdates::default();

        if old.leader != new.leader {
            updates.insert(ParamName::Leader, ParamValue::Bytes(new.leader.clone()));
        }
        if old.max_block_size != new.max_block_size {
            updates.insert(ParamName::MaxBlockSize, ParamValue::Int(new.max_block_size));
        }
        if old.join_expiry != new.join_expiry {
            updates.insert(ParamName::JoinExpiry, ParamValue::Int(new.join_expiry));
        }
        if old.vote_expiry != new.vote_expiry {
            updates.insert(ParamName::VoteExpiry, ParamValue::Int(new.vote_expiry));
        }
        if old.disabled_gas_costs != new.disabled_gas_costs {
            updates.insert(
                ParamName::DisabledGasCosts,
                ParamValue::Bool(new.disabled_gas_costs),
            );
        }
        if old.max_votes_per_tx != new.max_votes_per_tx {
            updates.insert(ParamName::MaxVotesPerTx, ParamValue::Int(new.max_votes_per_tx));
        }
        if old.migration_status != new.migration_status {
            updates.insert(
                ParamName::MigrationStatus,
                ParamValue::Migration(new.migration_status),
            );
        }

        updates
    }

    #[must_use]
    pub const fn gas_enabled(&self) -> bool {
        !self.disabled_gas_costs
    }
}

const fn positive(name: ParamName, value: i64) -> Result<i64, ParamsError> {
    if value <= 0 {
        return Err(ParamsError::NotPositive(name));
    }
    Ok(value)
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumIter,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ParamName {
    Leader,
    MaxBlockSize,
    JoinExpiry,
    VoteExpiry,
    DisabledGasCosts,
    MaxVotesPerTx,
    MigrationStatus,
}

impl ParamName {
    const fn value_kind(self) -> &'static str {
        match self {
            Self::Leader => "bytes",
            Self::MaxBlockSize | Self::JoinExpiry | Self::VoteExpiry | Self::MaxVotesPerTx => {
                "integer"
            }
            Self::DisabledGasCosts => "boolean",
            Self::MigrationStatus => "migration status",
        }
    }
}

#[derive(
    Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ParamValue {
    Bytes(#[serde(with = "hex")] Vec<u8>),
    Int(i64),
    Bool(bool),
    Migration(MigrationStatus),
}

/// An ordered set of parameter changes.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ParamUpdates(BTreeMap<ParamName, ParamValue>);

impl ParamUpdates {
    pub fn insert(&mut self, name: ParamName, value: ParamValue) {
        let _prev = self.0.insert(name, value);
    }

    #[must_use]
    pub fn get(&self, name: ParamName) -> Option<&ParamValue> {
        self.0.get(&name)
    }

    /// Merges `other` into `self`, later values winning.
    pub fn merge(&mut self, other: &Self) {
        for (name, value) in &other.0 {
            self.insert(*name, value.clone());
        }
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, ParamName, ParamValue> {
        self.0.iter()
    }
}

impl FromIterator<(ParamName, ParamValue)> for ParamUpdates {
    fn from_iter<I: IntoIterator<Item = (ParamName, ParamValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
