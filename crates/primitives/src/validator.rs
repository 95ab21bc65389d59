use core::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::auth::KeyType;

#[derive(
    Clone,
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
)]
pub struct AccountId {
    #[serde(with = "hex")]
    pub identifier: Vec<u8>,
    pub key_type: KeyType,
}

impl AccountId {
    #[must_use]
    pub const fn new(identifier: Vec<u8>, key_type: KeyType) -> Self {
        Self {
            identifier,
            key_type,
        }
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", hex::encode(&self.identifier), self.key_type)
    }
}

#[derive(
    Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct Account {
    pub id: AccountId,
    pub balance: u128,
    pub nonce: i64,
}

impl Account {
    /// An account that never received funds nor sent a transaction.
    #[must_use]
    pub fn is_unfunded(&self) -> bool {
        self.nonce == 0 && self.balance == 0
    }
}

/// A validator and its voting power. A power of zero removes it.
#[derive(
    Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct Validator {
    #[serde(with = "hex")]
    pub identifier: Vec<u8>,
    pub key_type: KeyType,
    pub power: i64,
}

impl Validator {
    #[must_use]
    pub fn account_id(&self) -> AccountId {
        AccountId::new(self.identifier.clone(), self.key_type)
    }
}
