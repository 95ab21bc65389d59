//! Digests folded into the next application hash.
//!
//! Every input is sorted deterministically before hashing so that equal
//! blocks over equal state hash equally on every node.

use meridian_primitives::execution::TxResult;
use meridian_primitives::hash::{Hash, Hasher};
use meridian_primitives::validator::{Account, Validator};

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct StateHashes {
    pub prev_app: Hash,
    pub changeset: Hash,
    pub validator_updates: Hash,
    pub accounts: Hash,
    pub tx_results: Hash,
}

/// `sha256(prev_app ‖ changeset ‖ validator_updates ‖ accounts ‖ tx_results)`
pub(crate) fn next_app_hash(hashes: &StateHashes) -> Hash {
    Hasher::default()
        .update(hashes.prev_app)
        .update(hashes.changeset)
        .update(hashes.validator_updates)
        .update(hashes.accounts)
        .update(hashes.tx_results)
        .finalize()
}

/// Sorts `updates` by (identifier, key type) and hashes identifier ‖ power.
pub(crate) fn validator_updates_hash(updates: &mut [Validator]) -> Hash {
    updates.sort_by(|a, b| {
        a.identifier
            .cmp(&b.identifier)
            .then(a.key_type.cmp(&b.key_type))
    });

    updates
        .iter()
        .fold(Hasher::default(), |hasher, update| {
            hasher
                .update(&update.identifier)
                .update(update.power.to_be_bytes())
        })
        .finalize()
}

pub(crate) fn accounts_hash(accounts: &mut [Account]) -> Hash {
    accounts.sort_by(|a, b| a.id.cmp(&b.id));

    accounts
        .iter()
        .fold(Hasher::default(), |hasher, account| {
            hasher
                .update(&account.id.identifier)
                .update(account.id.key_type.as_str())
                .update(account.balance.to_be_bytes())
                .update(account.nonce.to_be_bytes())
        })
        .finalize()
}

/// Results stay in execution order.
pub(crate) fn tx_results_hash(results: &[TxResult]) -> Hash {
    results
        .iter()
        .fold(Hasher::default(), |hasher, result| {
            hasher
                .update(result.code.to_be_bytes())
                .update(result.gas.to_be_bytes())
        })
        .finalize()
}
