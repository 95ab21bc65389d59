//! Leader-side proposal assembly and validator vote transactions.

use std::collections::{BTreeMap, HashMap, HashSet};

use eyre::{Result as EyreResult, WrapErr};
use meridian_primitives::hash::Hash;
use meridian_primitives::params::NetworkParameters;
use meridian_primitives::transaction::{
    PayloadType, Transaction, ValidatorVoteBodies, ValidatorVoteIds, VotableEvent,
};
use meridian_primitives::validator::AccountId;
use meridian_store::state::ReadTx;
use tracing::{debug, error, info, warn};

use crate::modules::TxBroadcaster;
use crate::BlockProcessor;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    DuplicateNonce,
    /// A vote-ID payload that does not decode.
    MalformedVoteIds,
    TooManyVotes,
    UnfundedAccount,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectedTx {
    pub tx: Transaction,
    pub reason: RejectReason,
}

/// The ordered transactions of a block proposal.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Proposal {
    pub txs: Vec<Transaction>,
    pub rejected: Vec<RejectedTx>,
}

#[derive(Debug)]
struct IndexedTx {
    position: usize,
    tx: Transaction,
    size: usize,
    hash: Hash,
}

fn max_votes(params: &NetworkParameters) -> usize {
    usize::try_from(params.max_votes_per_tx).unwrap_or(0)
}

impl BlockProcessor {
    /// Orders candidate transactions into a block proposal: per-sender nonce
    /// order, duplicates and invalid vote batches rejected, this node's own
    /// transactions first, then a vote-body transaction for pending events,
    /// then everyone else, all within the maximum block size.
    pub fn prepare_proposal(&self, candidates: Vec<Transaction>) -> EyreResult<Proposal> {
        let params = self.consensus_params();

        let mut indexed = candidates
            .into_iter()
            .enumerate()
            .map(|(position, tx)| {
                Ok(IndexedTx {
                    position,
                    size: tx.serialized_size()?,
                    hash: tx.hash()?,
                    tx,
                })
            })
            .collect::<EyreResult<Vec<_>>>()?;

        // Nonce-sort each sender's transactions within the slots that sender
        // already occupies, so other senders keep their positions.
        let mut groups: BTreeMap<Vec<u8>, Vec<usize>> = BTreeMap::new();
        for (slot, item) in indexed.iter().enumerate() {
            groups.entry(item.tx.sender.clone()).or_default().push(slot);
        }

        let mut slots: Vec<Option<IndexedTx>> = indexed.drain(..).map(Some).collect();
        for group in groups.values() {
            let mut members: Vec<IndexedTx> =
                group.iter().filter_map(|slot| slots[*slot].take()).collect();
            members.sort_by_key(|item| item.tx.body.nonce);

            for (slot, item) in group.iter().zip(members) {
                slots[*slot] = Some(item);
            }
        }
        let ordered: Vec<IndexedTx> = slots.into_iter().flatten().collect();

        let read = self.store.begin_read();

        let own_sender = self.signer.public_key();
        let own_auth = self.signer.authenticator().tag();

        let mut rejected = Vec::new();
        let mut last_nonce: HashMap<Vec<u8>, u64> = HashMap::new();
        let mut proposer_nonce = 0_u64;
        let (mut own, mut others) = (Vec::new(), Vec::new());

        for item in ordered {
            let nonce = item.tx.body.nonce;

            if last_nonce.get(&item.tx.sender) == Some(&nonce) {
                warn!(tx = %item.hash, position = item.position, nonce, "Transaction has a duplicate nonce");
                rejected.push(RejectedTx {
                    tx: item.tx,
                    reason: RejectReason::DuplicateNonce,
                });
                continue;
            }

            if item.tx.body.payload_type == PayloadType::ValidatorVoteIds {
                match item.tx.decode_payload::<ValidatorVoteIds>() {
                    Err(err) => {
                        warn!(tx = %item.hash, %err, "Dropping voteID tx: failed to decode");
                        rejected.push(RejectedTx {
                            tx: item.tx,
                            reason: RejectReason::MalformedVoteIds,
                        });
                        continue;
                    }
                    Ok(ids) if ids.resolution_ids.len() > max_votes(&params) => {
                        warn!(
                            tx = %item.hash,
                            votes = ids.resolution_ids.len(),
                            max_votes = params.max_votes_per_tx,
                            "Dropping voteID tx: exceeds max votes per tx"
                        );
                        rejected.push(RejectedTx {
                            tx: item.tx,
                            reason: RejectReason::TooManyVotes,
                        });
                        continue;
                    }
                    Ok(_) => {}
                }
            }

            if params.gas_enabled() {
                let key_type = match item.tx.authenticator() {
                    Ok(auth) => auth.key_type(),
                    Err(err) => {
                        error!(tx = %item.hash, %err, "Failed to get sender info");
                        continue;
                    }
                };

                let id = AccountId::new(item.tx.sender.clone(), key_type);
                let account = match self.modules.txapp.account_info(&read, &id, false) {
                    Ok(account) => account,
                    Err(err) => {
                        error!(tx = %item.hash, %err, "Failed to get account info");
                        continue;
                    }
                };

                if account.is_unfunded() {
                    warn!(account = %id, "Dropping tx from unfunded account while preparing the block");
                    rejected.push(RejectedTx {
                        tx: item.tx,
                        reason: RejectReason::UnfundedAccount,
                    });
                    continue;
                }
            }

            let _prev = last_nonce.insert(item.tx.sender.clone(), nonce);

            let is_own = item.tx.sender == own_sender
                && item
                    .tx
                    .signature
                    .as_ref()
                    .is_some_and(|sig| sig.auth_type == own_auth);

            if is_own {
                proposer_nonce = nonce;
                own.push(item);
            } else {
                others.push(item);
            }
        }

        let mut remaining = usize::try_from(params.max_block_size).unwrap_or(0);
        let mut txs = Vec::with_capacity(own.len().saturating_add(others.len()).saturating_add(1));

        for item in own {
            if item.size > remaining {
                break;
            }
            remaining = remaining.saturating_sub(item.size);
            txs.push(item.tx);
        }

        if let Some(vote_body) = self
            .prepare_vote_body_tx(&read, &params, proposer_nonce, remaining)
            .wrap_err("failed to prepare validator vote body transaction")?
        {
            remaining = remaining.saturating_sub(vote_body.serialized_size()?);
            txs.push(vote_body);
        }

        // A sender whose transaction does not fit is skipped from then on, since
        // its later nonces would be invalid without it.
        let mut skipped: HashSet<Vec<u8>> = HashSet::new();
        for item in others {
            if skipped.contains(&item.tx.sender) {
                continue;
            }

            if item.size > remaining {
                let _new = skipped.insert(item.tx.sender.clone());
                continue;
            }

            remaining = remaining.saturating_sub(item.size);
            txs.push(item.tx);
        }

        Ok(Proposal { txs, rejected })
    }

    /// Whether there are events awaiting resolution.
    pub fn has_events(&self) -> EyreResult<bool> {
        let read = self.store.begin_read();

        Ok(!self.modules.events.get_events(&read)?.is_empty())
    }

    fn vote_body_tx(
        &self,
        events: Vec<VotableEvent>,
        nonce: u64,
        fee: Option<u128>,
    ) -> EyreResult<Transaction> {
        let mut tx = Transaction::new(
            &ValidatorVoteBodies { events },
            self.chain_id(),
            nonce,
        )?;
        if let Some(fee) = fee {
            tx.body.fee = fee;
        }
        tx.sign(&self.signer)?;
        Ok(tx)
    }

    /// The leader's transaction carrying pending event bodies, or `None` when
    /// there is nothing to propose or no room for it.
    fn prepare_vote_body_tx(
        &self,
        read: &ReadTx,
        params: &NetworkParameters,
        proposer_nonce: u64,
        max_size: usize,
    ) -> EyreResult<Option<Transaction>> {
        let id = AccountId::new(self.signer.public_key(), self.signer.key_type());
        let account = self.modules.txapp.account_info(read, &id, false)?;

        let nonce = if proposer_nonce == 0 {
            u64::try_from(account.nonce).unwrap_or(0)
        } else {
            proposer_nonce
        };

        let mut events = self.modules.events.get_events(read)?;

        if events.is_empty() {
            debug!("No events to propose for voting");
            return Ok(None);
        }

        if params.gas_enabled() && account.is_unfunded() {
            debug!("Leader account has no balance, not allowed to propose any transactions");
            return Ok(None);
        }

        events.truncate(max_votes(params));
        let candidates = events.len();

        let empty_size = self
            .vote_body_tx(Vec::new(), 0, None)?
            .serialized_size()?;
        let mut available = max_size.saturating_sub(empty_size);

        let mut selected = Vec::new();
        let mut event_size = 0;

        for event in events {
            event_size = event.encoded_size();
            if event_size > available {
                debug!(available, event_size, "Reached maximum proposer tx size");
                break;
            }
            available = available.saturating_sub(event_size);
            selected.push(event);
        }

        if selected.is_empty() {
            warn!(
                available,
                candidates,
                max_votes = params.max_votes_per_tx,
                event_size,
                "Found events to propose, but cannot fit them in a block"
            );
            return Ok(None);
        }

        let chain = self.chain_context();
        let next_nonce = nonce.saturating_add(1);

        loop {
            let mut tx = self.vote_body_tx(selected.clone(), next_nonce, None)?;
            let fee = self.modules.txapp.price(read, &tx, &chain)?;
            tx = self.vote_body_tx(selected.clone(), next_nonce, Some(fee))?;

            // Signature lengths vary by scheme, so the estimate can be off by a
            // few bytes.
            if tx.serialized_size()? <= max_size {
                info!(events = selected.len(), nonce = next_nonce, fee, "Created a ValidatorVoteBody transaction");
                return Ok(Some(tx));
            }

            let _dropped = selected.pop();
            if selected.is_empty() {
                return Ok(None);
            }
        }
    }

    /// A vote-ID transaction for the events this validator observed but has
    /// not voted on, with the ids it covers. `None` on the leader, on
    /// non-validators, and when there is nothing to vote on or no balance for
    /// the fee.
    pub fn prepare_vote_id_tx(&self) -> EyreResult<Option<(Transaction, Vec<Hash>)>> {
        let params = self.consensus_params();
        let own_key = self.signer.public_key();

        if own_key == params.leader {
            debug!("Leader node is not allowed to propose voteID transactions");
            return Ok(None);
        }

        let key_type = self.signer.key_type();
        let is_validator = self
            .get_validators()
            .iter()
            .any(|v| v.identifier == own_key && v.key_type == key_type);

        if !is_validator {
            debug!("Sentry node is not allowed to propose voteID transactions");
            return Ok(None);
        }

        let mut ids = self.modules.events.unbroadcasted_events()?;
        if ids.is_empty() {
            debug!("No voteIDs to broadcast");
            return Ok(None);
        }
        ids.truncate(max_votes(&params));

        let read = self.store.begin_read();
        let id = AccountId::new(own_key, key_type);
        let account = self.modules.txapp.account_info(&read, &id, true)?;

        let nonce = u64::try_from(account.nonce).unwrap_or(0).saturating_add(1);
        let mut tx = Transaction::new(
            &ValidatorVoteIds {
                resolution_ids: ids.clone(),
            },
            self.chain_id(),
            nonce,
        )?;

        let fee = self
            .modules
            .txapp
            .price(&read, &tx, &self.chain_context())?;
        tx.body.fee = fee;

        if account.balance < fee {
            warn!(balance = account.balance, fee, "Skipping voteID broadcast: not enough balance to pay for the tx fee");
            return Ok(None);
        }

        tx.sign(&self.signer)?;

        Ok(Some((tx, ids)))
    }

    pub(crate) async fn broadcast_vote_id_tx(
        &self,
        broadcaster: &dyn TxBroadcaster,
    ) -> EyreResult<()> {
        let Some((tx, ids)) = self.prepare_vote_id_tx()? else {
            return Ok(());
        };

        let hash = broadcaster.broadcast_tx(tx).await?;
        debug!(%hash, votes = ids.len(), "Broadcast voteID transaction");

        self.modules.events.mark_broadcasted(&ids)
    }
}
