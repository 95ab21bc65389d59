//! The block execution state machine.
//!
//! A [`BlockProcessor`] turns the ordered transactions of an accepted block
//! into state changes and a next application hash, commits them in two
//! phases, and assembles block proposals when this node leads.

use core::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use eyre::{eyre, Result as EyreResult, WrapErr};
use meridian_primitives::auth::{KeyType, Signer};
use meridian_primitives::chain::{BlockContext, ChainContext, TxContext};
use meridian_primitives::execution::{
    BlockExecRequest, BlockExecResult, CommitRequest, TxResult, SUCCESS_LOG,
};
use meridian_primitives::genesis::GenesisConfig;
use meridian_primitives::hash::Hash;
use meridian_primitives::params::{MigrationStatus, NetworkParameters, ParamUpdates};
use meridian_primitives::transaction::{PayloadType, Transaction, ValidatorVoteBodies};
use meridian_primitives::validator::{Account, AccountId, Validator};
use meridian_store::blocks::BlockStore;
use meridian_store::meta::{get_chain_state, load_params, set_chain_state, store_params};
use meridian_store::state::PreparedTx;
use meridian_store::{is_fatal_db_error, Store};
use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::changesets::ChangesetFanout;
use crate::hashes::StateHashes;

mod changesets;
pub mod error;
mod hashes;
pub mod modules;
pub mod status;
pub mod transactions;

pub use error::ProcessorError;
pub use modules::Modules;
pub use status::BlockExecStatus;

use modules::{MigrationMetadata, PeerWhitelist, TxBroadcaster};

/// State owned by whoever holds the execution lock.
#[derive(Debug, Default)]
struct Execution {
    /// The prepared transaction of the block between `execute_block` and
    /// `commit` or `rollback`.
    consensus_tx: Option<PreparedTx>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Head {
    height: i64,
    app_hash: Hash,
}

#[derive(Default)]
struct Callbacks {
    broadcaster: Option<Arc<dyn TxBroadcaster>>,
    whitelist: Option<Arc<dyn PeerWhitelist>>,
}

pub struct BlockProcessor {
    genesis: GenesisConfig,
    signer: Signer,
    store: Store,
    modules: Modules,

    execution: Mutex<Execution>,
    chain: RwLock<ChainContext>,
    head: RwLock<Head>,
    status: RwLock<Option<BlockExecStatus>>,

    callbacks: RwLock<Callbacks>,
    subscribers: SyncMutex<Vec<mpsc::Sender<Vec<Validator>>>>,
}

impl fmt::Debug for BlockProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = *self.head.read();
        f.debug_struct("BlockProcessor")
            .field("chain_id", &self.genesis.chain_id)
            .field("height", &head.height)
            .field("app_hash", &head.app_hash)
            .finish_non_exhaustive()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}

impl BlockProcessor {
    /// Loads the chain head, recovering it first if the previous run stopped
    /// between precommit and the final head write.
    pub fn new(
        store: Store,
        blocks: &BlockStore,
        modules: Modules,
        genesis: GenesisConfig,
        signer: Signer,
    ) -> EyreResult<Self> {
        let mut tx = store.begin_tx();

        let state = get_chain_state(&tx).wrap_err("failed to get chain state")?;

        let head = match state {
            None => Head {
                height: 0,
                app_hash: Hash::ZERO,
            },
            Some(state) if state.dirty => {
                warn!(height = state.height, "Chain state is dirty, recovering");

                let Some((hash, _, commit_info)) = blocks.get_by_height(state.height)? else {
                    eyre::bail!(
                        "chain state is dirty at height {} but the block is not stored",
                        state.height
                    );
                };

                set_chain_state(&mut tx, state.height, commit_info.app_hash, false)?;
                modules
                    .migrator
                    .persist_last_changeset_height(&mut tx, state.height)?;

                info!(height = state.height, %hash, app_hash = %commit_info.app_hash, "Recovered chain state");

                Head {
                    height: state.height,
                    app_hash: commit_info.app_hash,
                }
            }
            Some(state) => Head {
                height: state.height,
                app_hash: state.app_hash,
            },
        };

        let network_parameters = match load_params(&tx)? {
            Some(params) => params,
            None => {
                debug!("Network parameters not stored yet, using the genesis parameters");
                genesis.network_parameters.clone()
            }
        };

        tx.commit().wrap_err("failed to commit the bootstrap transaction")?;

        let chain = ChainContext {
            chain_id: genesis.chain_id.clone(),
            network_parameters,
            migration: genesis.migration_context(),
            network_updates: ParamUpdates::default(),
        };

        Ok(Self {
            genesis,
            signer,
            store,
            modules,
            execution: Mutex::default(),
            chain: RwLock::new(chain),
            head: RwLock::new(head),
            status: RwLock::default(),
            callbacks: RwLock::default(),
            subscribers: SyncMutex::default(),
        })
    }

    pub fn set_callbacks(
        &self,
        broadcaster: Arc<dyn TxBroadcaster>,
        whitelist: Arc<dyn PeerWhitelist>,
    ) {
        *self.callbacks.write() = Callbacks {
            broadcaster: Some(broadcaster),
            whitelist: Some(whitelist),
        };
    }

    /// Whether the chain has been initialized from genesis.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.head.read().height > 0
    }

    #[must_use]
    pub fn height(&self) -> i64 {
        self.head.read().height
    }

    #[must_use]
    pub fn app_hash(&self) -> Hash {
        self.head.read().app_hash
    }

    #[must_use]
    pub fn chain_id(&self) -> &str {
        &self.genesis.chain_id
    }

    /// Sender key of the transactions this node signs.
    #[must_use]
    pub fn public_key(&self) -> Vec<u8> {
        self.signer.public_key()
    }

    #[must_use]
    pub fn key_type(&self) -> KeyType {
        self.signer.key_type()
    }

    #[must_use]
    pub fn consensus_params(&self) -> NetworkParameters {
        self.chain.read().network_parameters.clone()
    }

    #[must_use]
    pub fn chain_context(&self) -> ChainContext {
        self.chain.read().clone()
    }

    #[must_use]
    pub fn block_exec_status(&self) -> Option<BlockExecStatus> {
        self.status.read().clone()
    }

    #[must_use]
    pub fn get_validators(&self) -> Vec<Validator> {
        self.modules.validators.get_validators()
    }

    pub fn price(&self, tx: &Transaction) -> EyreResult<u128> {
        let read = self.store.begin_read();
        let chain = self.chain.read().clone();

        self.modules.txapp.price(&read, tx, &chain)
    }

    pub fn account_info(&self, id: &AccountId, pending: bool) -> EyreResult<Account> {
        let read = self.store.begin_read();

        self.modules.txapp.account_info(&read, id, pending)
    }

    pub fn get_migration_metadata(&self) -> EyreResult<MigrationMetadata> {
        let status = self.chain.read().network_parameters.migration_status;

        self.modules.migrator.get_migration_metadata(status)
    }

    /// A new queue receiving the validator set after every commit. A
    /// receiver that falls behind misses updates instead of stalling commits.
    pub fn subscribe_validators(&self) -> mpsc::Receiver<Vec<Validator>> {
        let (tx, rx) = mpsc::channel(1);
        self.subscribers.lock().push(tx);
        rx
    }

    fn announce_validators(&self) {
        let mut subscribers = self.subscribers.lock();

        if subscribers.is_empty() {
            return;
        }

        let validators = self.get_validators();

        subscribers.retain(|subscriber| match subscriber.try_send(validators.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Validator update channel is blocking");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Applies the genesis state. Called once, on an empty store.
    pub async fn init_chain(&self) -> Result<(i64, Hash), ProcessorError> {
        let _execution = self.execution.lock().await;

        let genesis = &self.genesis;
        let mut tx = self.store.begin_tx();

        let chain = self.chain.read().clone();

        self.modules
            .txapp
            .genesis_init(&mut tx, genesis, &chain)
            .map_err(ProcessorError::Genesis)?;

        set_chain_state(
            &mut tx,
            genesis.initial_height,
            genesis.state_hash,
            false,
        )
        .wrap_err("error storing the genesis state")
        .map_err(ProcessorError::Genesis)?;

        let params = genesis.network_parameters.clone();
        store_params(&mut tx, &params)
            .wrap_err("error storing the genesis network parameters")
            .map_err(ProcessorError::Genesis)?;

        self.modules
            .txapp
            .commit()
            .wrap_err("txapp commit failed")
            .map_err(ProcessorError::Genesis)?;

        tx.commit()
            .wrap_err("genesis transaction commit failed")
            .map_err(ProcessorError::Genesis)?;

        self.chain.write().network_parameters = params;
        *self.head.write() = Head {
            height: genesis.initial_height,
            app_hash: genesis.state_hash,
        };

        self.announce_validators();

        info!(
            height = genesis.initial_height,
            app_hash = %genesis.state_hash,
            "Initialized chain"
        );

        Ok((genesis.initial_height, genesis.state_hash))
    }

    /// Validates `tx` for mempool admission. A recheck skips the chain and
    /// signature checks already passed on first admission.
    pub fn check_tx(&self, tx: &Transaction, recheck: bool) -> Result<(), ProcessorError> {
        let chain = self.chain.read().clone();

        if chain.network_parameters.migration_status.is_halted() {
            return Err(ProcessorError::HaltedForMigration);
        }

        let tx_hash = tx.hash().map_err(eyre::Report::from)?;

        debug!(
            %tx_hash,
            recheck,
            sender = %hex::encode(&tx.sender),
            payload = %tx.body.payload_type,
            nonce = tx.body.nonce,
            fee = tx.body.fee,
            "Check transaction"
        );

        if !recheck {
            if !tx.body.chain_id.is_empty() && tx.body.chain_id != chain.chain_id {
                info!(%tx_hash, chain_id = %tx.body.chain_id, "Wrong chain ID");
                return Err(ProcessorError::WrongChainId(tx.body.chain_id.clone()));
            }

            tx.verify()?;
        }

        let authenticator = tx.authenticator()?;
        let caller = authenticator.identifier(&tx.sender)?;

        let read = self.store.begin_read();

        let proposer = chain.network_parameters.leader.clone();
        let mut block = BlockContext {
            chain_context: chain,
            height: self.height().saturating_add(1),
            timestamp_ms: now_ms(),
            proposer,
        };

        let mut ctx = TxContext {
            block: &mut block,
            tx_hash,
            signer: tx.sender.clone(),
            caller,
            authenticator,
        };

        self.modules
            .txapp
            .apply_mempool(&mut ctx, &read, tx)
            .map_err(|err| {
                info!(%tx_hash, %err, "Failed to apply the transaction to the mempool");
                ProcessorError::Admission(err)
            })
    }

    /// Executes the transactions of an accepted block inside a new prepared
    /// transaction and returns the resulting app hash. The block stays
    /// uncommitted until [`commit`](Self::commit) or
    /// [`rollback`](Self::rollback).
    pub async fn execute_block(
        &self,
        req: &BlockExecRequest,
        cancel: &CancellationToken,
    ) -> Result<BlockExecResult, ProcessorError> {
        let mut execution = self.execution.lock().await;

        self.modules
            .txapp
            .begin(req.height)
            .wrap_err("failed to begin the block execution")?;

        if execution.consensus_tx.take().is_some() {
            warn!(height = req.height, "Discarding a stale consensus transaction");
        }
        let consensus_tx = execution.consensus_tx.insert(self.store.begin_prepared());

        let chain = self.chain.read().clone();
        let prev_app_hash = self.app_hash();

        let status = chain.network_parameters.migration_status;
        let in_migration = status == MigrationStatus::MigrationInProgress;

        let is_leader = self.signer.public_key() == req.proposer;

        let mut block = BlockContext {
            chain_context: chain,
            height: req.height,
            timestamp_ms: req.block.header.timestamp_ms,
            proposer: req.proposer.clone(),
        };

        let tx_hashes = req
            .block
            .txns
            .iter()
            .map(Transaction::hash)
            .collect::<Result<Vec<_>, _>>()
            .map_err(eyre::Report::from)?;

        *self.status.write() = Some(BlockExecStatus::new(tx_hashes.clone()));

        let mut tx_results = Vec::with_capacity(req.block.txns.len());

        for (tx, tx_hash) in req.block.txns.iter().zip(&tx_hashes) {
            if cancel.is_cancelled() {
                return Err(ProcessorError::Cancelled);
            }

            let authenticator = tx
                .authenticator()
                .wrap_err("failed to get the authenticator for the block tx")?;
            let caller = authenticator
                .identifier(&tx.sender)
                .wrap_err("failed to get identifier for the block tx")?;

            let mut ctx = TxContext {
                block: &mut block,
                tx_hash: *tx_hash,
                signer: tx.sender.clone(),
                caller,
                authenticator,
            };

            let response = self.modules.txapp.execute(&mut ctx, consensus_tx, tx);

            if let Some(status) = self.status.write().as_mut() {
                status.mark_done(*tx_hash);
            }

            let log = match response.error {
                Some(err) if is_fatal_db_error(&err) => {
                    return Err(ProcessorError::FatalDb(err));
                }
                Some(err) => {
                    info!(%tx_hash, %err, "Failed to execute transaction");
                    err.to_string()
                }
                None => SUCCESS_LOG.to_owned(),
            };

            tx_results.push(TxResult {
                code: response.code,
                gas: response.gas,
                log,
            });

            if is_leader && tx.body.payload_type == PayloadType::ValidatorVoteBodies {
                let body = tx
                    .decode_payload::<ValidatorVoteBodies>()
                    .wrap_err("failed to decode validator vote body tx")?;
                self.modules.events.update_stats(body.events.len());
            }
        }

        if let Some(status) = self.status.write().as_mut() {
            status.finish();
        }

        let broadcaster = self.callbacks.read().broadcaster.clone();
        if let Some(broadcaster) = broadcaster {
            self.broadcast_vote_id_tx(&*broadcaster)
                .await
                .wrap_err("failed to broadcast the voteID transactions")?;
        }

        let finalized = self
            .modules
            .txapp
            .finalize(consensus_tx, &mut block)
            .wrap_err("failed to finalize the block execution")?;

        self.modules
            .migrator
            .notify_height(&mut block, consensus_tx)
            .wrap_err("failed to notify the migrator about the block height")?;

        let network_updates = block.chain_context.network_updates.clone();

        let mut next_params = block.chain_context.network_parameters.clone();
        next_params
            .merge_updates(&network_updates)
            .map_err(eyre::Report::from)?;

        self.chain.write().network_updates = network_updates.clone();

        // The head moves to this height but keeps the previous app hash until
        // commit writes the final one.
        set_chain_state(consensus_tx, req.height, prev_app_hash, true)
            .wrap_err("failed to set the chain state")?;
        store_params(consensus_tx, &next_params)
            .wrap_err("failed to store the network parameters")?;

        let mut fanout = ChangesetFanout::default();
        let migrator_task = in_migration.then(|| {
            let changesets = fanout.subscribe("migrator");
            let migrator = Arc::clone(&self.modules.migrator);
            let height = req.height;
            tokio::spawn(async move { migrator.store_changesets(height, changesets).await })
        });

        let (producer, forwarder) = fanout.start();

        let precommit = consensus_tx.precommit(Some(&producer)).await;
        drop(producer);

        let changeset_hash = match precommit {
            Ok(hash) => hash,
            Err(err) if is_fatal_db_error(&err) => return Err(ProcessorError::FatalDb(err)),
            Err(err) => return Err(err.wrap_err("failed to precommit the changeset").into()),
        };

        forwarder
            .await
            .map_err(|err| eyre!("changeset fan-out failed: {err}"))?;

        let mut validator_updates = self.modules.validators.validator_updates();
        let validator_updates_hash = hashes::validator_updates_hash(&mut validator_updates);

        if !validator_updates.is_empty() {
            info!(?validator_updates, "Validator updates");
        }

        self.update_peers(&validator_updates, &finalized.approved_joins, &finalized.expired_joins);

        let mut accounts = self.modules.accounts.updates();

        let state_hashes = StateHashes {
            prev_app: prev_app_hash,
            changeset: changeset_hash,
            validator_updates: validator_updates_hash,
            accounts: hashes::accounts_hash(&mut accounts),
            tx_results: hashes::tx_results_hash(&tx_results),
        };

        let app_hash = hashes::next_app_hash(&state_hashes);

        debug!(
            prev_app_hash = %state_hashes.prev_app,
            changeset_hash = %state_hashes.changeset,
            validator_updates_hash = %state_hashes.validator_updates,
            accounts_hash = %state_hashes.accounts,
            tx_results_hash = %state_hashes.tx_results,
            "App state updates"
        );

        if let Some(task) = migrator_task {
            tokio::select! {
                () = cancel.cancelled() => return Err(ProcessorError::Cancelled),
                stored = task => {
                    stored
                        .map_err(|err| eyre!("changeset storage task failed: {err}"))?
                        .wrap_err("failed to store changesets during migration")?;
                }
            }
        }

        debug!(
            height = req.height,
            block_id = %req.block_id,
            %app_hash,
            txs = req.block.txns.len(),
            "Executed block"
        );

        if !network_updates.is_empty() {
            info!(?network_updates, "Consensus updates");
        }

        Ok(BlockExecResult {
            tx_results,
            app_hash,
            validator_updates,
            param_updates: network_updates,
        })
    }

    fn update_peers(
        &self,
        validator_updates: &[Validator],
        approved_joins: &[AccountId],
        expired_joins: &[AccountId],
    ) {
        let Some(whitelist) = self.callbacks.read().whitelist.clone() else {
            return;
        };

        let local = AccountId::new(self.signer.public_key(), self.signer.key_type()).to_string();

        for validator in validator_updates {
            let node_id = validator.account_id().to_string();
            if node_id == local {
                continue;
            }

            if validator.power == 0 {
                match whitelist.remove_peer(&node_id) {
                    Ok(()) => info!(%node_id, "Removed demoted peer from the whitelist"),
                    Err(err) => warn!(%node_id, %err, "Failed to remove peer"),
                }
            } else {
                match whitelist.add_peer(&node_id) {
                    Ok(()) => info!(%node_id, "Added promoted peer to the whitelist"),
                    Err(err) => warn!(%node_id, %err, "Failed to add peer from validator updates"),
                }
            }
        }

        for id in approved_joins {
            let node_id = id.to_string();
            if node_id == local {
                continue;
            }

            match whitelist.add_peer(&node_id) {
                Ok(()) => info!(%node_id, "Added peer to the whitelist"),
                Err(err) => warn!(%node_id, %err, "Failed to add peer to the whitelist"),
            }
        }

        for id in expired_joins {
            let node_id = id.to_string();
            if node_id == local {
                continue;
            }

            match whitelist.remove_peer(&node_id) {
                Ok(()) => info!(%node_id, "Removed peer with expired join request"),
                Err(err) => warn!(%node_id, %err, "Failed to remove peer with expired join request"),
            }
        }
    }

    /// Commits the executed block and moves the head to `req.height`.
    pub async fn commit(&self, req: &CommitRequest) -> Result<(), ProcessorError> {
        let mut execution = self.execution.lock().await;

        let consensus_tx = execution
            .consensus_tx
            .as_ref()
            .ok_or(ProcessorError::NoOpenTransaction)?;

        // Kept open on failure so the same request can be retried.
        consensus_tx
            .commit()
            .wrap_err("failed to commit the consensus transaction")?;
        execution.consensus_tx = None;

        {
            let mut chain = self.chain.write();
            let updates = core::mem::take(&mut chain.network_updates);
            chain
                .network_parameters
                .merge_updates(&updates)
                .map_err(eyre::Report::from)?;
        }

        self.modules.txapp.commit().wrap_err("txapp commit failed")?;

        *self.head.write() = Head {
            height: req.height,
            app_hash: req.app_hash,
        };

        let mut tx = self.store.begin_tx();
        set_chain_state(&mut tx, req.height, req.app_hash, false)?;
        self.modules
            .migrator
            .persist_last_changeset_height(&mut tx, req.height)?;
        tx.commit().wrap_err("failed to persist the chain state")?;

        if let Err(err) = self.snapshot(req.height, req.syncing) {
            warn!(%err, height = req.height, "Failed to create snapshot of the database");
        }

        *self.status.write() = None;

        self.announce_validators();

        debug!(height = req.height, app_hash = %req.app_hash, "Committed block");

        Ok(())
    }

    fn snapshot(&self, height: i64, syncing: bool) -> EyreResult<()> {
        let snapshots = &self.modules.snapshots;

        let due = snapshots.enabled()
            && (snapshots.is_snapshot_due(height) || snapshots.list_snapshots().is_empty());

        if !due || syncing {
            return Ok(());
        }

        let view = self.store.begin_snapshot()?;
        snapshots.create_snapshot(&view, height)?;

        info!(height, snapshot_id = %view.id(), "Created snapshot");

        Ok(())
    }

    /// Discards the executing block and returns the head to (`height`,
    /// `app_hash`).
    pub async fn rollback(&self, height: i64, app_hash: Hash) -> Result<(), ProcessorError> {
        let mut execution = self.execution.lock().await;

        if let Some(tx) = execution.consensus_tx.take() {
            info!(height, "Rolling back the consensus transaction");
            tx.rollback();
        }

        *self.head.write() = Head { height, app_hash };

        let read = self.store.begin_read();
        let params = load_params(&read)
            .wrap_err("failed to load the network parameters")?
            .unwrap_or_else(|| self.genesis.network_parameters.clone());

        {
            let mut chain = self.chain.write();
            chain.network_parameters = params;
            chain.network_updates.clear();
        }

        *self.status.write() = None;

        self.modules.txapp.rollback();

        Ok(())
    }

    /// Rolls back any block left uncommitted.
    pub async fn close(&self) {
        let mut execution = self.execution.lock().await;

        if let Some(tx) = execution.consensus_tx.take() {
            info!("Rolling back the consensus transaction");
            tx.rollback();
        }
    }
}
