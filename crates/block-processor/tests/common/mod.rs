#![allow(dead_code, reason = "Shared between test binaries")]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use eyre::{bail, eyre, Result as EyreResult};
use meridian_block_processor::modules::{
    Accounts, EventStore, Finalized, MigrationMetadata, MigratorModule, Modules, PeerWhitelist,
    SnapshotModule, TxApp, TxBroadcaster, TxResponse, ValidatorModule,
};
use meridian_block_processor::BlockProcessor;
use meridian_primitives::auth::Signer;
use meridian_primitives::block::Block;
use meridian_primitives::chain::{BlockContext, ChainContext, TxContext};
use meridian_primitives::execution::BlockExecRequest;
use meridian_primitives::genesis::GenesisConfig;
use meridian_primitives::hash::Hash;
use meridian_primitives::params::{MigrationStatus, NetworkParameters, ParamUpdates};
use meridian_primitives::transaction::{Execute, Transaction, VotableEvent};
use meridian_primitives::validator::{Account, AccountId, Validator};
use meridian_store::blocks::BlockStore;
use meridian_store::db::Column;
use meridian_store::state::{Changeset, ReadAccess, SnapshotTx, WriteAccess};
use meridian_store::{DbError, Store};
use parking_lot::Mutex;
use tokio::sync::mpsc;

pub const CHAIN_ID: &str = "meridian-test";

pub fn init_tracing() {
    let _ignored = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Default)]
pub struct MockTxApp {
    pub accounts: Mutex<HashMap<AccountId, Account>>,
    pub fee: Mutex<u128>,
    pub mempool_applies: Mutex<usize>,
    pub commits: Mutex<usize>,
    pub rollbacks: Mutex<usize>,
    pub finalized: Mutex<Finalized>,
    pub param_updates: Mutex<ParamUpdates>,
}

impl MockTxApp {
    pub fn fund(&self, id: AccountId, balance: u128, nonce: i64) {
        let _prev = self.accounts.lock().insert(
            id.clone(),
            Account {
                id,
                balance,
                nonce,
            },
        );
    }
}

impl TxApp for MockTxApp {
    fn begin(&self, _height: i64) -> EyreResult<()> {
        Ok(())
    }

    fn execute(
        &self,
        ctx: &mut TxContext<'_>,
        db: &mut dyn WriteAccess,
        tx: &Transaction,
    ) -> TxResponse {
        let action = tx
            .decode_payload::<Execute>()
            .map(|payload| payload.action)
            .unwrap_or_default();

        let error = match action.as_str() {
            "fail" => Some(eyre!("insufficient balance")),
            "fatal" => Some(DbError::Fatal("disk gone".to_owned()).into()),
            _ => {
                db.put(
                    Column::State,
                    ctx.tx_hash.as_ref(),
                    tx.body.nonce.to_be_bytes().to_vec(),
                );
                None
            }
        };

        TxResponse {
            code: if error.is_some() { 5 } else { 0 },
            gas: 10,
            error,
        }
    }

    fn finalize(&self, _db: &mut dyn WriteAccess, block: &mut BlockContext) -> EyreResult<Finalized> {
        block
            .chain_context
            .network_updates
            .merge(&self.param_updates.lock());
        Ok(self.finalized.lock().clone())
    }

    fn commit(&self) -> EyreResult<()> {
        *self.commits.lock() += 1;
        Ok(())
    }

    fn rollback(&self) {
        *self.rollbacks.lock() += 1;
    }

    fn apply_mempool(
        &self,
        ctx: &mut TxContext<'_>,
        _db: &dyn ReadAccess,
        tx: &Transaction,
    ) -> EyreResult<()> {
        *self.mempool_applies.lock() += 1;

        if tx.body.nonce == 0 {
            bail!("invalid nonce 0 for {}", ctx.caller);
        }
        Ok(())
    }

    fn genesis_init(
        &self,
        db: &mut dyn WriteAccess,
        genesis: &GenesisConfig,
        _chain: &ChainContext,
    ) -> EyreResult<()> {
        for alloc in &genesis.alloc {
            self.fund(alloc.id.clone(), alloc.amount, 0);
        }
        db.put(Column::State, b"genesis", genesis.chain_id.as_bytes().to_vec());
        Ok(())
    }

    fn price(&self, _db: &dyn ReadAccess, _tx: &Transaction, _chain: &ChainContext) -> EyreResult<u128> {
        Ok(*self.fee.lock())
    }

    fn account_info(&self, _db: &dyn ReadAccess, id: &AccountId, _pending: bool) -> EyreResult<Account> {
        Ok(self.accounts.lock().get(id).cloned().unwrap_or(Account {
            id: id.clone(),
            balance: 0,
            nonce: 0,
        }))
    }
}

#[derive(Debug, Default)]
pub struct MockAccounts {
    pub updates: Mutex<Vec<Account>>,
}

impl Accounts for MockAccounts {
    fn updates(&self) -> Vec<Account> {
        self.updates.lock().clone()
    }
}

#[derive(Debug, Default)]
pub struct MockValidators {
    pub validators: Mutex<Vec<Validator>>,
    pub updates: Mutex<Vec<Validator>>,
}

impl ValidatorModule for MockValidators {
    fn get_validators(&self) -> Vec<Validator> {
        self.validators.lock().clone()
    }

    fn validator_updates(&self) -> Vec<Validator> {
        self.updates.lock().clone()
    }
}

#[derive(Debug, Default)]
pub struct MockSnapshots {
    pub enabled: bool,
    pub created: Mutex<Vec<(i64, String)>>,
}

impl MockSnapshots {
    pub fn list_heights(&self) -> Vec<i64> {
        self.list_snapshots()
    }
}

impl SnapshotModule for MockSnapshots {
    fn enabled(&self) -> bool {
        self.enabled
    }

    fn is_snapshot_due(&self, height: i64) -> bool {
        height % 2 == 0
    }

    fn create_snapshot(&self, view: &SnapshotTx, height: i64) -> EyreResult<()> {
        self.created.lock().push((height, view.id().to_owned()));
        Ok(())
    }

    fn list_snapshots(&self) -> Vec<i64> {
        self.created.lock().iter().map(|(height, _)| *height).collect()
    }
}

#[derive(Debug, Default)]
pub struct MockMigrator {
    pub notified: Mutex<Vec<i64>>,
    pub persisted: Mutex<Vec<i64>>,
    pub changesets: Mutex<Vec<(i64, Changeset)>>,
}

#[async_trait]
impl MigratorModule for MockMigrator {
    fn notify_height(&self, block: &mut BlockContext, _db: &mut dyn WriteAccess) -> EyreResult<()> {
        self.notified.lock().push(block.height);
        Ok(())
    }

    async fn store_changesets(
        &self,
        height: i64,
        mut changesets: mpsc::Receiver<Changeset>,
    ) -> EyreResult<()> {
        while let Some(changeset) = changesets.recv().await {
            self.changesets.lock().push((height, changeset));
        }
        Ok(())
    }

    fn persist_last_changeset_height(&self, _db: &mut dyn WriteAccess, height: i64) -> EyreResult<()> {
        self.persisted.lock().push(height);
        Ok(())
    }

    fn get_migration_metadata(&self, status: MigrationStatus) -> EyreResult<MigrationMetadata> {
        Ok(MigrationMetadata {
            status,
            start_height: 0,
            end_height: 0,
        })
    }
}

#[derive(Debug, Default)]
pub struct MockEvents {
    pub events: Mutex<Vec<VotableEvent>>,
    pub unbroadcasted: Mutex<Vec<Hash>>,
    pub marked: Mutex<Vec<Hash>>,
    pub stats: Mutex<usize>,
}

impl EventStore for MockEvents {
    fn get_events(&self, _db: &dyn ReadAccess) -> EyreResult<Vec<VotableEvent>> {
        Ok(self.events.lock().clone())
    }

    fn unbroadcasted_events(&self) -> EyreResult<Vec<Hash>> {
        Ok(self.unbroadcasted.lock().clone())
    }

    fn mark_broadcasted(&self, ids: &[Hash]) -> EyreResult<()> {
        self.marked.lock().extend_from_slice(ids);
        self.unbroadcasted.lock().retain(|id| !ids.contains(id));
        Ok(())
    }

    fn update_stats(&self, proposed_events: usize) {
        *self.stats.lock() += proposed_events;
    }
}

#[derive(Debug, Default)]
pub struct MockBroadcaster {
    pub sent: Mutex<Vec<Transaction>>,
}

#[async_trait]
impl TxBroadcaster for MockBroadcaster {
    async fn broadcast_tx(&self, tx: Transaction) -> EyreResult<Hash> {
        let hash = tx.hash()?;
        self.sent.lock().push(tx);
        Ok(hash)
    }
}

#[derive(Debug, Default)]
pub struct MockWhitelist {
    pub added: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<String>>,
}

impl PeerWhitelist for MockWhitelist {
    fn add_peer(&self, node_id: &str) -> EyreResult<()> {
        self.added.lock().push(node_id.to_owned());
        Ok(())
    }

    fn remove_peer(&self, node_id: &str) -> EyreResult<()> {
        self.removed.lock().push(node_id.to_owned());
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct Mocks {
    pub txapp: Arc<MockTxApp>,
    pub accounts: Arc<MockAccounts>,
    pub validators: Arc<MockValidators>,
    pub snapshots: Arc<MockSnapshots>,
    pub events: Arc<MockEvents>,
    pub migrator: Arc<MockMigrator>,
}

impl Mocks {
    pub fn with_snapshots() -> Self {
        Self {
            snapshots: Arc::new(MockSnapshots {
                enabled: true,
                ..MockSnapshots::default()
            }),
            ..Self::default()
        }
    }

    pub fn modules(&self) -> Modules {
        Modules {
            txapp: self.txapp.clone(),
            accounts: self.accounts.clone(),
            validators: self.validators.clone(),
            snapshots: self.snapshots.clone(),
            events: self.events.clone(),
            migrator: self.migrator.clone(),
        }
    }
}

pub fn genesis(params: NetworkParameters) -> GenesisConfig {
    let mut genesis = GenesisConfig::new(CHAIN_ID.to_owned(), params);
    genesis.state_hash = Hash::new(b"genesis");
    genesis
}

pub struct Harness {
    pub store: Store,
    pub blocks: BlockStore,
    pub mocks: Mocks,
    pub signer: Signer,
    pub processor: BlockProcessor,
}

impl Harness {
    pub fn new(params: NetworkParameters) -> Self {
        Self::with(Store::in_memory(), Mocks::default(), Signer::generate_ed25519(), params)
    }

    pub fn with(store: Store, mocks: Mocks, signer: Signer, params: NetworkParameters) -> Self {
        let blocks = BlockStore::open(store.clone()).unwrap();
        let processor = BlockProcessor::new(
            store.clone(),
            &blocks,
            mocks.modules(),
            genesis(params),
            signer.clone(),
        )
        .unwrap();

        Self {
            store,
            blocks,
            mocks,
            signer,
            processor,
        }
    }

    pub fn reopen(&self, params: NetworkParameters) -> BlockProcessor {
        BlockProcessor::new(
            self.store.clone(),
            &self.blocks,
            self.mocks.modules(),
            genesis(params),
            self.signer.clone(),
        )
        .unwrap()
    }
}

pub fn signed_tx(signer: &Signer, action: &str, nonce: u64) -> Transaction {
    let payload = Execute {
        namespace: "main".to_owned(),
        action: action.to_owned(),
        arguments: vec![],
    };
    let mut tx = Transaction::new(&payload, CHAIN_ID, nonce).unwrap();
    tx.sign(signer).unwrap();
    tx
}

pub fn exec_request(height: i64, txns: Vec<Transaction>, proposer: &Signer) -> BlockExecRequest {
    let block = Block::new(height, Hash::ZERO, Hash::ZERO, Hash::ZERO, 1_700_000_000_000, txns).unwrap();

    BlockExecRequest {
        height,
        block_id: block.hash(),
        block,
        proposer: proposer.public_key(),
    }
}
