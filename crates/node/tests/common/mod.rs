#![allow(dead_code, reason = "Shared between test binaries")]

use core::time::Duration;
use std::sync::Arc;

use async_trait::async_trait;
use eyre::{bail, Result as EyreResult};
use libp2p::PeerId;
use meridian_block_processor::modules::{
    Accounts, EventStore, Finalized, MigrationMetadata, MigratorModule, Modules, SnapshotModule,
    TxApp, TxResponse, ValidatorModule,
};
use meridian_block_processor::BlockProcessor;
use meridian_mempool::Mempool;
use meridian_network::memory::{MemoryHost, MemoryNetwork};
use meridian_network::Host;
use meridian_node::{ConsensusEngine, Node, SyncConfig};
use meridian_primitives::auth::Signer;
use meridian_primitives::block::{Block, BlockHeader, CommitInfo};
use meridian_primitives::chain::{BlockContext, ChainContext, TxContext};
use meridian_primitives::genesis::GenesisConfig;
use meridian_primitives::hash::Hash;
use meridian_primitives::inflight::FetchClaim;
use meridian_primitives::params::{MigrationStatus, NetworkParameters};
use meridian_primitives::transaction::{Execute, Transaction, VotableEvent};
use meridian_primitives::validator::{Account, AccountId, Validator};
use meridian_store::blocks::BlockStore;
use meridian_store::state::{Changeset, ReadAccess, SnapshotTx, WriteAccess};
use meridian_store::Store;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

pub const CHAIN_ID: &str = "meridian-test";

pub fn init_tracing() {
    let _ignored = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Admits every transaction with a non-zero nonce and otherwise does
/// nothing.
#[derive(Debug, Default)]
pub struct NullApp;

impl TxApp for NullApp {
    fn begin(&self, _height: i64) -> EyreResult<()> {
        Ok(())
    }

    fn execute(
        &self,
        _ctx: &mut TxContext<'_>,
        _db: &mut dyn WriteAccess,
        _tx: &Transaction,
    ) -> TxResponse {
        TxResponse {
            code: 0,
            gas: 0,
            error: None,
        }
    }

    fn finalize(&self, _db: &mut dyn WriteAccess, _block: &mut BlockContext) -> EyreResult<Finalized> {
        Ok(Finalized::default())
    }

    fn commit(&self) -> EyreResult<()> {
        Ok(())
    }

    fn rollback(&self) {}

    fn apply_mempool(
        &self,
        _ctx: &mut TxContext<'_>,
        _db: &dyn ReadAccess,
        tx: &Transaction,
    ) -> EyreResult<()> {
        if tx.body.nonce == 0 {
            bail!("invalid nonce 0");
        }
        Ok(())
    }

    fn genesis_init(
        &self,
        _db: &mut dyn WriteAccess,
        _genesis: &GenesisConfig,
        _chain: &ChainContext,
    ) -> EyreResult<()> {
        Ok(())
    }

    fn price(&self, _db: &dyn ReadAccess, _tx: &Transaction, _chain: &ChainContext) -> EyreResult<u128> {
        Ok(0)
    }

    fn account_info(&self, _db: &dyn ReadAccess, id: &AccountId, _pending: bool) -> EyreResult<Account> {
        Ok(Account {
            id: id.clone(),
            balance: 0,
            nonce: 0,
        })
    }
}

impl Accounts for NullApp {
    fn updates(&self) -> Vec<Account> {
        Vec::new()
    }
}

impl ValidatorModule for NullApp {
    fn get_validators(&self) -> Vec<Validator> {
        Vec::new()
    }

    fn validator_updates(&self) -> Vec<Validator> {
        Vec::new()
    }
}

impl SnapshotModule for NullApp {
    fn enabled(&self) -> bool {
        false
    }

    fn is_snapshot_due(&self, _height: i64) -> bool {
        false
    }

    fn create_snapshot(&self, _view: &SnapshotTx, _height: i64) -> EyreResult<()> {
        Ok(())
    }

    fn list_snapshots(&self) -> Vec<i64> {
        Vec::new()
    }
}

impl EventStore for NullApp {
    fn get_events(&self, _db: &dyn ReadAccess) -> EyreResult<Vec<VotableEvent>> {
        Ok(Vec::new())
    }

    fn unbroadcasted_events(&self) -> EyreResult<Vec<Hash>> {
        Ok(Vec::new())
    }

    fn mark_broadcasted(&self, _ids: &[Hash]) -> EyreResult<()> {
        Ok(())
    }

    fn update_stats(&self, _proposed_events: usize) {}
}

#[async_trait]
impl MigratorModule for NullApp {
    fn notify_height(&self, _block: &mut BlockContext, _db: &mut dyn WriteAccess) -> EyreResult<()> {
        Ok(())
    }

    async fn store_changesets(
        &self,
        _height: i64,
        mut changesets: mpsc::Receiver<Changeset>,
    ) -> EyreResult<()> {
        while changesets.recv().await.is_some() {}
        Ok(())
    }

    fn persist_last_changeset_height(&self, _db: &mut dyn WriteAccess, _height: i64) -> EyreResult<()> {
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

pub fn modules() -> Modules {
    let app = Arc::new(NullApp);

    Modules {
        txapp: app.clone(),
        accounts: app.clone(),
        validators: app.clone(),
        snapshots: app.clone(),
        events: app.clone(),
        migrator: app,
    }
}

/// Accepts or declines every announced block and records what it sees.
#[derive(Debug)]
pub struct RecordingEngine {
    pub accept: Mutex<bool>,
    pub offered: Mutex<Vec<(i64, Hash, Vec<u8>)>>,
    pub notified: Mutex<Vec<(i64, Hash)>>,
}

impl Default for RecordingEngine {
    fn default() -> Self {
        Self {
            accept: Mutex::new(true),
            offered: Mutex::default(),
            notified: Mutex::default(),
        }
    }
}

#[async_trait]
impl ConsensusEngine for RecordingEngine {
    fn accept_commit(
        &self,
        height: i64,
        hash: Hash,
        _header: &BlockHeader,
        _commit_info: &CommitInfo,
        leader_sig: &[u8],
    ) -> bool {
        self.offered.lock().push((height, hash, leader_sig.to_vec()));
        *self.accept.lock()
    }

    async fn notify_block_commit(
        &self,
        block: Block,
        _commit_info: CommitInfo,
        hash: Hash,
        claim: FetchClaim,
    ) {
        self.notified.lock().push((block.header.height, hash));
        claim.done();
    }
}

/// Short timeouts and a quick retry schedule.
pub fn sync_config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.request_read_timeout = Duration::from_secs(2);
    config.blk_get_timeout = Duration::from_secs(2);
    config.ann_resp_timeout = Duration::from_secs(2);
    config.retry_base_delay = Duration::from_millis(10);
    config.retry_attempts = 3;
    config
}

pub struct TestNode {
    pub node: Node,
    pub host: MemoryHost,
    pub signer: Signer,
    pub engine: Arc<RecordingEngine>,
    pub cancel: CancellationToken,
}

impl TestNode {
    pub async fn spawn(network: &MemoryNetwork) -> Self {
        Self::spawn_with(network, sync_config()).await
    }

    pub async fn spawn_with(network: &MemoryNetwork, config: SyncConfig) -> Self {
        let (host, incoming) = network.add_host();

        let store = Store::in_memory();
        let blocks = BlockStore::open(store.clone()).unwrap();
        let signer = Signer::generate_ed25519();

        let genesis = GenesisConfig::new(CHAIN_ID.to_owned(), NetworkParameters::default());

        let processor = Arc::new(
            BlockProcessor::new(store, &blocks, modules(), genesis, signer.clone()).unwrap(),
        );
        let _head = processor.init_chain().await.unwrap();

        let engine = Arc::new(RecordingEngine::default());
        let cancel = CancellationToken::new();

        let node = Node::new(
            Arc::new(host.clone()),
            processor,
            blocks,
            Mempool::default(),
            engine.clone(),
            config,
            cancel.clone(),
        );

        let runner = node.clone();
        drop(tokio::spawn(async move { runner.run(incoming).await }));

        Self {
            node,
            host,
            signer,
            engine,
            cancel,
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.host.local_peer_id()
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.cancel.cancel();
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

/// A signed block at `height` carrying `txns`, with its commit info.
pub fn signed_block(leader: &Signer, height: i64, txns: Vec<Transaction>) -> (Block, CommitInfo) {
    let mut block =
        Block::new(height, Hash::ZERO, Hash::ZERO, Hash::ZERO, 1_700_000_000_000, txns).unwrap();
    block.sign(leader);

    let commit_info = CommitInfo {
        app_hash: Hash::new(&height.to_le_bytes()),
        ..CommitInfo::default()
    };

    (block, commit_info)
}

/// Polls `check` until it holds, for up to two seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    check()
}
