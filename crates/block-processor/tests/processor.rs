#![allow(unused_crate_dependencies, reason = "Shared dependency list")]

mod common;

use std::sync::Arc;

use common::{exec_request, init_tracing, signed_tx, Harness, Mocks, CHAIN_ID};
use meridian_block_processor::ProcessorError;
use meridian_primitives::auth::{KeyType, Signer};
use meridian_primitives::block::{Block, CommitInfo};
use meridian_primitives::execution::{CommitRequest, SUCCESS_LOG};
use meridian_primitives::hash::Hash;
use meridian_primitives::params::{MigrationStatus, NetworkParameters, ParamName, ParamValue};
use meridian_primitives::transaction::{Execute, Transaction};
use meridian_primitives::validator::Validator;
use meridian_store::db::Column;
use meridian_store::meta::{get_chain_state, set_chain_state};
use meridian_store::state::ReadAccess;
use meridian_store::Store;
use tokio_util::sync::CancellationToken;

async fn initialized(params: NetworkParameters) -> Harness {
    init_tracing();

    let harness = Harness::new(params);
    let _ = harness.processor.init_chain().await.unwrap();
    harness
}

fn commit_req(height: i64, app_hash: Hash) -> CommitRequest {
    CommitRequest {
        height,
        app_hash,
        syncing: false,
    }
}

#[tokio::test]
async fn test_init_chain_persists_genesis_head() {
    let harness = initialized(NetworkParameters::default()).await;

    let genesis_hash = Hash::new(b"genesis");

    assert!(harness.processor.is_initialized());
    assert_eq!(harness.processor.height(), 1);
    assert_eq!(harness.processor.app_hash(), genesis_hash);
    assert_eq!(*harness.mocks.txapp.commits.lock(), 1);

    let state = get_chain_state(&harness.store.begin_read())
        .unwrap()
        .unwrap();
    assert_eq!((state.height, state.app_hash, state.dirty), (1, genesis_hash, false));

    let reopened = harness.reopen(NetworkParameters::default());
    assert_eq!(reopened.height(), 1);
    assert_eq!(reopened.app_hash(), genesis_hash);
}

#[tokio::test]
async fn test_new_processor_is_uninitialized() {
    let harness = Harness::new(NetworkParameters::default());

    assert!(!harness.processor.is_initialized());
    assert_eq!(harness.processor.height(), 0);
    assert_eq!(harness.processor.app_hash(), Hash::ZERO);
    assert_eq!(harness.processor.chain_id(), CHAIN_ID);
}

#[tokio::test]
async fn test_execute_and_commit_advance_head() {
    let harness = initialized(NetworkParameters::default()).await;
    let client = Signer::generate_ed25519();

    let txs = vec![
        signed_tx(&client, "store", 1),
        signed_tx(&client, "store", 2),
    ];
    let first_hash = txs[0].hash().unwrap();
    let req = exec_request(2, txs, &client);

    let result = harness
        .processor
        .execute_block(&req, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.tx_results.len(), 2);
    assert!(result
        .tx_results
        .iter()
        .all(|res| res.code == 0 && res.log == SUCCESS_LOG));
    assert_ne!(result.app_hash, Hash::new(b"genesis"));

    let status = harness.processor.block_exec_status().unwrap();
    assert!(status.completed());
    assert_eq!(status.tx_ids.len(), 2);

    // Nothing is visible before commit.
    assert!(!harness
        .store
        .has(Column::State, first_hash.as_ref())
        .unwrap());

    harness
        .processor
        .commit(&commit_req(2, result.app_hash))
        .await
        .unwrap();

    assert_eq!(harness.processor.height(), 2);
    assert_eq!(harness.processor.app_hash(), result.app_hash);
    assert!(harness.processor.block_exec_status().is_none());
    assert_eq!(
        harness.store.get(Column::State, first_hash.as_ref()).unwrap(),
        Some(1_u64.to_be_bytes().to_vec())
    );

    let state = get_chain_state(&harness.store.begin_read())
        .unwrap()
        .unwrap();
    assert_eq!((state.height, state.app_hash, state.dirty), (2, result.app_hash, false));
    assert_eq!(*harness.mocks.migrator.persisted.lock(), vec![2]);
}

#[tokio::test]
async fn test_app_hash_is_deterministic() {
    let client = Signer::generate_ed25519();
    let txs = vec![
        signed_tx(&client, "store", 1),
        signed_tx(&client, "fail", 2),
    ];

    let mut hashes = Vec::new();

    for _ in 0..2 {
        let harness = initialized(NetworkParameters::default()).await;
        let result = harness
            .processor
            .execute_block(&exec_request(2, txs.clone(), &client), &CancellationToken::new())
            .await
            .unwrap();
        hashes.push(result.app_hash);
    }

    assert_eq!(hashes[0], hashes[1]);
}

#[tokio::test]
async fn test_app_hash_depends_on_results() {
    let client = Signer::generate_ed25519();

    let mut hashes = Vec::new();

    for action in ["store", "fail"] {
        let harness = initialized(NetworkParameters::default()).await;
        let req = exec_request(2, vec![signed_tx(&client, action, 1)], &client);
        let result = harness
            .processor
            .execute_block(&req, &CancellationToken::new())
            .await
            .unwrap();
        hashes.push(result.app_hash);
    }

    assert_ne!(hashes[0], hashes[1]);
}

#[tokio::test]
async fn test_failed_transaction_is_recorded() {
    let harness = initialized(NetworkParameters::default()).await;
    let client = Signer::generate_ed25519();

    let req = exec_request(
        2,
        vec![
            signed_tx(&client, "store", 1),
            signed_tx(&client, "fail", 2),
            signed_tx(&client, "store", 3),
        ],
        &client,
    );

    let result = harness
        .processor
        .execute_block(&req, &CancellationToken::new())
        .await
        .unwrap();

    let codes: Vec<_> = result.tx_results.iter().map(|res| res.code).collect();
    assert_eq!(codes, vec![0, 5, 0]);
    assert_eq!(result.tx_results[1].log, "insufficient balance");
}

#[tokio::test]
async fn test_fatal_storage_error_aborts_block() {
    let harness = initialized(NetworkParameters::default()).await;
    let client = Signer::generate_ed25519();
    let genesis_hash = harness.processor.app_hash();

    let req = exec_request(
        2,
        vec![signed_tx(&client, "fatal", 1), signed_tx(&client, "store", 2)],
        &client,
    );

    let err = harness
        .processor
        .execute_block(&req, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ProcessorError::FatalDb(_)));
    assert!(err.is_fatal());

    harness.processor.rollback(1, genesis_hash).await.unwrap();

    assert_eq!(harness.processor.height(), 1);
    assert_eq!(harness.processor.app_hash(), genesis_hash);
    assert_eq!(*harness.mocks.txapp.rollbacks.lock(), 1);

    let err = harness
        .processor
        .commit(&commit_req(2, Hash::ZERO))
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessorError::NoOpenTransaction));

    let req = exec_request(2, vec![signed_tx(&client, "store", 1)], &client);
    let result = harness
        .processor
        .execute_block(&req, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.tx_results[0].code, 0);
}

#[tokio::test]
async fn test_cancelled_execution_stops() {
    let harness = initialized(NetworkParameters::default()).await;
    let client = Signer::generate_ed25519();

    let cancel = CancellationToken::new();
    cancel.cancel();

    let req = exec_request(2, vec![signed_tx(&client, "store", 1)], &client);
    let err = harness
        .processor
        .execute_block(&req, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, ProcessorError::Cancelled));
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn test_commit_without_execution_fails() {
    let harness = initialized(NetworkParameters::default()).await;

    let err = harness
        .processor
        .commit(&commit_req(2, Hash::ZERO))
        .await
        .unwrap_err();

    assert!(matches!(err, ProcessorError::NoOpenTransaction));
    assert_eq!(harness.processor.height(), 1);
}

#[tokio::test]
async fn test_rollback_restores_head_and_params() {
    let harness = initialized(NetworkParameters::default()).await;
    let client = Signer::generate_ed25519();

    harness
        .mocks
        .txapp
        .param_updates
        .lock()
        .insert(ParamName::MaxVotesPerTx, ParamValue::Int(7));

    let req = exec_request(2, vec![signed_tx(&client, "store", 1)], &client);
    let result = harness
        .processor
        .execute_block(&req, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        result.param_updates.get(ParamName::MaxVotesPerTx),
        Some(&ParamValue::Int(7))
    );

    harness.processor.rollback(1, Hash::new(b"genesis")).await.unwrap();

    assert_eq!(harness.processor.height(), 1);
    assert!(harness.processor.chain_context().network_updates.is_empty());
    assert_eq!(
        harness.processor.consensus_params(),
        NetworkParameters::default()
    );
    assert!(harness.processor.block_exec_status().is_none());

    let state = get_chain_state(&harness.store.begin_read())
        .unwrap()
        .unwrap();
    assert_eq!(state.height, 1);
    assert!(!state.dirty);
}

#[tokio::test]
async fn test_param_updates_apply_on_commit() {
    let harness = initialized(NetworkParameters::default()).await;
    let client = Signer::generate_ed25519();

    harness
        .mocks
        .txapp
        .param_updates
        .lock()
        .insert(ParamName::MaxVotesPerTx, ParamValue::Int(7));

    let req = exec_request(2, vec![], &client);
    let result = harness
        .processor
        .execute_block(&req, &CancellationToken::new())
        .await
        .unwrap();

    // Still the old parameters until commit.
    assert_eq!(
        harness.processor.consensus_params().max_votes_per_tx,
        NetworkParameters::default().max_votes_per_tx
    );

    harness
        .processor
        .commit(&commit_req(2, result.app_hash))
        .await
        .unwrap();

    assert_eq!(harness.processor.consensus_params().max_votes_per_tx, 7);
    assert!(harness.processor.chain_context().network_updates.is_empty());

    let reopened = harness.reopen(NetworkParameters::default());
    assert_eq!(reopened.consensus_params().max_votes_per_tx, 7);
}

#[tokio::test]
async fn test_dirty_state_is_recovered() {
    init_tracing();

    let store = Store::in_memory();
    let harness = Harness::with(
        store.clone(),
        Mocks::default(),
        Signer::generate_ed25519(),
        NetworkParameters::default(),
    );

    let block = Block::new(2, Hash::ZERO, Hash::ZERO, Hash::ZERO, 1_000, vec![]).unwrap();
    let commit_info = CommitInfo {
        app_hash: Hash::new(b"final"),
        ..CommitInfo::default()
    };
    harness.blocks.store(&block, &commit_info).unwrap();

    let mut tx = store.begin_tx();
    set_chain_state(&mut tx, 2, Hash::new(b"previous"), true).unwrap();
    tx.commit().unwrap();

    for _ in 0..2 {
        let processor = harness.reopen(NetworkParameters::default());

        assert_eq!(processor.height(), 2);
        assert_eq!(processor.app_hash(), Hash::new(b"final"));

        let state = get_chain_state(&store.begin_read()).unwrap().unwrap();
        assert_eq!((state.height, state.app_hash, state.dirty), (2, Hash::new(b"final"), false));
    }

    assert_eq!(*harness.mocks.migrator.persisted.lock(), vec![2]);
}

#[tokio::test]
async fn test_dirty_state_without_block_fails() {
    let store = Store::in_memory();

    let mut tx = store.begin_tx();
    set_chain_state(&mut tx, 5, Hash::ZERO, true).unwrap();
    tx.commit().unwrap();

    let blocks = meridian_store::blocks::BlockStore::open(store.clone()).unwrap();
    let result = meridian_block_processor::BlockProcessor::new(
        store,
        &blocks,
        Mocks::default().modules(),
        common::genesis(NetworkParameters::default()),
        Signer::generate_ed25519(),
    );

    assert!(result.is_err());
}

#[tokio::test]
async fn test_check_tx_accepts_valid_transaction() {
    let harness = initialized(NetworkParameters::default()).await;
    let client = Signer::generate_secp256k1();

    harness
        .processor
        .check_tx(&signed_tx(&client, "store", 1), false)
        .unwrap();

    assert_eq!(*harness.mocks.txapp.mempool_applies.lock(), 1);
}

#[tokio::test]
async fn test_check_tx_rejects_wrong_chain() {
    let harness = initialized(NetworkParameters::default()).await;
    let client = Signer::generate_ed25519();

    let payload = Execute {
        namespace: "main".to_owned(),
        action: "store".to_owned(),
        arguments: vec![],
    };
    let mut tx = Transaction::new(&payload, "other-chain", 1).unwrap();
    tx.sign(&client).unwrap();

    let err = harness.processor.check_tx(&tx, false).unwrap_err();

    assert!(matches!(err, ProcessorError::WrongChainId(ref id) if id == "other-chain"));
    assert_eq!(*harness.mocks.txapp.mempool_applies.lock(), 0);
}

#[tokio::test]
async fn test_check_tx_verifies_signature_unless_recheck() {
    let harness = initialized(NetworkParameters::default()).await;
    let client = Signer::generate_ed25519();

    let mut tx = signed_tx(&client, "store", 1);
    tx.body.fee = 99;

    let err = harness.processor.check_tx(&tx, false).unwrap_err();
    assert!(matches!(err, ProcessorError::Verification(_)));
    assert_eq!(*harness.mocks.txapp.mempool_applies.lock(), 0);

    harness.processor.check_tx(&tx, true).unwrap();
    assert_eq!(*harness.mocks.txapp.mempool_applies.lock(), 1);
}

#[tokio::test]
async fn test_check_tx_reports_admission_failure() {
    let harness = initialized(NetworkParameters::default()).await;
    let client = Signer::generate_ed25519();

    let err = harness
        .processor
        .check_tx(&signed_tx(&client, "store", 0), false)
        .unwrap_err();

    assert!(matches!(err, ProcessorError::Admission(_)));
}

#[tokio::test]
async fn test_check_tx_rejects_when_halted() {
    let params = NetworkParameters {
        migration_status: MigrationStatus::MigrationCompleted,
        ..NetworkParameters::default()
    };
    let harness = initialized(params).await;
    let client = Signer::generate_ed25519();

    let err = harness
        .processor
        .check_tx(&signed_tx(&client, "store", 1), false)
        .unwrap_err();

    assert!(matches!(err, ProcessorError::HaltedForMigration));
    assert_eq!(*harness.mocks.txapp.mempool_applies.lock(), 0);
}

#[tokio::test]
async fn test_validator_subscribers_receive_updates() {
    init_tracing();

    let harness = Harness::new(NetworkParameters::default());
    let validator = Validator {
        identifier: vec![1; 32],
        key_type: KeyType::Ed25519,
        power: 10,
    };
    harness.mocks.validators.validators.lock().push(validator.clone());

    let mut rx = harness.processor.subscribe_validators();
    let dropped = harness.processor.subscribe_validators();
    drop(dropped);

    let _ = harness.processor.init_chain().await.unwrap();

    assert_eq!(rx.try_recv().unwrap(), vec![validator]);

    // A full queue keeps the subscriber but skips the update.
    let req = exec_request(2, vec![], &Signer::generate_ed25519());
    let result = harness
        .processor
        .execute_block(&req, &CancellationToken::new())
        .await
        .unwrap();
    harness
        .processor
        .commit(&commit_req(2, result.app_hash))
        .await
        .unwrap();

    let req = exec_request(3, vec![], &Signer::generate_ed25519());
    let result = harness
        .processor
        .execute_block(&req, &CancellationToken::new())
        .await
        .unwrap();
    harness
        .processor
        .commit(&commit_req(3, result.app_hash))
        .await
        .unwrap();

    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_validator_updates_feed_whitelist() {
    let harness = initialized(NetworkParameters::default()).await;

    let whitelist = Arc::new(common::MockWhitelist::default());
    harness
        .processor
        .set_callbacks(Arc::new(common::MockBroadcaster::default()), whitelist.clone());

    let promoted = Validator {
        identifier: vec![2; 32],
        key_type: KeyType::Ed25519,
        power: 5,
    };
    let demoted = Validator {
        identifier: vec![1; 32],
        key_type: KeyType::Ed25519,
        power: 0,
    };
    *harness.mocks.validators.updates.lock() = vec![promoted.clone(), demoted.clone()];

    let req = exec_request(2, vec![], &Signer::generate_ed25519());
    let result = harness
        .processor
        .execute_block(&req, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.validator_updates, vec![demoted.clone(), promoted.clone()]);
    assert_eq!(
        *whitelist.added.lock(),
        vec![promoted.account_id().to_string()]
    );
    assert_eq!(
        *whitelist.removed.lock(),
        vec![demoted.account_id().to_string()]
    );
}

#[tokio::test]
async fn test_snapshot_created_when_due_and_not_syncing() {
    init_tracing();

    let harness = Harness::with(
        Store::in_memory(),
        Mocks::with_snapshots(),
        Signer::generate_ed25519(),
        NetworkParameters::default(),
    );
    let _ = harness.processor.init_chain().await.unwrap();
    let proposer = Signer::generate_ed25519();

    // Height 2 is due but the node is syncing.
    let result = harness
        .processor
        .execute_block(&exec_request(2, vec![], &proposer), &CancellationToken::new())
        .await
        .unwrap();
    harness
        .processor
        .commit(&CommitRequest {
            height: 2,
            app_hash: result.app_hash,
            syncing: true,
        })
        .await
        .unwrap();
    assert!(harness.mocks.snapshots.created.lock().is_empty());

    // Height 3 is not due, but no snapshot exists yet.
    let result = harness
        .processor
        .execute_block(&exec_request(3, vec![], &proposer), &CancellationToken::new())
        .await
        .unwrap();
    harness
        .processor
        .commit(&commit_req(3, result.app_hash))
        .await
        .unwrap();
    assert_eq!(harness.mocks.snapshots.list_heights(), vec![3]);

    // Height 5 is neither due nor the first.
    for height in [4, 5] {
        let result = harness
            .processor
            .execute_block(&exec_request(height, vec![], &proposer), &CancellationToken::new())
            .await
            .unwrap();
        harness
            .processor
            .commit(&commit_req(height, result.app_hash))
            .await
            .unwrap();
    }
    assert_eq!(harness.mocks.snapshots.list_heights(), vec![3, 4]);
}

#[tokio::test]
async fn test_migration_receives_changesets() {
    let params = NetworkParameters {
        migration_status: MigrationStatus::MigrationInProgress,
        ..NetworkParameters::default()
    };
    let harness = initialized(params).await;
    let client = Signer::generate_ed25519();

    let tx = signed_tx(&client, "store", 1);
    let tx_hash = tx.hash().unwrap();

    let _ = harness
        .processor
        .execute_block(&exec_request(2, vec![tx], &client), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(*harness.mocks.migrator.notified.lock(), vec![2]);

    let changesets = harness.mocks.migrator.changesets.lock();
    assert!(changesets.iter().all(|(height, _)| *height == 2));
    assert!(changesets
        .iter()
        .any(|(_, changeset)| changeset.column == Column::State
            && changeset.key == tx_hash.to_vec()
            && changeset.value == Some(1_u64.to_be_bytes().to_vec())));
}

#[tokio::test]
async fn test_no_changesets_outside_migration() {
    let harness = initialized(NetworkParameters::default()).await;
    let client = Signer::generate_ed25519();

    let _ = harness
        .processor
        .execute_block(
            &exec_request(2, vec![signed_tx(&client, "store", 1)], &client),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(harness.mocks.migrator.changesets.lock().is_empty());
    assert_eq!(*harness.mocks.migrator.notified.lock(), vec![2]);
}

#[tokio::test]
async fn test_genesis_state_is_committed() {
    let harness = initialized(NetworkParameters::default()).await;

    let read = harness.store.begin_read();
    assert_eq!(
        read.get(Column::State, b"genesis").unwrap(),
        Some(CHAIN_ID.as_bytes().to_vec())
    );
}
