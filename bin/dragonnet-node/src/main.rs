use std::{sync::Arc, time::Duration};

use anyhow::Context;
use dragonnet_anchor::AnchorEngine;
use dragonnet_broadcast::{BroadcastFunctions, BroadcastProcessor, NotificationWorker};
use dragonnet_common::{
    config::{NodeConfig, StorageKind},
    env::env_opt,
    logging::{self, LoggerConfig},
};
use dragonnet_coord::CoordStore;
use dragonnet_interchain::InterchainDao;
use dragonnet_keys::ChainKeys;
use dragonnet_matchmaking::{HttpMatchmaking, MatchmakingClient};
use dragonnet_processor::{
    callback::CallbackRegistry,
    dispatch::ReceiptDispatcher,
    l1::L1Actions,
    l2::L2Actions,
    l3::L3Actions,
    l4::L4Actions,
    run_actions_loop,
    shared::BlockChainer,
    WorkQueue,
};
use dragonnet_storage::{
    dao::{ApiKeyDao, BlockDao, TransactionDao, TransactionTypeDao},
    DiskStore, MemoryIndexer, MemoryStore, ObjectStore,
};
use dragonnet_tasks::TaskManager;
use dragonnet_webserver::{run_webserver, AppState};
use tracing::*;

mod args;

/// Fixed cadence of the L1-L4 production loops.
const PROCESSOR_PERIOD: Duration = Duration::from_secs(5);

/// Fixed cadence of the L5 anchor engine.
const ANCHOR_PERIOD: Duration = Duration::from_secs(60);

fn main() -> anyhow::Result<()> {
    let args: args::Args = argh::from_env();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    runtime.block_on(run(args))
}

async fn run(args: args::Args) -> anyhow::Result<()> {
    let mut config = NodeConfig::from_env();
    if let Some(port) = args.port {
        config.web_port = port;
    }
    if let Some(level) = args.level {
        config.level = level;
    }
    if !(1..=5).contains(&config.level) {
        anyhow::bail!("LEVEL must be between 1 and 5, got {}", config.level);
    }

    logging::init(LoggerConfig::new(format!("dragonnet-{}", config.internal_id)));
    info!(level = config.level, id = %config.internal_id, "starting node");

    let store: Arc<dyn ObjectStore> = match config.storage_kind {
        StorageKind::Memory => Arc::new(MemoryStore::new()),
        StorageKind::Disk => Arc::new(DiskStore::new(config.storage_location.clone())?),
    };
    let coord = Arc::new(CoordStore::new());
    let indexer = Arc::new(MemoryIndexer::new());
    let blocks = Arc::new(BlockDao::new(store.clone(), indexer.clone()));
    let transactions = Arc::new(TransactionDao::new(store.clone(), indexer.clone()));
    let transaction_types = Arc::new(TransactionTypeDao::new(store.clone()));
    let api_keys = Arc::new(ApiKeyDao::new(store.clone()));

    let keys = match args.private_key.or_else(|| env_opt("PRIVATE_KEY")) {
        Some(secret) => Arc::new(
            ChainKeys::from_b64_secret(
                config.internal_id.clone(),
                &secret,
                config.proof_scheme,
                config.pow_difficulty,
            )
            .context("loading chain key")?,
        ),
        None => {
            warn!("no PRIVATE_KEY provided, generating an ephemeral chain key");
            Arc::new(ChainKeys::generate(
                config.internal_id.clone(),
                config.proof_scheme,
                config.pow_difficulty,
            ))
        }
    };

    let matchmaking: Arc<dyn MatchmakingClient> = Arc::new(HttpMatchmaking::new(
        config.matchmaking_endpoint.clone(),
        config.internal_id.clone(),
    ));
    let functions = Arc::new(BroadcastFunctions::new(
        coord.clone(),
        blocks.clone(),
        config.requirements,
    ));
    let queue = Arc::new(WorkQueue::new(coord.clone(), config.level));
    let callbacks = Arc::new(CallbackRegistry::new(coord.clone()));
    let interchain_dao = InterchainDao::new(store.clone());

    let default_interchain = if config.level == 5 {
        Some(
            interchain_dao
                .get_default_interchain_client()
                .context("an L5 node needs a default interchain configured")?,
        )
    } else {
        None
    };

    let manager = TaskManager::new(tokio::runtime::Handle::current());
    let executor = manager.executor();

    let app_state = Arc::new(AppState {
        config: config.clone(),
        coord: coord.clone(),
        store: store.clone(),
        blocks: blocks.clone(),
        transactions: transactions.clone(),
        transaction_types: transaction_types.clone(),
        api_keys: api_keys.clone(),
        functions: functions.clone(),
        queue: queue.clone(),
        callbacks: callbacks.clone(),
        default_interchain: default_interchain.clone(),
    });
    executor.spawn_critical_async(
        "webserver",
        run_webserver(app_state, executor.shutdown_guard()),
    );

    let dispatcher = || {
        ReceiptDispatcher::new(
            config.internal_id.clone(),
            config.hash_algorithm,
            api_keys.clone(),
            matchmaking.clone(),
        )
    };
    let chainer = || BlockChainer::new(coord.clone(), blocks.clone(), config.level);
    let level_queue = || WorkQueue::new(coord.clone(), config.level);

    match config.level {
        1 => {
            let actions = L1Actions::new(
                config.internal_id.clone(),
                level_queue(),
                chainer(),
                blocks.clone(),
                transactions.clone(),
                transaction_types.clone(),
                keys.clone(),
                functions.clone(),
                config.broadcast_enabled,
                CallbackRegistry::new(coord.clone()),
            );
            executor.spawn_critical_async(
                "processor::l1",
                run_actions_loop(actions, PROCESSOR_PERIOD, executor.shutdown_guard()),
            );

            if config.broadcast_enabled {
                let processor = Arc::new(BroadcastProcessor::new(
                    config.internal_id.clone(),
                    config.hash_algorithm,
                    functions.clone(),
                    blocks.clone(),
                    api_keys.clone(),
                    matchmaking.clone(),
                ));
                executor.spawn_critical_async(
                    "broadcast::processor",
                    processor.run(executor.shutdown_guard()),
                );

                let notifier = Arc::new(NotificationWorker::new(
                    config.internal_id.clone(),
                    functions.clone(),
                    store.clone(),
                    keys.clone(),
                    config.verification_notifications.clone(),
                ));
                executor.spawn_critical_async(
                    "broadcast::notifier",
                    notifier.run(executor.shutdown_guard()),
                );
            }
        }
        2 => {
            let actions = L2Actions::new(
                config.internal_id.clone(),
                level_queue(),
                chainer(),
                blocks.clone(),
                keys.clone(),
                matchmaking.clone(),
                dispatcher(),
                config.pow_difficulty,
            );
            executor.spawn_critical_async(
                "processor::l2",
                run_actions_loop(actions, PROCESSOR_PERIOD, executor.shutdown_guard()),
            );
        }
        3 => {
            let actions = L3Actions::new(
                config.internal_id.clone(),
                level_queue(),
                chainer(),
                blocks.clone(),
                keys.clone(),
                matchmaking.clone(),
                dispatcher(),
                config.pow_difficulty,
            );
            executor.spawn_critical_async(
                "processor::l3",
                run_actions_loop(actions, PROCESSOR_PERIOD, executor.shutdown_guard()),
            );
        }
        4 => {
            let actions = L4Actions::new(
                config.internal_id.clone(),
                level_queue(),
                chainer(),
                blocks.clone(),
                keys.clone(),
                matchmaking.clone(),
                dispatcher(),
                config.pow_difficulty,
            );
            executor.spawn_critical_async(
                "processor::l4",
                run_actions_loop(actions, PROCESSOR_PERIOD, executor.shutdown_guard()),
            );
        }
        5 => {
            let engine = AnchorEngine::new(
                config.internal_id.clone(),
                config.broadcast_interval_hours,
                keys.clone(),
                level_queue(),
                store.clone(),
                blocks.clone(),
                default_interchain.expect("checked above for level 5"),
                matchmaking.clone(),
                functions.clone(),
            );
            executor.spawn_critical_async(
                "anchor::engine",
                run_actions_loop(engine, ANCHOR_PERIOD, executor.shutdown_guard()),
            );
        }
        _ => unreachable!("level validated above"),
    }

    if let Some(failure) = manager.monitor().await {
        anyhow::bail!("critical task {} failed: {}", failure.name, failure.error);
    }
    Ok(())
}
