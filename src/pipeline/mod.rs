use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Error;
use async_channel::Receiver;
use tracing::error;

use crate::Config;
use crate::config::ClientConfig;
use crate::pipeline::differ::InventoryDiffer;
use crate::pipeline::lister::ObjectLister;
use crate::pipeline::planner::SyncPlanner;
use crate::pipeline::strategy::create_strategy;
use crate::pipeline::worker::SyncWorker;
use crate::storage::local::LocalStorageFactory;
use crate::storage::s3::S3StorageFactory;
use crate::storage::{Storage, StorageFactory};
use crate::transfer::bandwidth::{BandwidthLimit, BandwidthLimiter};
use crate::types::error::{is_cancelled_error, should_stop_sync};
use crate::types::token::PipelineCancellationToken;
use crate::types::{StoragePath, SyncStatistics};

const CHANNEL_CAPACITY: usize = 20000;

pub mod differ;
pub mod lister;
pub mod planner;
pub mod strategy;
pub mod worker;

/// The sync engine: two listers feed the differ, the differ feeds the
/// planner, the planner feeds a pool of transfer workers. All stages run
/// as independent tasks over bounded channels and race one shared
/// cancellation token.
pub struct Pipeline {
    config: Config,
    source: Storage,
    destination: Storage,
    cancellation_token: PipelineCancellationToken,
    stats_receiver: Receiver<SyncStatistics>,
    has_error: Arc<AtomicBool>,
    errors: Arc<Mutex<VecDeque<Error>>>,
    ready: bool,
}

impl Pipeline {
    pub async fn new(config: Config, cancellation_token: PipelineCancellationToken) -> Self {
        let (stats_sender, stats_receiver) = async_channel::unbounded();

        // process-wide token bucket shared by both sides
        let rate_limiter = config
            .bandwidth_limit
            .as_deref()
            .map(|limit| BandwidthLimit::parse(limit).expect("bandwidth limit must be validated"))
            .and_then(|limit| limit.map(|limit| Arc::new(BandwidthLimiter::new(limit))));

        let sync_config = config.sync_config();
        let source = create_storage(
            sync_config.source.clone(),
            cancellation_token.clone(),
            stats_sender.clone(),
            rate_limiter.clone(),
        )
        .await;
        let destination = create_storage(
            sync_config.destination.clone(),
            cancellation_token.clone(),
            stats_sender,
            rate_limiter,
        )
        .await;

        Self {
            config,
            source,
            destination,
            cancellation_token,
            stats_receiver,
            has_error: Arc::new(AtomicBool::new(false)),
            errors: Arc::new(Mutex::new(VecDeque::<Error>::new())),
            ready: true,
        }
    }

    pub async fn run(&mut self) {
        if !self.ready {
            panic!("it can be executed only once.")
        }
        self.ready = false;

        let sync_config = self.config.sync_config().clone();
        let mut join_handles = Vec::new();

        let (source_entry_sender, source_entry_receiver) =
            async_channel::bounded(CHANNEL_CAPACITY);
        let (destination_entry_sender, destination_entry_receiver) =
            async_channel::bounded(CHANNEL_CAPACITY);
        let (only_source_sender, only_source_receiver) = async_channel::bounded(CHANNEL_CAPACITY);
        let (only_destination_sender, only_destination_receiver) =
            async_channel::bounded(CHANNEL_CAPACITY);
        let (common_sender, common_receiver) = async_channel::bounded(CHANNEL_CAPACITY);
        let (plan_sender, plan_receiver) = async_channel::bounded(CHANNEL_CAPACITY);

        {
            let lister = ObjectLister::new(
                dyn_clone::clone_box(&*self.source),
                source_entry_sender,
            );
            join_handles.push(self.spawn_listing_task(
                lister,
                sync_config.exit_on_error,
                "list source objects failed.",
            ));
        }
        {
            let lister = ObjectLister::new(
                dyn_clone::clone_box(&*self.destination),
                destination_entry_sender,
            );
            join_handles.push(self.spawn_listing_task(
                lister,
                sync_config.exit_on_error,
                "list destination objects failed.",
            ));
        }

        {
            let differ = InventoryDiffer::new(self.cancellation_token.clone());
            let has_error = self.has_error.clone();
            let errors = self.errors.clone();

            join_handles.push(tokio::spawn(async move {
                let result = differ
                    .diff(
                        source_entry_receiver,
                        destination_entry_receiver,
                        only_source_sender,
                        only_destination_sender,
                        common_sender,
                    )
                    .await;
                if let Err(e) = result {
                    log_error(has_error, errors, e, "inventory difference detection failed.");
                }
            }));
        }

        {
            let strategy = create_strategy(sync_config.size_only, sync_config.hash_only);
            let planner = SyncPlanner::new(
                strategy,
                sync_config.destination.clone(),
                sync_config.delete,
                sync_config.max_delete,
                self.cancellation_token.clone(),
                self.destination.get_stats_sender(),
            );
            let has_error = self.has_error.clone();
            let errors = self.errors.clone();

            join_handles.push(tokio::spawn(async move {
                let result = planner
                    .plan(
                        only_source_receiver,
                        only_destination_receiver,
                        common_receiver,
                        plan_sender,
                    )
                    .await;
                if let Err(e) = result {
                    log_error(has_error, errors, e, "sync planning failed.");
                }
            }));
        }

        for worker_index in 0..self.config.worker_size {
            let worker = SyncWorker::new(
                worker_index,
                dyn_clone::clone_box(&*self.source),
                dyn_clone::clone_box(&*self.destination),
                plan_receiver.clone(),
                self.config.retry_config.clone(),
                sync_config.exit_on_error,
                self.cancellation_token.clone(),
                self.has_error.clone(),
                self.errors.clone(),
            );
            let has_error = self.has_error.clone();
            let errors = self.errors.clone();

            join_handles.push(tokio::spawn(async move {
                let result = worker.execute().await;
                if let Err(e) = result {
                    log_error(has_error, errors, e, "sync worker failed.");
                }
            }));
        }
        drop(plan_receiver);

        for join_handle in join_handles {
            let _ = join_handle.await;
        }

        self.shutdown().await;
    }

    fn spawn_listing_task(
        &self,
        lister: ObjectLister,
        exit_on_error: bool,
        message: &'static str,
    ) -> tokio::task::JoinHandle<()> {
        let has_error = self.has_error.clone();
        let errors = self.errors.clone();
        let cancellation_token = self.cancellation_token.clone();
        let max_keys = self.config.max_keys;

        tokio::spawn(async move {
            let result = lister.list(max_keys).await;
            if let Err(e) = result {
                // a cancelled listing is normal shutdown, not a failure
                if is_cancelled_error(&e) {
                    return;
                }
                if should_stop_sync(&e, exit_on_error) {
                    cancellation_token.cancel();
                }
                log_error(has_error, errors, e, message);
            }
        })
    }

    async fn shutdown(&self) {
        self.close_stats_sender();
    }

    pub fn get_stats_receiver(&self) -> Receiver<SyncStatistics> {
        self.stats_receiver.clone()
    }

    pub fn has_error(&self) -> bool {
        self.has_error.load(Ordering::SeqCst)
    }

    pub fn get_errors_and_consume(&self) -> Option<Vec<Error>> {
        if !self.has_error() {
            return None;
        }

        let error_list = self.errors.clone();
        let mut error_list = error_list.lock().unwrap();

        let mut errors_to_return = Vec::<Error>::new();
        for _ in 0..error_list.len() {
            errors_to_return.push(error_list.pop_front().unwrap());
        }

        Some(errors_to_return)
    }

    // Late stats writes after shutdown fail on the closed channel and are
    // dropped silently by the senders.
    pub fn close_stats_sender(&self) {
        self.source.get_stats_sender().close();
        self.destination.get_stats_sender().close();
    }
}

async fn create_storage(
    storage_path: StoragePath,
    cancellation_token: PipelineCancellationToken,
    stats_sender: async_channel::Sender<SyncStatistics>,
    rate_limiter: Option<Arc<BandwidthLimiter>>,
) -> Storage {
    match &storage_path {
        StoragePath::S3 { .. } => {
            S3StorageFactory::create(
                storage_path,
                cancellation_token,
                stats_sender,
                Some(ClientConfig::default()),
                rate_limiter,
            )
            .await
        }
        StoragePath::Local(_) => {
            LocalStorageFactory::create(
                storage_path,
                cancellation_token,
                stats_sender,
                None,
                rate_limiter,
            )
            .await
        }
    }
}

fn log_error(
    has_error: Arc<AtomicBool>,
    errors: Arc<Mutex<VecDeque<Error>>>,
    e: Error,
    message: &str,
) {
    has_error.store(true, Ordering::SeqCst);

    let error = e.to_string();
    let source = e.source();

    error!(error = error, source = source, message);

    let mut error_list = errors.lock().unwrap();
    error_list.push_back(e);
}
