use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Error, Result};
use async_channel::Receiver;
use tracing::{debug, error, info, trace, warn};

use crate::storage::Storage;
use crate::transfer::retry::{RetryConfig, TracingRetryObserver, with_retry};
use crate::types::error::{TransferErrorKind, classify_error, should_stop_sync};
use crate::types::token::PipelineCancellationToken;
use crate::types::{ObjectEntry, SyncPlanItem, SyncStatistics};

/// Executes plan items from the shared plan channel. Copies run through the
/// generic transfer path: source reader into destination writer, each
/// attempt under the retry controller, bandwidth limiting threaded through
/// the storage streams.
pub struct SyncWorker {
    worker_index: u16,
    source: Storage,
    destination: Storage,
    receiver: Receiver<SyncPlanItem>,
    retry_config: RetryConfig,
    exit_on_error: bool,
    cancellation_token: PipelineCancellationToken,
    has_error: Arc<AtomicBool>,
    errors: Arc<Mutex<VecDeque<Error>>>,
}

impl SyncWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_index: u16,
        source: Storage,
        destination: Storage,
        receiver: Receiver<SyncPlanItem>,
        retry_config: RetryConfig,
        exit_on_error: bool,
        cancellation_token: PipelineCancellationToken,
        has_error: Arc<AtomicBool>,
        errors: Arc<Mutex<VecDeque<Error>>>,
    ) -> Self {
        Self {
            worker_index,
            source,
            destination,
            receiver,
            retry_config,
            exit_on_error,
            cancellation_token,
            has_error,
            errors,
        }
    }

    pub async fn execute(&self) -> Result<()> {
        trace!(worker_index = self.worker_index, "sync worker has started.");

        loop {
            // cancellation wins over available plan items, so no new item
            // starts after the token fires
            tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => {
                    info!(worker_index = self.worker_index, "sync worker has been cancelled.");
                    return Ok(());
                },
                recv_result = self.receiver.recv() => {
                    match recv_result {
                        Ok(plan_item) => {
                            if let Err(e) = self.execute_item(plan_item).await {
                                if should_stop_sync(&e, self.exit_on_error) {
                                    self.cancellation_token.cancel();
                                    error!(
                                        worker_index = self.worker_index,
                                        error = e.to_string(),
                                        "sync worker has been cancelled with error."
                                    );
                                    return Err(e);
                                }

                                self.record_error(e);
                            }
                        },
                        Err(_) => {
                            // normal shutdown
                            trace!(worker_index = self.worker_index, "sync worker has been completed.");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn execute_item(&self, plan_item: SyncPlanItem) -> Result<()> {
        match plan_item {
            SyncPlanItem::Copy { source, .. } => self.copy_object(source).await,
            SyncPlanItem::Delete { key, .. } => self.delete_object(&key).await,
        }
    }

    async fn copy_object(&self, source_entry: ObjectEntry) -> Result<()> {
        let key = source_entry.key.clone();
        let observer = TracingRetryObserver;

        let result = {
            let source_entry = &source_entry;
            with_retry(
                &self.retry_config,
                &self.cancellation_token,
                &observer,
                "copy",
                move || async move {
                    let reader = self.source.get_object_reader(&source_entry.key).await?;
                    self.destination
                        .put_object(
                            &source_entry.key,
                            reader,
                            source_entry.size as u64,
                            Some(source_entry.last_modified),
                        )
                        .await
                },
            )
            .await
        };

        if let Err(e) = result {
            // the source object can disappear between listing and transfer
            if classify_error(&e) == TransferErrorKind::NoObjectFound {
                self.destination
                    .send_stats(SyncStatistics::SyncWarning { key: key.clone() })
                    .await;
                warn!(
                    worker_index = self.worker_index,
                    key = key,
                    error = e.to_string(),
                    "object not found. skipping."
                );

                return Ok(());
            }

            self.destination
                .send_stats(SyncStatistics::SyncError { key: key.clone() })
                .await;
            return Err(e.context(format!("copy failed. key={key}.")));
        }

        self.destination
            .send_stats(SyncStatistics::SyncComplete { key: key.clone() })
            .await;

        debug!(
            worker_index = self.worker_index,
            key = key,
            size = source_entry.size,
            "object copied."
        );

        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        if let Err(e) = self.destination.delete_object(key).await {
            self.destination
                .send_stats(SyncStatistics::SyncError {
                    key: key.to_string(),
                })
                .await;
            return Err(e.context(format!("delete failed. key={key}.")));
        }

        self.destination
            .send_stats(SyncStatistics::SyncDelete {
                key: key.to_string(),
            })
            .await;

        debug!(worker_index = self.worker_index, key = key, "object deleted.");

        Ok(())
    }

    fn record_error(&self, e: Error) {
        self.has_error.store(true, Ordering::SeqCst);

        warn!(
            worker_index = self.worker_index,
            error = e.to_string(),
            source = e.source(),
            "plan item failed, continuing."
        );

        self.errors.lock().unwrap().push_back(e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::local::LocalStorageFactory;
    use crate::storage::{StorageFactory, StorageTrait};
    use crate::types::token::create_pipeline_cancellation_token;
    use crate::types::{ObjectUrl, StoragePath};
    use chrono::Utc;
    use std::collections::HashMap;
    use std::path::PathBuf;

    async fn local_storage(root: PathBuf) -> (Storage, async_channel::Receiver<SyncStatistics>) {
        let (stats_sender, stats_receiver) = async_channel::unbounded();
        let storage = LocalStorageFactory::create(
            StoragePath::Local(root),
            create_pipeline_cancellation_token(),
            stats_sender,
            None,
            None,
        )
        .await;

        (storage, stats_receiver)
    }

    fn worker(
        source: Storage,
        destination: Storage,
        receiver: Receiver<SyncPlanItem>,
        exit_on_error: bool,
        cancellation_token: PipelineCancellationToken,
    ) -> SyncWorker {
        SyncWorker::new(
            0,
            source,
            destination,
            receiver,
            RetryConfig {
                max_retries: 0,
                ..Default::default()
            },
            exit_on_error,
            cancellation_token,
            Arc::new(AtomicBool::new(false)),
            Arc::new(Mutex::new(VecDeque::new())),
        )
    }

    #[tokio::test]
    async fn copy_and_delete_plan_items() {
        init_dummy_tracing_subscriber();

        let source_dir = tempfile::tempdir().unwrap();
        let destination_dir = tempfile::tempdir().unwrap();
        std::fs::write(source_dir.path().join("data1"), b"test data").unwrap();
        std::fs::write(destination_dir.path().join("stale"), b"stale").unwrap();

        let (source, _source_stats) = local_storage(source_dir.path().to_path_buf()).await;
        let (destination, destination_stats) =
            local_storage(destination_dir.path().to_path_buf()).await;

        let source_entry = source.stat_object("data1").await.unwrap();

        let (plan_sender, plan_receiver) = async_channel::bounded(10);
        plan_sender
            .send(SyncPlanItem::Copy {
                destination: ObjectUrl::Local(destination_dir.path().join("data1")),
                source: source_entry,
            })
            .await
            .unwrap();
        plan_sender
            .send(SyncPlanItem::Delete {
                key: "stale".to_string(),
                url: ObjectUrl::Local(destination_dir.path().join("stale")),
            })
            .await
            .unwrap();
        plan_sender.close();

        let worker = worker(
            source,
            destination,
            plan_receiver,
            false,
            create_pipeline_cancellation_token(),
        );
        worker.execute().await.unwrap();

        assert_eq!(
            std::fs::read(destination_dir.path().join("data1")).unwrap(),
            b"test data"
        );
        assert!(!destination_dir.path().join("stale").exists());

        let mut seen = HashMap::new();
        while let Ok(stats) = destination_stats.try_recv() {
            *seen.entry(std::mem::discriminant(&stats)).or_insert(0) += 1;
        }
        assert_eq!(
            seen[&std::mem::discriminant(&SyncStatistics::SyncComplete {
                key: String::new()
            })],
            1
        );
        assert_eq!(
            seen[&std::mem::discriminant(&SyncStatistics::SyncDelete {
                key: String::new()
            })],
            1
        );
    }

    #[tokio::test]
    async fn missing_source_object_is_benign() {
        init_dummy_tracing_subscriber();

        let source_dir = tempfile::tempdir().unwrap();
        let destination_dir = tempfile::tempdir().unwrap();

        let (source, _source_stats) = local_storage(source_dir.path().to_path_buf()).await;
        let (destination, destination_stats) =
            local_storage(destination_dir.path().to_path_buf()).await;

        let (plan_sender, plan_receiver) = async_channel::bounded(10);
        plan_sender
            .send(SyncPlanItem::Copy {
                destination: ObjectUrl::Local(destination_dir.path().join("missing")),
                source: ObjectEntry {
                    key: "missing".to_string(),
                    url: ObjectUrl::Local(source_dir.path().join("missing")),
                    size: 1,
                    last_modified: Utc::now(),
                    e_tag: None,
                },
            })
            .await
            .unwrap();
        plan_sender.close();

        let cancellation_token = create_pipeline_cancellation_token();
        let worker = worker(
            source,
            destination,
            plan_receiver,
            false,
            cancellation_token.clone(),
        );

        // the vanished object is skipped with a warning, not recorded as
        // an error
        worker.execute().await.unwrap();
        assert!(!cancellation_token.is_cancelled());
        assert!(!worker.has_error.load(Ordering::SeqCst));
        assert!(worker.errors.lock().unwrap().is_empty());

        let mut warnings = 0;
        while let Ok(stats) = destination_stats.try_recv() {
            assert!(!matches!(stats, SyncStatistics::SyncError { .. }));
            if matches!(stats, SyncStatistics::SyncWarning { .. }) {
                warnings += 1;
            }
        }
        assert_eq!(warnings, 1);
    }

    #[tokio::test]
    async fn exit_on_error_cancels_the_pipeline() {
        init_dummy_tracing_subscriber();

        let source_dir = tempfile::tempdir().unwrap();
        let destination_dir = tempfile::tempdir().unwrap();
        // remove_file on a directory fails with a non-benign error
        std::fs::create_dir(destination_dir.path().join("blocked")).unwrap();

        let (source, _source_stats) = local_storage(source_dir.path().to_path_buf()).await;
        let (destination, _destination_stats) =
            local_storage(destination_dir.path().to_path_buf()).await;

        let (plan_sender, plan_receiver) = async_channel::bounded(10);
        plan_sender
            .send(SyncPlanItem::Delete {
                key: "blocked".to_string(),
                url: ObjectUrl::Local(destination_dir.path().join("blocked")),
            })
            .await
            .unwrap();
        plan_sender.close();

        let cancellation_token = create_pipeline_cancellation_token();
        let worker = worker(
            source,
            destination,
            plan_receiver,
            true,
            cancellation_token.clone(),
        );

        assert!(worker.execute().await.is_err());
        assert!(cancellation_token.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_worker_starts_no_new_items() {
        init_dummy_tracing_subscriber();

        let source_dir = tempfile::tempdir().unwrap();
        let destination_dir = tempfile::tempdir().unwrap();
        std::fs::write(source_dir.path().join("data1"), b"test data").unwrap();

        let (source, _source_stats) = local_storage(source_dir.path().to_path_buf()).await;
        let (destination, _destination_stats) =
            local_storage(destination_dir.path().to_path_buf()).await;

        let source_entry = source.stat_object("data1").await.unwrap();

        let (plan_sender, plan_receiver) = async_channel::bounded(10);
        plan_sender
            .send(SyncPlanItem::Copy {
                destination: ObjectUrl::Local(destination_dir.path().join("data1")),
                source: source_entry,
            })
            .await
            .unwrap();

        let cancellation_token = create_pipeline_cancellation_token();
        cancellation_token.cancel();

        let worker = worker(
            source,
            destination,
            plan_receiver,
            false,
            cancellation_token,
        );
        worker.execute().await.unwrap();

        assert!(!destination_dir.path().join("data1").exists());
    }

    fn init_dummy_tracing_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("dummy=trace")
            .try_init();
    }
}
