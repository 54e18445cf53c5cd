use anyhow::{Result, anyhow};
use async_channel::{Receiver, Sender};
use tracing::{debug, trace};

use crate::pipeline::strategy::Strategy;
use crate::types::token::PipelineCancellationToken;
use crate::types::{ObjectEntry, ObjectPair, StoragePath, SyncPlanItem, SyncStatistics};

/// Turns the three diff streams into concrete plan items. The planner is
/// the single point enforcing the max-delete safety cap: destination-only
/// entries are buffered until the copy streams drain, counted, and either
/// all emitted or all refused.
pub struct SyncPlanner {
    strategy: Strategy,
    destination_root: StoragePath,
    delete: bool,
    max_delete: i64,
    cancellation_token: PipelineCancellationToken,
    stats_sender: Sender<SyncStatistics>,
}

impl SyncPlanner {
    pub fn new(
        strategy: Strategy,
        destination_root: StoragePath,
        delete: bool,
        max_delete: i64,
        cancellation_token: PipelineCancellationToken,
        stats_sender: Sender<SyncStatistics>,
    ) -> Self {
        Self {
            strategy,
            destination_root,
            delete,
            max_delete,
            cancellation_token,
            stats_sender,
        }
    }

    pub async fn plan(
        &self,
        only_source: Receiver<ObjectEntry>,
        only_destination: Receiver<ObjectEntry>,
        common: Receiver<ObjectPair>,
        plan_sender: Sender<SyncPlanItem>,
    ) -> Result<()> {
        trace!("sync planner has started.");

        let mut only_source_done = false;
        let mut only_destination_done = false;
        let mut common_done = false;
        let mut deletion_candidates = Vec::new();

        while !(only_source_done && only_destination_done && common_done) {
            tokio::select! {
                recv_result = only_source.recv(), if !only_source_done => {
                    match recv_result {
                        Ok(source_entry) => {
                            let item = SyncPlanItem::Copy {
                                destination: self.destination_root.join(&source_entry.key),
                                source: source_entry,
                            };
                            if !self.send(&plan_sender, item).await {
                                return Ok(());
                            }
                        },
                        Err(_) => only_source_done = true,
                    }
                },
                recv_result = common.recv(), if !common_done => {
                    match recv_result {
                        Ok(pair) => {
                            match self.strategy.should_sync(&pair).await? {
                                None => {
                                    let item = SyncPlanItem::Copy {
                                        destination: pair.destination.url,
                                        source: pair.source,
                                    };
                                    if !self.send(&plan_sender, item).await {
                                        return Ok(());
                                    }
                                }
                                Some(skip_reason) => {
                                    // an internal sentinel, not an error
                                    debug!(
                                        key = pair.source.key,
                                        reason = %skip_reason,
                                        "object pair skipped."
                                    );
                                    let _ = self
                                        .stats_sender
                                        .send(SyncStatistics::SyncSkip {
                                            key: pair.source.key,
                                        })
                                        .await;
                                }
                            }
                        },
                        Err(_) => common_done = true,
                    }
                },
                recv_result = only_destination.recv(), if !only_destination_done => {
                    match recv_result {
                        Ok(destination_entry) => {
                            if self.delete {
                                deletion_candidates.push(destination_entry);
                            }
                        },
                        Err(_) => only_destination_done = true,
                    }
                },
                _ = self.cancellation_token.cancelled() => {
                    debug!("sync planner has been cancelled.");
                    return Ok(());
                }
            }
        }

        self.emit_deletions(deletion_candidates, &plan_sender).await
    }

    async fn emit_deletions(
        &self,
        deletion_candidates: Vec<ObjectEntry>,
        plan_sender: &Sender<SyncPlanItem>,
    ) -> Result<()> {
        if !self.delete || deletion_candidates.is_empty() {
            trace!("sync planner has been completed.");
            return Ok(());
        }

        let deletions = deletion_candidates.len() as i64;
        if 0 <= self.max_delete && self.max_delete < deletions {
            return Err(anyhow!(
                "refusing to delete {} files; more than max-delete limit of {}",
                deletions,
                self.max_delete
            ));
        }

        for destination_entry in deletion_candidates {
            let item = SyncPlanItem::Delete {
                key: destination_entry.key,
                url: destination_entry.url,
            };
            if !self.send(plan_sender, item).await {
                return Ok(());
            }
        }

        trace!("sync planner has been completed.");
        Ok(())
    }

    // Returns false when cancelled or the consumer is gone. The sender is
    // dropped by the caller only after this task returns.
    async fn send(&self, plan_sender: &Sender<SyncPlanItem>, item: SyncPlanItem) -> bool {
        tokio::select! {
            send_result = plan_sender.send(item) => send_result.is_ok(),
            _ = self.cancellation_token.cancelled() => {
                debug!("sync planner has been cancelled.");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::strategy::create_strategy;
    use crate::types::token::create_pipeline_cancellation_token;
    use crate::types::{ObjectUrl, SkipReason};
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};

    fn entry(key: &str, size: i64, last_modified: DateTime<Utc>) -> ObjectEntry {
        ObjectEntry {
            key: key.to_string(),
            url: ObjectUrl::Remote {
                bucket: "target-bucket".to_string(),
                key: key.to_string(),
            },
            size,
            last_modified,
            e_tag: None,
        }
    }

    fn test_stats_sender() -> Sender<SyncStatistics> {
        async_channel::unbounded().0
    }

    fn destination_root() -> StoragePath {
        StoragePath::S3 {
            bucket: "target-bucket".to_string(),
            prefix: "".to_string(),
        }
    }

    struct PlanInput {
        only_source: Vec<ObjectEntry>,
        only_destination: Vec<ObjectEntry>,
        common: Vec<ObjectPair>,
    }

    async fn run_plan(
        planner: SyncPlanner,
        input: PlanInput,
    ) -> (Result<()>, Vec<SyncPlanItem>) {
        let (only_source_sender, only_source_receiver) = async_channel::bounded(1000);
        let (only_destination_sender, only_destination_receiver) = async_channel::bounded(1000);
        let (common_sender, common_receiver) = async_channel::bounded(1000);
        let (plan_sender, plan_receiver) = async_channel::bounded(1000);

        for entry in input.only_source {
            only_source_sender.send(entry).await.unwrap();
        }
        only_source_sender.close();
        for entry in input.only_destination {
            only_destination_sender.send(entry).await.unwrap();
        }
        only_destination_sender.close();
        for pair in input.common {
            common_sender.send(pair).await.unwrap();
        }
        common_sender.close();

        let result = planner
            .plan(
                only_source_receiver,
                only_destination_receiver,
                common_receiver,
                plan_sender,
            )
            .await;

        let mut items = Vec::new();
        while let Ok(item) = plan_receiver.recv().await {
            items.push(item);
        }

        (result, items)
    }

    #[tokio::test]
    async fn source_only_entries_become_copies() {
        init_dummy_tracing_subscriber();

        let planner = SyncPlanner::new(
            create_strategy(false, false),
            destination_root(),
            false,
            -1,
            create_pipeline_cancellation_token(),
            test_stats_sender(),
        );

        let now = Utc::now();
        let (result, items) = run_plan(
            planner,
            PlanInput {
                only_source: vec![entry("dir1/data1", 6, now)],
                only_destination: vec![],
                common: vec![],
            },
        )
        .await;

        result.unwrap();
        assert_eq!(items.len(), 1);
        let SyncPlanItem::Copy {
            source,
            destination,
        } = &items[0]
        else {
            panic!("expected a copy item.")
        };
        assert_eq!(source.key, "dir1/data1");
        assert_eq!(destination.to_string(), "s3://target-bucket/dir1/data1");
    }

    #[tokio::test]
    async fn common_pairs_follow_the_strategy() {
        init_dummy_tracing_subscriber();

        let planner = SyncPlanner::new(
            create_strategy(false, false),
            destination_root(),
            false,
            -1,
            create_pipeline_cancellation_token(),
            test_stats_sender(),
        );

        let now = Utc::now();
        let newer_source = ObjectPair {
            source: entry("copy-me", 100, now + Duration::hours(1)),
            destination: entry("copy-me", 100, now),
        };
        let same = ObjectPair {
            source: entry("skip-me", 100, now),
            destination: entry("skip-me", 100, now),
        };

        let (result, items) = run_plan(
            planner,
            PlanInput {
                only_source: vec![],
                only_destination: vec![],
                common: vec![newer_source, same],
            },
        )
        .await;

        result.unwrap();
        assert_eq!(items.len(), 1);
        assert!(matches!(
            &items[0],
            SyncPlanItem::Copy { source, .. } if source.key == "copy-me"
        ));
    }

    #[tokio::test]
    async fn destination_only_entries_dropped_without_delete() {
        init_dummy_tracing_subscriber();

        let planner = SyncPlanner::new(
            create_strategy(false, false),
            destination_root(),
            false,
            -1,
            create_pipeline_cancellation_token(),
            test_stats_sender(),
        );

        let (result, items) = run_plan(
            planner,
            PlanInput {
                only_source: vec![],
                only_destination: vec![entry("stale", 1, Utc::now())],
                common: vec![],
            },
        )
        .await;

        result.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn destination_only_entries_deleted_with_delete() {
        init_dummy_tracing_subscriber();

        let planner = SyncPlanner::new(
            create_strategy(false, false),
            destination_root(),
            true,
            -1,
            create_pipeline_cancellation_token(),
            test_stats_sender(),
        );

        let (result, items) = run_plan(
            planner,
            PlanInput {
                only_source: vec![],
                only_destination: vec![entry("stale1", 1, Utc::now()), entry("stale2", 1, Utc::now())],
                common: vec![],
            },
        )
        .await;

        result.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|item| matches!(item, SyncPlanItem::Delete { .. })));
    }

    #[tokio::test]
    async fn max_delete_refusal_emits_no_deletes_and_one_error() {
        init_dummy_tracing_subscriber();

        let planner = SyncPlanner::new(
            create_strategy(false, false),
            destination_root(),
            true,
            3,
            create_pipeline_cancellation_token(),
            test_stats_sender(),
        );

        let now = Utc::now();
        let (result, items) = run_plan(
            planner,
            PlanInput {
                only_source: vec![],
                only_destination: (0..5).map(|i| entry(&format!("stale{i}"), 1, now)).collect(),
                common: vec![],
            },
        )
        .await;

        assert_eq!(
            result.unwrap_err().to_string(),
            "refusing to delete 5 files; more than max-delete limit of 3"
        );
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn max_delete_boundary_cases() {
        init_dummy_tracing_subscriber();

        let now = Utc::now();

        // at the exact limit everything is deleted
        let planner = SyncPlanner::new(
            create_strategy(false, false),
            destination_root(),
            true,
            2,
            create_pipeline_cancellation_token(),
            test_stats_sender(),
        );
        let (result, items) = run_plan(
            planner,
            PlanInput {
                only_source: vec![],
                only_destination: vec![entry("stale1", 1, now), entry("stale2", 1, now)],
                common: vec![],
            },
        )
        .await;
        result.unwrap();
        assert_eq!(items.len(), 2);

        // a zero limit with nothing to delete is fine
        let planner = SyncPlanner::new(
            create_strategy(false, false),
            destination_root(),
            true,
            0,
            create_pipeline_cancellation_token(),
            test_stats_sender(),
        );
        let (result, items) = run_plan(
            planner,
            PlanInput {
                only_source: vec![],
                only_destination: vec![],
                common: vec![],
            },
        )
        .await;
        result.unwrap();
        assert!(items.is_empty());

        // a zero limit with one candidate refuses
        let planner = SyncPlanner::new(
            create_strategy(false, false),
            destination_root(),
            true,
            0,
            create_pipeline_cancellation_token(),
            test_stats_sender(),
        );
        let (result, _) = run_plan(
            planner,
            PlanInput {
                only_source: vec![],
                only_destination: vec![entry("stale1", 1, now)],
                common: vec![],
            },
        )
        .await;
        assert_eq!(
            result.unwrap_err().to_string(),
            "refusing to delete 1 files; more than max-delete limit of 0"
        );
    }

    #[tokio::test]
    async fn size_only_pair_emits_nothing() {
        init_dummy_tracing_subscriber();

        let planner = SyncPlanner::new(
            create_strategy(true, false),
            destination_root(),
            false,
            -1,
            create_pipeline_cancellation_token(),
            test_stats_sender(),
        );

        let now = Utc::now();
        let pair = ObjectPair {
            source: entry("data1", 100, now + Duration::hours(1)),
            destination: entry("data1", 100, now),
        };

        let (result, items) = run_plan(
            planner,
            PlanInput {
                only_source: vec![],
                only_destination: vec![],
                common: vec![pair],
            },
        )
        .await;

        result.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn cancelled_planner_returns_promptly() {
        init_dummy_tracing_subscriber();

        let cancellation_token = create_pipeline_cancellation_token();
        cancellation_token.cancel();

        let planner = SyncPlanner::new(
            create_strategy(false, false),
            destination_root(),
            true,
            -1,
            cancellation_token,
            test_stats_sender(),
        );

        let (_only_source_sender, only_source_receiver) =
            async_channel::bounded::<ObjectEntry>(10);
        let (_only_destination_sender, only_destination_receiver) =
            async_channel::bounded::<ObjectEntry>(10);
        let (_common_sender, common_receiver) = async_channel::bounded::<ObjectPair>(10);
        let (plan_sender, _plan_receiver) = async_channel::bounded(10);

        planner
            .plan(
                only_source_receiver,
                only_destination_receiver,
                common_receiver,
                plan_sender,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn strategy_errors_propagate() {
        init_dummy_tracing_subscriber();

        struct FailingStrategy;

        #[async_trait]
        impl crate::pipeline::strategy::SyncStrategy for FailingStrategy {
            async fn should_sync(&self, _pair: &ObjectPair) -> Result<Option<SkipReason>> {
                Err(anyhow!("strategy failed"))
            }
        }

        let planner = SyncPlanner::new(
            Box::new(FailingStrategy),
            destination_root(),
            false,
            -1,
            create_pipeline_cancellation_token(),
            test_stats_sender(),
        );

        let now = Utc::now();
        let pair = ObjectPair {
            source: entry("data1", 100, now),
            destination: entry("data1", 100, now),
        };

        let (result, _) = run_plan(
            planner,
            PlanInput {
                only_source: vec![],
                only_destination: vec![],
                common: vec![pair],
            },
        )
        .await;

        assert!(result.is_err());
    }

    fn init_dummy_tracing_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("dummy=trace")
            .try_init();
    }
}
