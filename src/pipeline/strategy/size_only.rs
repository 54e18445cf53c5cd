use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::pipeline::strategy::{Strategy, SyncStrategy};
use crate::types::{ObjectPair, SkipReason};

/// Compares object sizes only.
pub struct SizeOnlyStrategy;

const STRATEGY_NAME: &str = "SizeOnlyStrategy";

#[async_trait]
impl SyncStrategy for SizeOnlyStrategy {
    async fn should_sync(&self, pair: &ObjectPair) -> Result<Option<SkipReason>> {
        if pair.source.size == pair.destination.size {
            debug!(
                name = STRATEGY_NAME,
                key = pair.source.key,
                size = pair.source.size,
                "object skipped."
            );

            return Ok(Some(SkipReason::SizesMatch));
        }

        Ok(None)
    }
}

impl SizeOnlyStrategy {
    pub fn boxed_new() -> Strategy {
        Box::new(SizeOnlyStrategy {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::strategy::test_util::remote_pair;
    use chrono::Utc;

    #[tokio::test]
    async fn skip_when_sizes_match() {
        init_dummy_tracing_subscriber();

        let strategy = SizeOnlyStrategy::boxed_new();
        let pair = remote_pair((100, 100), (Utc::now(), Utc::now()), (None, None));

        assert_eq!(
            strategy.should_sync(&pair).await.unwrap(),
            Some(SkipReason::SizesMatch)
        );
    }

    #[tokio::test]
    async fn copy_when_sizes_differ() {
        init_dummy_tracing_subscriber();

        let strategy = SizeOnlyStrategy::boxed_new();
        let pair = remote_pair((100, 99), (Utc::now(), Utc::now()), (None, None));

        assert_eq!(strategy.should_sync(&pair).await.unwrap(), None);
    }

    fn init_dummy_tracing_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("dummy=trace")
            .try_init();
    }
}
