use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::pipeline::strategy::{Strategy, SyncStrategy};
use crate::types::{ObjectPair, SkipReason};

/// The default strategy: the source is the source of truth. A newer source
/// always copies; an equal-or-older source copies only when the sizes
/// differ.
///
///   time: src > dst    size: src != dst    copy
///   time: src > dst    size: src == dst    copy
///   time: src <= dst   size: src != dst    copy
///   time: src <= dst   size: src == dst    skip
pub struct SizeAndModificationStrategy;

const STRATEGY_NAME: &str = "SizeAndModificationStrategy";

#[async_trait]
impl SyncStrategy for SizeAndModificationStrategy {
    async fn should_sync(&self, pair: &ObjectPair) -> Result<Option<SkipReason>> {
        if pair.destination.last_modified < pair.source.last_modified {
            return Ok(None);
        }

        if pair.source.size != pair.destination.size {
            return Ok(None);
        }

        debug!(
            name = STRATEGY_NAME,
            key = pair.source.key,
            source_last_modified = %pair.source.last_modified,
            destination_last_modified = %pair.destination.last_modified,
            size = pair.source.size,
            "object skipped."
        );

        Ok(Some(SkipReason::NewerAndSizesMatch))
    }
}

impl SizeAndModificationStrategy {
    pub fn boxed_new() -> Strategy {
        Box::new(SizeAndModificationStrategy {})
    }
}
