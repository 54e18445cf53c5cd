use anyhow::Result;
use async_trait::async_trait;

use crate::types::{ObjectPair, SkipReason};

pub mod hash;
pub mod size_and_modification;
pub mod size_only;

pub use hash::{FsObjectOpener, HashStrategy, LocalObjectOpener};
pub use size_and_modification::SizeAndModificationStrategy;
pub use size_only::SizeOnlyStrategy;

pub type Strategy = Box<dyn SyncStrategy + Send + Sync>;

/// Decides whether a source/destination pair needs a transfer. `None`
/// means copy; a reason means skip.
#[async_trait]
pub trait SyncStrategy {
    async fn should_sync(&self, pair: &ObjectPair) -> Result<Option<SkipReason>>;
}

/// Strategy selection. Size-only wins over hash; hash wins over the
/// default size and modification time comparison.
pub fn create_strategy(size_only: bool, hash_only: bool) -> Strategy {
    if size_only {
        SizeOnlyStrategy::boxed_new()
    } else if hash_only {
        HashStrategy::boxed_new(Box::new(FsObjectOpener))
    } else {
        SizeAndModificationStrategy::boxed_new()
    }
}
