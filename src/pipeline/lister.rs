use anyhow::Result;
use async_channel::Sender;
use tracing::trace;

use crate::storage::Storage;
use crate::types::ObjectEntry;

/// Drives one storage's inventory into a channel. Entries arrive in the
/// storage's listing order; no global ordering is assumed downstream.
pub struct ObjectLister {
    storage: Storage,
    sender: Sender<ObjectEntry>,
}

impl ObjectLister {
    pub fn new(storage: Storage, sender: Sender<ObjectEntry>) -> Self {
        Self { storage, sender }
    }

    pub async fn list(&self, max_keys: i32) -> Result<()> {
        trace!("object listing has started.");

        self.storage.list_objects(&self.sender, max_keys).await?;

        trace!("object listing has been completed.");
        Ok(())
    }
}
