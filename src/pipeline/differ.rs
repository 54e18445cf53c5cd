use std::collections::HashMap;

use anyhow::Result;
use async_channel::{Receiver, Sender};
use tracing::{debug, trace};

use crate::types::token::PipelineCancellationToken;
use crate::types::{ObjectEntry, ObjectPair};

/// Pairs up the source and destination inventories into three streams:
/// entries present only in the source, entries present only in the
/// destination, and common pairs. Entries are keyed by their root-relative
/// key.
pub struct InventoryDiffer {
    cancellation_token: PipelineCancellationToken,
}

impl InventoryDiffer {
    pub fn new(cancellation_token: PipelineCancellationToken) -> Self {
        Self { cancellation_token }
    }

    pub async fn diff(
        &self,
        source: Receiver<ObjectEntry>,
        destination: Receiver<ObjectEntry>,
        only_source: Sender<ObjectEntry>,
        only_destination: Sender<ObjectEntry>,
        common: Sender<ObjectPair>,
    ) -> Result<()> {
        trace!("inventory differ has started.");

        let Some(mut destination_map) = self.aggregate_destination(destination).await else {
            debug!("inventory differ has been cancelled.");
            return Ok(());
        };

        loop {
            tokio::select! {
                recv_result = source.recv() => {
                    match recv_result {
                        Ok(source_entry) => {
                            match destination_map.remove(&source_entry.key) {
                                Some(destination_entry) => {
                                    let pair = ObjectPair {
                                        source: source_entry,
                                        destination: destination_entry,
                                    };
                                    if !self.send(&common, pair).await {
                                        return Ok(());
                                    }
                                }
                                None => {
                                    if !self.send(&only_source, source_entry).await {
                                        return Ok(());
                                    }
                                }
                            }
                        },
                        Err(_) => {
                            // source inventory drained
                            break;
                        }
                    }
                },
                _ = self.cancellation_token.cancelled() => {
                    debug!("inventory differ has been cancelled.");
                    return Ok(());
                }
            }
        }

        for destination_entry in destination_map.into_values() {
            if !self.send(&only_destination, destination_entry).await {
                return Ok(());
            }
        }

        trace!("inventory differ has been completed.");
        Ok(())
    }

    // Returns None on cancellation.
    async fn aggregate_destination(
        &self,
        destination: Receiver<ObjectEntry>,
    ) -> Option<HashMap<String, ObjectEntry>> {
        let mut destination_map = HashMap::new();

        loop {
            tokio::select! {
                recv_result = destination.recv() => {
                    match recv_result {
                        Ok(entry) => {
                            destination_map.insert(entry.key.clone(), entry);
                        },
                        Err(_) => {
                            return Some(destination_map);
                        }
                    }
                },
                _ = self.cancellation_token.cancelled() => {
                    return None;
                }
            }
        }
    }

    // Returns false when cancelled or the consumer is gone.
    async fn send<T>(&self, sender: &Sender<T>, value: T) -> bool {
        tokio::select! {
            send_result = sender.send(value) => send_result.is_ok(),
            _ = self.cancellation_token.cancelled() => {
                debug!("inventory differ has been cancelled.");
                false
            }
        }
    }
}
