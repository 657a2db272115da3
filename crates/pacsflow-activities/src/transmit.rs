//! Send one file to a remote peer through the network coordinator

use crate::activity::{Activity, ActivityContext, ActivityError, ItemOutcome};
use pacsflow_core::ResourceClass;
use pacsflow_net::{NetError, NetworkCoordinator};
use std::sync::Arc;

/// Used by both export and sync. Retry and audit happen inside the
/// coordinator; a store that still fails settles the item as failed.
pub struct TransmitActivity {
    coordinator: Arc<NetworkCoordinator>,
    peer_id: String,
}

impl TransmitActivity {
    pub fn new(coordinator: Arc<NetworkCoordinator>, peer_id: impl Into<String>) -> Self {
        Self {
            coordinator,
            peer_id: peer_id.into(),
        }
    }
}

#[async_trait::async_trait]
impl Activity for TransmitActivity {
    fn name(&self) -> &str {
        "transmit"
    }

    fn resources(&self) -> Vec<ResourceClass> {
        vec![ResourceClass::NetworkConnection]
    }

    fn describe(&self, item: &str) -> String {
        format!("Sending {} to {}", item, self.peer_id)
    }

    async fn run(&self, ctx: &ActivityContext, item: &str) -> Result<ItemOutcome, ActivityError> {
        let items = [item.to_string()];
        match self
            .coordinator
            .store(&self.peer_id, &items, ctx.workflow_id, &ctx.cancel)
            .await
        {
            Ok(receipt) if receipt.stored > 0 => Ok(ItemOutcome::Processed),
            Ok(receipt) => Ok(ItemOutcome::failed(
                receipt
                    .warnings
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "peer stored nothing".to_string()),
            )),
            Err(NetError::Cancelled) => Err(ActivityError::Cancelled),
            Err(e) => Ok(ItemOutcome::Failed(e.to_string())),
        }
    }
}
