//! Network operation coordinator
//!
//! Every outbound call to a remote peer goes through here. Each call runs
//! under the retry policy and leaves exactly one audit record, success or
//! failure, before returning. Errors pass through with their kind intact.

use crate::error::{NetError, NetResult};
use crate::peer::{DicomPeer, FindMatch, StoreReceipt};
use crate::retry::{RetryError, RetryPolicy};
use pacsflow_core::{AuditEventType, AuditRecord, AuditSink, FindQuery, WorkflowId};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct NetworkCoordinator {
    peer: Arc<dyn DicomPeer>,
    policy: RetryPolicy,
    audit: Arc<dyn AuditSink>,
}

impl NetworkCoordinator {
    pub fn new(peer: Arc<dyn DicomPeer>, policy: RetryPolicy, audit: Arc<dyn AuditSink>) -> Self {
        Self { peer, policy, audit }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn echo(
        &self,
        peer_id: &str,
        workflow_id: WorkflowId,
        cancel: &CancellationToken,
    ) -> NetResult<()> {
        let result = self
            .policy
            .execute(cancel, || self.peer.echo(peer_id))
            .await
            .map_err(into_net_error);

        let record = match &result {
            Ok(()) => AuditRecord::success(
                AuditEventType::NetworkEcho,
                workflow_id,
                format!("echo {} ok", peer_id),
            ),
            Err(e) => AuditRecord::failure(AuditEventType::NetworkEcho, workflow_id, e.to_string()),
        };
        self.audit
            .log_event(record.with_payload(serde_json::json!({ "peer": peer_id })))
            .await;
        result
    }

    pub async fn store(
        &self,
        peer_id: &str,
        items: &[String],
        workflow_id: WorkflowId,
        cancel: &CancellationToken,
    ) -> NetResult<StoreReceipt> {
        debug!(workflow_id = %workflow_id, peer = peer_id, items = items.len(), "Storing to peer");
        let result = self
            .policy
            .execute(cancel, || self.peer.store(peer_id, items))
            .await
            .map_err(into_net_error);

        let record = match &result {
            Ok(receipt) => {
                info!(workflow_id = %workflow_id, peer = peer_id, stored = receipt.stored, "Store succeeded");
                AuditRecord::success(
                    AuditEventType::NetworkStore,
                    workflow_id,
                    format!("stored {} item(s) to {}", receipt.stored, peer_id),
                )
                .with_payload(serde_json::json!({
                    "peer": peer_id,
                    "items": items.len(),
                    "stored": receipt.stored,
                }))
            }
            Err(e) => AuditRecord::failure(AuditEventType::NetworkStore, workflow_id, e.to_string())
                .with_payload(serde_json::json!({
                    "peer": peer_id,
                    "items": items.len(),
                    "attempts": e.attempts(),
                })),
        };
        self.audit.log_event(record).await;
        result
    }

    pub async fn query(
        &self,
        peer_id: &str,
        query: &FindQuery,
        workflow_id: WorkflowId,
        cancel: &CancellationToken,
    ) -> NetResult<Vec<FindMatch>> {
        let result = self
            .policy
            .execute(cancel, || self.peer.find(peer_id, query))
            .await
            .map_err(into_net_error);

        let record = match &result {
            Ok(matches) => AuditRecord::success(
                AuditEventType::NetworkQuery,
                workflow_id,
                format!("query {} returned {} match(es)", peer_id, matches.len()),
            )
            .with_payload(serde_json::json!({ "peer": peer_id, "matches": matches.len() })),
            Err(e) => AuditRecord::failure(AuditEventType::NetworkQuery, workflow_id, e.to_string())
                .with_payload(serde_json::json!({ "peer": peer_id, "attempts": e.attempts() })),
        };
        self.audit.log_event(record).await;
        result
    }
}

fn into_net_error(e: RetryError<NetError>) -> NetError {
    match e {
        RetryError::Fatal { error, .. } => error,
        RetryError::Exhausted { attempts, error } => NetError::Exhausted {
            attempts,
            last: Box::new(error),
        },
        RetryError::Cancelled { .. } => NetError::Cancelled,
    }
}
