//! Anonymize one instance under a de-identification profile

use crate::activity::{Activity, ActivityContext, ActivityError, ItemOutcome};
use crate::collaborators::Anonymizer;
use crate::import::settle;
use pacsflow_core::ResourceClass;
use std::sync::Arc;
use tracing::debug;

pub struct AnonymizeInstanceActivity {
    anonymizer: Arc<dyn Anonymizer>,
    profile_id: String,
}

impl AnonymizeInstanceActivity {
    pub fn new(anonymizer: Arc<dyn Anonymizer>, profile_id: impl Into<String>) -> Self {
        Self {
            anonymizer,
            profile_id: profile_id.into(),
        }
    }
}

#[async_trait::async_trait]
impl Activity for AnonymizeInstanceActivity {
    fn name(&self) -> &str {
        "anonymize-instance"
    }

    fn resources(&self) -> Vec<ResourceClass> {
        vec![ResourceClass::AnonymizationWorker]
    }

    fn describe(&self, item: &str) -> String {
        format!("Anonymizing {}", item)
    }

    async fn run(&self, ctx: &ActivityContext, item: &str) -> Result<ItemOutcome, ActivityError> {
        if ctx.cancel.is_cancelled() {
            return Err(ActivityError::Cancelled);
        }
        let result = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(ActivityError::Cancelled),
            r = self.anonymizer.anonymize_dataset(item, &self.profile_id) => r,
        };
        match result {
            Ok(done) => {
                debug!(
                    workflow_id = %ctx.workflow_id,
                    original = %done.original_uid,
                    anonymized = %done.anonymized_uid,
                    "Instance anonymized"
                );
                Ok(ItemOutcome::Processed)
            }
            Err(e) => settle(self.name(), e),
        }
    }
}
