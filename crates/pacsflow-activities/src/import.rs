//! Import one file into the local library

use crate::activity::{Activity, ActivityContext, ActivityError, ItemOutcome};
use crate::collaborators::{CollaboratorError, FileImporter};
use pacsflow_core::{ImportOptions, ResourceClass};
use std::sync::Arc;
use tracing::debug;

pub struct ImportFileActivity {
    importer: Arc<dyn FileImporter>,
    options: ImportOptions,
}

impl ImportFileActivity {
    pub fn new(importer: Arc<dyn FileImporter>, options: ImportOptions) -> Self {
        Self { importer, options }
    }
}

#[async_trait::async_trait]
impl Activity for ImportFileActivity {
    fn name(&self) -> &str {
        "import-file"
    }

    fn resources(&self) -> Vec<ResourceClass> {
        vec![ResourceClass::ImportThread]
    }

    fn describe(&self, item: &str) -> String {
        format!("Importing {}", item)
    }

    async fn run(&self, ctx: &ActivityContext, item: &str) -> Result<ItemOutcome, ActivityError> {
        let validation = match self
            .importer
            .validate_file(item, ctx.workflow_id, &ctx.cancel)
            .await
        {
            Ok(v) => v,
            Err(e) => return settle(self.name(), e),
        };
        if !validation.is_valid {
            let reason = validation
                .reason
                .unwrap_or_else(|| "validation failed".to_string());
            debug!(workflow_id = %ctx.workflow_id, file = item, reason = %reason, "File rejected");
            return Ok(ItemOutcome::Failed(reason));
        }

        if ctx.cancel.is_cancelled() {
            return Err(ActivityError::Cancelled);
        }

        let paths = [item.to_string()];
        match self.importer.import_files(&paths, &self.options).await {
            Ok(receipt) if receipt.imported + receipt.duplicates > 0 => Ok(ItemOutcome::Processed),
            Ok(_) => Ok(ItemOutcome::failed("importer accepted no files")),
            Err(e) => settle(self.name(), e),
        }
    }
}

/// Map a collaborator error onto the item or the run.
pub(crate) fn settle(activity: &str, e: CollaboratorError) -> Result<ItemOutcome, ActivityError> {
    match e {
        CollaboratorError::Cancelled => Err(ActivityError::Cancelled),
        CollaboratorError::Misconfigured(message) => Err(ActivityError::fatal(activity, message)),
        other => Ok(ItemOutcome::Failed(other.to_string())),
    }
}
