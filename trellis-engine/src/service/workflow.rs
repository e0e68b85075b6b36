//! Draft, publish and lifecycle operations on workflows.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::catalog::ActionCatalogRegistry;
use crate::error::{EngineError, EngineResult};
use crate::model::{canonical_json, checksum_of, Workflow, WorkflowStatus, DRAFT_VERSION};
use crate::parser::parse_document;
use crate::store::{StoreError, Stores};
use crate::validation::{ValidationReport, WorkflowValidator};

/// Result of a publish call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutcome {
    pub version: i32,
    pub status: WorkflowStatus,
    /// An identical definition was already published under this version.
    pub reused: bool,
    pub warnings: Vec<String>,
}

#[derive(Clone)]
pub struct WorkflowService {
    stores: Stores,
    validator: WorkflowValidator,
}

impl WorkflowService {
    pub fn new(stores: Stores, registry: Arc<ActionCatalogRegistry>) -> Self {
        Self {
            stores,
            validator: WorkflowValidator::new(registry),
        }
    }

    /// Create or update the editable draft from a definition document.
    /// Parse failures reject the call; full validation runs at publish.
    pub async fn save_draft(&self, definition: Value) -> EngineResult<Workflow> {
        let doc = parse_document(&definition)?;
        let workflow = match self.stores.workflows.get(&doc.id).await? {
            None => {
                let workflow = Workflow::new_draft(
                    doc.id.clone(),
                    doc.display_name.clone(),
                    doc.description.clone(),
                );
                self.stores.workflows.insert(&workflow).await?;
                workflow
            }
            Some(existing) if existing.status == WorkflowStatus::Draft => {
                self.stores
                    .workflows
                    .update_meta(&doc.id, &doc.display_name, doc.description.as_deref())
                    .await?
            }
            Some(existing) => {
                return Err(EngineError::Conflict(format!(
                    "workflow '{}' is {}, only Draft workflows are editable",
                    existing.id, existing.status
                )));
            }
        };

        let canonical: Value = serde_json::from_str(&canonical_json(&definition))
            .map_err(|e| EngineError::Parse(format!("definition is not serializable: {}", e)))?;
        let checksum = checksum_of(&definition);
        self.stores
            .definitions
            .save_draft(&doc.id, &canonical, &checksum)
            .await?;
        tracing::info!(workflow_id = %doc.id, "draft saved");
        Ok(workflow)
    }

    /// Validate and publish the draft. Identical content republished is
    /// idempotent: the existing version is returned and no row is created.
    pub async fn publish(&self, workflow_id: &str, auto_activate: bool) -> EngineResult<PublishOutcome> {
        self.stores
            .workflows
            .get(workflow_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("workflow '{}'", workflow_id)))?;
        let draft = self
            .stores
            .definitions
            .get(workflow_id, DRAFT_VERSION)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("draft of workflow '{}'", workflow_id)))?;

        let doc = parse_document(&draft.definition_json)?;
        let report = self.validator.validate(&doc);
        if !report.is_valid {
            return Err(EngineError::Validation(report));
        }

        let (version, reused) = match self
            .stores
            .definitions
            .find_by_checksum(workflow_id, &draft.checksum)
            .await?
        {
            Some(existing) => (existing.version, true),
            None => {
                let next = self.stores.definitions.max_version(workflow_id).await? + 1;
                match self
                    .stores
                    .definitions
                    .insert_version(workflow_id, next, &draft.definition_json, &draft.checksum)
                    .await
                {
                    Ok(inserted) => (inserted.version, false),
                    // A concurrent publisher won the race with identical content
                    Err(StoreError::Conflict(_)) => {
                        let existing = self
                            .stores
                            .definitions
                            .find_by_checksum(workflow_id, &draft.checksum)
                            .await?
                            .ok_or_else(|| {
                                EngineError::Conflict(format!(
                                    "publish of '{}' raced and no matching version exists",
                                    workflow_id
                                ))
                            })?;
                        (existing.version, true)
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let workflow = self
            .stores
            .workflows
            .mark_published(workflow_id, version, auto_activate)
            .await?;
        tracing::info!(
            workflow_id = %workflow_id,
            version,
            reused,
            status = %workflow.status,
            "workflow published"
        );
        Ok(PublishOutcome {
            version,
            status: workflow.status,
            reused,
            warnings: report.warnings,
        })
    }

    pub async fn archive(&self, workflow_id: &str) -> EngineResult<Workflow> {
        let workflow = self.stores.workflows.archive(workflow_id).await?;
        tracing::info!(workflow_id = %workflow_id, "workflow archived");
        Ok(workflow)
    }

    pub async fn reactivate(&self, workflow_id: &str) -> EngineResult<Workflow> {
        let workflow = self.stores.workflows.reactivate(workflow_id).await?;
        tracing::info!(workflow_id = %workflow_id, "workflow reactivated");
        Ok(workflow)
    }

    pub async fn get(&self, workflow_id: &str) -> EngineResult<Option<Workflow>> {
        Ok(self.stores.workflows.get(workflow_id).await?)
    }

    pub async fn list(&self) -> EngineResult<Vec<Workflow>> {
        Ok(self.stores.workflows.list().await?)
    }

    /// Dry-run validation of a definition document; parse failures land in
    /// the report instead of erroring.
    pub fn validate_definition(&self, definition: &Value) -> ValidationReport {
        match parse_document(definition) {
            Ok(doc) => self.validator.validate(&doc),
            Err(e) => ValidationReport::invalid(vec![e.to_string()]),
        }
    }
}
