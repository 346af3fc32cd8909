//! Workflow definitions read from JSON files.

use async_trait::async_trait;
use autoflow_core::WorkflowId;
use autoflow_workflow::{StoreError, WorkflowDefinition, WorkflowStatus, WorkflowStore};
use rootcause::Report;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Definitions loaded from disk, keyed by workflow id.
#[derive(Debug, Default)]
pub struct FileWorkflowStore {
    workflows: HashMap<WorkflowId, WorkflowDefinition>,
    sources: HashMap<WorkflowId, PathBuf>,
}

impl FileWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `*.json` file in a directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read, a file is not a
    /// valid definition, or two files share a workflow id.
    pub async fn open_dir(dir: &Path) -> Result<Self, Report<StoreError>> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| StoreError::Backend {
                details: format!("cannot read {}: {e}", dir.display()),
            })?;

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| StoreError::Backend {
            details: format!("cannot read {}: {e}", dir.display()),
        })? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut store = Self::new();
        for path in paths {
            let definition = read_definition(&path).await?;
            store.insert(definition, path)?;
        }
        Ok(store)
    }

    /// Adds one definition, remembering the file it came from.
    ///
    /// # Errors
    ///
    /// Returns an error if another file already supplied the same id.
    pub fn insert(
        &mut self,
        definition: WorkflowDefinition,
        path: PathBuf,
    ) -> Result<WorkflowId, Report<StoreError>> {
        let id = definition.id;
        if let Some(existing) = self.sources.get(&id) {
            return Err(StoreError::InvalidDefinition {
                details: format!(
                    "{} and {} both define workflow {id}",
                    existing.display(),
                    path.display()
                ),
            }
            .into());
        }
        debug!(workflow_id = %id, path = %path.display(), "loaded workflow definition");
        self.workflows.insert(id, definition);
        self.sources.insert(id, path);
        Ok(id)
    }

    /// Overrides the lifecycle status of a loaded definition.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow is not loaded.
    pub fn set_status(
        &mut self,
        workflow_id: WorkflowId,
        status: WorkflowStatus,
    ) -> Result<(), Report<StoreError>> {
        let definition = self
            .workflows
            .get_mut(&workflow_id)
            .ok_or(StoreError::WorkflowNotFound { workflow_id })?;
        definition.status = status;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}

/// Reads and decodes one definition file.
///
/// A file without an `id` gets a fresh one.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a valid definition.
pub async fn read_definition(path: &Path) -> Result<WorkflowDefinition, Report<StoreError>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| StoreError::Backend {
            details: format!("cannot read {}: {e}", path.display()),
        })?;
    let definition = serde_json::from_str(&text).map_err(|e| StoreError::InvalidDefinition {
        details: format!("{}: {e}", path.display()),
    })?;
    Ok(definition)
}

#[async_trait]
impl WorkflowStore for FileWorkflowStore {
    async fn load_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<WorkflowDefinition, Report<StoreError>> {
        self.workflows
            .get(&workflow_id)
            .cloned()
            .ok_or_else(|| StoreError::WorkflowNotFound { workflow_id }.into())
    }
}
