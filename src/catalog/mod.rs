//! The task catalog registered at process start.
//!
//! A file-collection workflow: prepare a staging directory, scan the source
//! root, then either download the files or ask an operator to collect them
//! by hand, verify that something was staged, and wait for approval.
//!
//! ```text
//! prepare_run
//! ├── scan_files
//! │   └── download_files | manual_collect
//! ├── verify_files
//! └── approve_run
//! ```

mod workspace;

pub use workspace::{CatalogError, Workspace};

use crate::pipeline::services::TaskContext;
use crate::registry::{
    RegistryError, TaskDefinitionId, TaskFailure, TaskMetadata, TaskRegistry, TracedFailure,
};
use std::sync::Arc;

/// Creates the staging directory and lays out the run's top-level steps.
pub const PREPARE_RUN: TaskDefinitionId = TaskDefinitionId::new(1);
/// Lists the source root and picks the collection path.
pub const SCAN_FILES: TaskDefinitionId = TaskDefinitionId::new(2);
/// Copies source files into staging.
pub const DOWNLOAD_FILES: TaskDefinitionId = TaskDefinitionId::new(3);
/// Operator places files into staging by hand.
pub const MANUAL_COLLECT: TaskDefinitionId = TaskDefinitionId::new(4);
/// Fails unless at least one file is staged.
pub const VERIFY_FILES: TaskDefinitionId = TaskDefinitionId::new(5);
/// Operator signs off on the staged files.
pub const APPROVE_RUN: TaskDefinitionId = TaskDefinitionId::new(6);

const COLLECTION: &str = "collection";
const REVIEW: &str = "review";

/// Builds the standard registry over `workspace`.
///
/// # Errors
///
/// Returns a [`RegistryError`] if the catalog itself is inconsistent.
pub fn standard(workspace: Arc<Workspace>) -> Result<TaskRegistry, RegistryError> {
    let for_prepare = Arc::clone(&workspace);
    let for_scan = Arc::clone(&workspace);
    let for_download = Arc::clone(&workspace);
    let for_verify = workspace;

    Ok(TaskRegistry::builder()
        .system(
            TaskMetadata::new(PREPARE_RUN.value(), "Prepare run", COLLECTION)
                .with_description("Create the staging directory and plan the run"),
            move |context: &mut TaskContext<'_>| prepare_run(&for_prepare, context),
        )?
        .system(
            TaskMetadata::new(SCAN_FILES.value(), "Scan source files", COLLECTION)
                .with_description("Choose between download and manual collection"),
            move |context: &mut TaskContext<'_>| scan_files(&for_scan, context),
        )?
        .system(
            TaskMetadata::new(DOWNLOAD_FILES.value(), "Download files", COLLECTION)
                .with_description("Copy source files into staging"),
            move |context: &mut TaskContext<'_>| download_files(&for_download, context),
        )?
        .user(
            TaskMetadata::new(MANUAL_COLLECT.value(), "Collect files manually", COLLECTION)
                .with_description("Place the files into the run's staging directory"),
        )?
        .system(
            TaskMetadata::new(VERIFY_FILES.value(), "Verify staged files", COLLECTION)
                .with_description("Check that the run has staged files"),
            move |context: &mut TaskContext<'_>| verify_files(&for_verify, context),
        )?
        .user(
            TaskMetadata::new(APPROVE_RUN.value(), "Approve run", REVIEW)
                .with_description("Sign off on the staged files"),
        )?
        .build())
}

fn prepare_run(workspace: &Workspace, context: &mut TaskContext<'_>) -> Result<String, TaskFailure> {
    let path = workspace.prepare_run_dir(context.run_id())?;
    for step in [SCAN_FILES, VERIFY_FILES, APPROVE_RUN] {
        context.add_subtask(step)?;
    }
    Ok(format!("staging directory {path} ready"))
}

fn scan_files(workspace: &Workspace, context: &mut TaskContext<'_>) -> Result<String, TaskFailure> {
    let files = workspace.source_files()?;
    if files.is_empty() {
        context.add_subtask(MANUAL_COLLECT)?;
        return Ok("no source files; manual collection required".to_owned());
    }
    context.add_subtask(DOWNLOAD_FILES)?;
    Ok(format!("found {} source files", files.len()))
}

fn download_files(
    workspace: &Workspace,
    context: &mut TaskContext<'_>,
) -> Result<String, TaskFailure> {
    let copied = workspace.copy_sources(context.run_id())?;
    Ok(format!("copied {copied} files"))
}

fn verify_files(workspace: &Workspace, context: &mut TaskContext<'_>) -> Result<String, TaskFailure> {
    let staged = workspace.staged_files(context.run_id())?;
    if staged.is_empty() {
        return Err(TracedFailure::new(CatalogError::NothingStaged(context.run_id())).into());
    }
    Ok(format!("{} files staged", staged.len()))
}
