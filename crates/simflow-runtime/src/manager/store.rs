//! Durable state for the run manager.
//!
//! The store is a single versioned JSON document holding every enqueued job
//! tree plus workflow definitions persisted by structural key. It is the
//! source of truth for job state: the manager's in-memory trees are a cache
//! over it and are rebuilt from it after a restart.

use std::path::{Path, PathBuf};

use semver::Version;
use serde::{Deserialize, Serialize};
use simflow_core::WorkItem;

use crate::TRACING_TARGET;
use crate::error::{RunError, RunResult};
use crate::job::JobTree;
use crate::workflow::Workflow;

/// Schema version written by this build.
pub const STORE_VERSION: &str = "1.1.0";

/// A workflow definition persisted under its structural key.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkflowRecord {
    key: String,
    name: Option<String>,
    items: Vec<WorkItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreDocument {
    version: String,
    #[serde(default)]
    trees: Vec<JobTree>,
    #[serde(default)]
    workflows: Vec<WorkflowRecord>,
}

impl StoreDocument {
    fn empty() -> Self {
        Self {
            version: STORE_VERSION.to_string(),
            trees: Vec::new(),
            workflows: Vec::new(),
        }
    }
}

/// A versioned on-disk job store.
#[derive(Debug)]
pub struct JobStore {
    path: PathBuf,
    document: StoreDocument,
}

impl JobStore {
    /// Opens a store, creating an empty one when the file does not exist and
    /// upgrading older schema versions in place.
    pub fn open(path: impl Into<PathBuf>) -> RunResult<Self> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self {
                path,
                document: StoreDocument::empty(),
            });
        }

        let raw = std::fs::read_to_string(&path)?;
        let mut document: StoreDocument = serde_json::from_str(&raw)?;

        let current = Version::parse(STORE_VERSION).map_err(|e| {
            RunError::Internal(format!("bad built-in schema version: {e}"))
        })?;
        let found = Version::parse(&document.version).map_err(|e| RunError::Detection {
            store: path.clone(),
            message: format!("unparseable schema version {:?}: {e}", document.version),
        })?;

        if found.major > current.major {
            return Err(RunError::Detection {
                store: path,
                message: format!(
                    "store schema {found} is newer than supported {current}"
                ),
            });
        }
        if found < current {
            tracing::info!(
                target: TRACING_TARGET,
                store = %path.display(),
                from = %found,
                to = %current,
                "upgrading job store schema",
            );
            // Older documents deserialize with defaulted fields; adopting
            // the current version completes the upgrade on next save.
            document.version = STORE_VERSION.to_string();
        }

        Ok(Self { path, document })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the persisted trees and writes the document out.
    pub fn save_trees(&mut self, trees: &[JobTree]) -> RunResult<()> {
        self.document.trees = trees.to_vec();
        self.save()
    }

    /// Returns the persisted trees.
    pub fn load_trees(&self) -> Vec<JobTree> {
        self.document.trees.clone()
    }

    /// Persists a workflow definition under its structural key. The workflow
    /// must be linear, since definitions are stored as ordered work items.
    pub fn persist_workflow(&mut self, workflow: &Workflow) -> RunResult<String> {
        let key = workflow.key()?;
        let items = workflow.to_work_items()?;
        self.document.workflows.retain(|r| r.key != key);
        self.document.workflows.push(WorkflowRecord {
            key: key.clone(),
            name: workflow.name().map(str::to_string),
            items,
        });
        self.save()?;
        Ok(key)
    }

    /// Loads the workflow persisted under `key`.
    ///
    /// Reports a detection error when the store does not hold exactly one
    /// matching definition.
    pub fn load_workflow(&self, key: &str) -> RunResult<Workflow> {
        let matches: Vec<&WorkflowRecord> = self
            .document
            .workflows
            .iter()
            .filter(|r| r.key == key)
            .collect();
        match matches.as_slice() {
            [record] => {
                let mut workflow = match &record.name {
                    Some(name) => Workflow::with_name(name.clone()),
                    None => Workflow::new(),
                };
                workflow.add_jobs(record.items.iter().cloned());
                Ok(workflow)
            }
            _ => Err(RunError::Detection {
                store: self.path.clone(),
                message: format!(
                    "expected exactly one workflow for key {key}, found {}",
                    matches.len()
                ),
            }),
        }
    }

    /// Drops all persisted trees.
    pub fn clear_trees(&mut self) -> RunResult<()> {
        self.document.trees.clear();
        self.save()
    }

    fn save(&self) -> RunResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let raw = serde_json::to_string_pretty(&self.document)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use simflow_core::JobKind;

    use super::*;

    #[test]
    fn test_open_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::open(dir.path().join("jobs.json")).unwrap();
        assert!(store.load_trees().is_empty());
    }

    #[test]
    fn test_workflow_round_trip_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JobStore::open(dir.path().join("jobs.json")).unwrap();

        let mut workflow = Workflow::with_name("baseline");
        workflow.add_job_kind(JobKind::ModelToIdf);
        workflow.add_job_kind(JobKind::EnergyPlus);
        let key = store.persist_workflow(&workflow).unwrap();

        let store = JobStore::open(dir.path().join("jobs.json")).unwrap();
        let loaded = store.load_workflow(&key).unwrap();
        assert_eq!(loaded.name(), Some("baseline"));
        assert_eq!(loaded.key().unwrap(), key);
        assert!(store.load_workflow("no-such-key").is_err());
    }

    #[test]
    fn test_persist_same_key_twice_keeps_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JobStore::open(dir.path().join("jobs.json")).unwrap();

        let mut workflow = Workflow::new();
        workflow.add_job_kind(JobKind::Null);
        let key = store.persist_workflow(&workflow).unwrap();
        store.persist_workflow(&workflow).unwrap();

        assert!(store.load_workflow(&key).is_ok());
    }

    #[test]
    fn test_older_schema_upgrades_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, r#"{"version":"1.0.0"}"#).unwrap();

        let store = JobStore::open(&path).unwrap();
        assert!(store.load_trees().is_empty());
    }

    #[test]
    fn test_newer_major_schema_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, r#"{"version":"99.0.0"}"#).unwrap();

        assert!(matches!(
            JobStore::open(&path),
            Err(RunError::Detection { .. })
        ));
    }
}
