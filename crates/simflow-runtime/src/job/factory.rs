//! Construction of runtime job trees from builder-time workflows.
//!
//! Materialization walks the workflow arena from its root and re-interns
//! every reachable node as a [`JobNode`] with a fresh identity. File
//! references that are relative or point outside the run are localized
//! against the caller's search paths at this point, so the resulting tree
//! carries only references a process can actually consume.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use simflow_core::{FileInfo, Files, JobKind, JobParams, Tools};
use url::Url;

use crate::TRACING_TARGET;
use crate::error::RunResult;
use crate::job::{JobIndex, JobNode, JobTree};
use crate::workflow::{NodeIndex, Workflow};

/// Materializes the subtree of `workflow` rooted at `root` into a job tree.
pub(crate) fn create_tree(
    workflow: &Workflow,
    root: NodeIndex,
    out_dir: &Path,
    search_paths: &[PathBuf],
) -> RunResult<JobTree> {
    let mut nodes = Vec::with_capacity(workflow.job_count());
    let mut memo = HashMap::new();
    let root = intern(workflow, root, search_paths, &mut nodes, &mut memo);
    let tree = JobTree::new(nodes, root, out_dir.to_path_buf());
    tracing::debug!(
        target: TRACING_TARGET,
        jobs = tree.job_count(),
        depth = tree.depth(),
        "job tree materialized",
    );
    Ok(tree)
}

/// Builds a standalone single-job tree from the component parts.
///
/// Used for ad-hoc work that never went through a workflow builder; the
/// node's file references are localized the same way tree creation does.
pub fn create_job(
    kind: JobKind,
    tools: Tools,
    params: JobParams,
    files: Files,
    out_dir: impl Into<PathBuf>,
    search_paths: &[PathBuf],
) -> RunResult<JobTree> {
    let node = JobNode::new(kind, tools, params, localize_files(&files, search_paths));
    Ok(JobTree::new(vec![node], JobIndex(0), out_dir.into()))
}

// Shared prerequisites (a parallel split, say) must materialize once, so
// already-visited workflow nodes map to their existing slot.
fn intern(
    workflow: &Workflow,
    index: NodeIndex,
    search_paths: &[PathBuf],
    nodes: &mut Vec<JobNode>,
    memo: &mut HashMap<usize, JobIndex>,
) -> JobIndex {
    if let Some(&existing) = memo.get(&index.index()) {
        return existing;
    }
    let source = workflow.node(index);
    let job = JobNode::new(
        source.kind,
        source.tools.clone(),
        source.params.clone(),
        localize_files(&source.files, search_paths),
    );
    let slot = JobIndex(nodes.len());
    nodes.push(job);
    memo.insert(index.index(), slot);

    for &child in &source.children {
        let copied = intern(workflow, child, search_paths, nodes, memo);
        nodes[slot.0].children.push(copied);
    }
    if let Some(finished) = source.finished_job {
        let copied = intern(workflow, finished, search_paths, nodes, memo);
        nodes[slot.0].finished_job = Some(copied);
    }
    slot
}

/// Resolves relative file references against the search paths.
///
/// Resolvable entries keep their original reference in place and gain a
/// resolved copy under the same key; entries under a `file://` URL pass
/// through untouched, and unresolvable references are kept as-is so the
/// failure surfaces at run time rather than silently dropping an input.
fn localize_files(files: &Files, search_paths: &[PathBuf]) -> Files {
    let mut localized = Files::new();
    for file in files.iter() {
        localized.append(file.clone());

        let path = file.full_path.clone();
        if is_file_url(&path) || (path.is_absolute() && file.exists) {
            continue;
        }
        match resolve(&path, search_paths) {
            Some(found) => {
                let mut resolved = FileInfo::with_exists(file.key.clone(), found, true);
                resolved.required_files = file.required_files.clone();
                localized.append(resolved);
            }
            None => {
                tracing::warn!(
                    target: TRACING_TARGET,
                    key = %file.key,
                    path = %path.display(),
                    "file reference not found in any search path",
                );
            }
        }
    }
    localized
}

fn is_file_url(path: &Path) -> bool {
    Url::parse(&path.to_string_lossy()).is_ok_and(|u| u.scheme() == "file")
}

fn resolve(path: &Path, search_paths: &[PathBuf]) -> Option<PathBuf> {
    if path.is_absolute() {
        // An absolute reference that does not exist can still be picked up
        // by filename from a search path.
        let filename = path.file_name()?;
        return search_paths
            .iter()
            .map(|sp| sp.join(filename))
            .find(|c| c.is_file());
    }
    search_paths
        .iter()
        .map(|sp| sp.join(path))
        .find(|c| c.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use simflow_core::JobKind;

    #[test]
    fn test_single_job_tree() {
        let tree = create_job(
            JobKind::Null,
            Tools::new(),
            JobParams::new(),
            Files::new(),
            "/tmp/out",
            &[],
        )
        .unwrap();
        assert_eq!(tree.job_count(), 1);
        assert_eq!(tree.node(tree.root()).kind, JobKind::Null);
    }

    #[test]
    fn test_localize_resolves_relative_reference() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("in.idf"), "Version,24.1;").unwrap();

        let mut files = Files::new();
        files.append(FileInfo::with_exists("idf", "in.idf", false));

        let localized = localize_files(&files, &[dir.path().to_path_buf()]);
        // Original reference kept, resolved copy appended after it.
        assert_eq!(localized.iter().count(), 2);
        let resolved = localized.get_last_by_key("idf").unwrap();
        assert!(resolved.exists);
        assert_eq!(resolved.full_path, dir.path().join("in.idf"));
    }

    #[test]
    fn test_localize_leaves_file_urls_alone() {
        let mut files = Files::new();
        files.append(FileInfo::with_exists(
            "rb",
            "file:///scripts/measure.rb",
            false,
        ));
        let localized = localize_files(&files, &[PathBuf::from("/nonexistent")]);
        assert_eq!(localized.iter().count(), 1);
    }
}
