//! Structural content hash over a workflow tree.
//!
//! The key is the cache/dedup identity a caller uses to detect "have I
//! already computed this". Two structurally identical trees yield identical
//! keys; any difference in a parameter, file path, tool, or child ordering
//! changes the key. The `workflowkey`/`workflowname` bookkeeping parameters
//! are excluded so stamping the key does not alter it.

use sha2::{Digest, Sha256};
use simflow_core::{FileInfo, JobParam};

use super::node::{NodeIndex, WorkflowNode};
use super::{WORKFLOW_KEY_PARAM, WORKFLOW_NAME_PARAM};

/// Computes the hex-encoded structural key of the tree rooted at `root`.
pub fn structural_key(arena: &[WorkflowNode], root: NodeIndex) -> String {
    let mut hasher = Sha256::new();
    hash_subtree(&mut hasher, arena, root);
    let digest = hasher.finalize();
    let mut key = String::with_capacity(digest.len() * 2);
    for byte in digest {
        key.push_str(&format!("{byte:02x}"));
    }
    key
}

/// Hashes one subtree in the canonical order: kind, tool names, parameter
/// nodes, files, then each child subtree, then the finished continuation.
fn hash_subtree(hasher: &mut Sha256, arena: &[WorkflowNode], index: NodeIndex) {
    let node = &arena[index.index()];

    hash_str(hasher, "kind", &node.kind.to_string());

    for tool in node.tools.iter() {
        hash_str(hasher, "tool", &tool.name);
    }

    for param in node.params.iter() {
        if param.value == WORKFLOW_KEY_PARAM || param.value == WORKFLOW_NAME_PARAM {
            continue;
        }
        hash_param(hasher, param);
    }

    for file in node.files.iter() {
        hash_file(hasher, file);
    }

    for &child in &node.children {
        hash_str(hasher, "child", "");
        hash_subtree(hasher, arena, child);
    }

    if let Some(finished) = node.finished_job {
        hash_str(hasher, "finished", "");
        hash_subtree(hasher, arena, finished);
    }
}

fn hash_param(hasher: &mut Sha256, param: &JobParam) {
    hash_str(hasher, "param", &param.value);
    for child in &param.children {
        hash_param(hasher, child);
    }
    // Closes the child list so sibling/child nesting cannot collide.
    hash_str(hasher, "param-end", "");
}

fn hash_file(hasher: &mut Sha256, file: &FileInfo) {
    hash_str(hasher, "file", &file.full_path.to_string_lossy());
    for required in &file.required_files {
        hash_str(hasher, "required-src", &required.source);
        hash_str(hasher, "required-dst", &required.destination.to_string_lossy());
    }
}

/// Feeds a length-delimited tagged string into the hasher so distinct
/// traversals can never produce the same byte stream.
fn hash_str(hasher: &mut Sha256, tag: &str, value: &str) {
    hasher.update(tag.as_bytes());
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}
