//! Merging of consecutive scripted jobs into single physical nodes.
//!
//! A chain of scripted jobs that share the same tool set can be driven by
//! one process invocation instead of one per node. Merging folds such a
//! chain into its shallowest node, which keeps its identity and position in
//! the tree; the folded steps are recorded in execution order so that
//! reporting stays per original node.

use simflow_core::JobParam;

use crate::TRACING_TARGET;
use crate::job::{JobIndex, JobState, JobTree, MergedStep};
use crate::script::{MERGED_JOBS_PARAM, ORIGINAL_UUID_PARAM};

/// Collapses every mergeable scripted chain in `tree`.
///
/// Two adjacent nodes merge when both are scripted, carry identical tool
/// sets, the shallower one has the deeper as its only prerequisite, and
/// neither has run yet or carries a finished-job continuation. The deepest
/// node of a chain runs first, so folded steps are recorded deepest-first.
pub fn optimize_job_tree(tree: &mut JobTree) {
    let before = tree.job_count();
    let mut stack = vec![tree.root()];
    while let Some(current) = stack.pop() {
        merge_chain_at(tree, current);
        // Children are pushed after merging so folded nodes are never
        // visited on their own.
        let node = tree.node(current);
        stack.extend(node.children.iter().copied());
        stack.extend(node.finished_job.iter().copied());
    }
    compact(tree);
    if tree.job_count() != before {
        tracing::debug!(
            target: TRACING_TARGET,
            physical = tree.job_count(),
            logical = tree.logical_job_count(),
            "scripted chains merged",
        );
    }
}

fn merge_chain_at(tree: &mut JobTree, head: JobIndex) {
    let mut run = vec![head];
    let mut current = head;
    while let Some(next) = mergeable_child(tree, current) {
        run.push(next);
        current = next;
    }
    if run.len() < 2 {
        return;
    }

    let deepest = *run.last().unwrap_or(&head);
    let transplanted_children = tree.node(deepest).children.clone();

    // Execution order is deepest-first: prerequisites run before the nodes
    // that depend on them.
    let mut steps = Vec::with_capacity(run.len());
    let mut files = tree.node(head).files.clone();
    for &index in run.iter().rev() {
        let node = tree.node(index);
        steps.push(MergedStep {
            id: node.id,
            kind: node.kind,
            params: node.params.clone(),
        });
        if index != head {
            files.append_all(node.files.clone());
        }
    }

    let mut merged = JobParam::new(MERGED_JOBS_PARAM);
    for (i, step) in steps.iter().enumerate() {
        let mut entry = JobParam::new(i.to_string());
        let mut uuid = JobParam::new(ORIGINAL_UUID_PARAM);
        uuid.children.push(JobParam::new(step.id.to_string()));
        entry.children.push(uuid);
        entry.children.extend(step.params.iter().cloned());
        merged.children.push(entry);
    }

    let node = tree.node_mut(head);
    node.children = transplanted_children;
    node.merged_steps = steps;
    node.files = files;
    node.params.append_param(merged);
}

fn mergeable_child(tree: &JobTree, index: JobIndex) -> Option<JobIndex> {
    let node = tree.node(index);
    if !node.kind.is_scripted()
        || node.state != JobState::NotStarted
        || node.finished_job.is_some()
        || node.is_merged()
    {
        return None;
    }
    let child = match node.children.as_slice() {
        [only] => *only,
        _ => return None,
    };
    let candidate = tree.node(child);
    let compatible = candidate.kind.is_scripted()
        && candidate.state == JobState::NotStarted
        && candidate.finished_job.is_none()
        && !candidate.is_merged()
        && candidate.tools == node.tools;
    compatible.then_some(child)
}

/// Drops nodes orphaned by merging and renumbers the arena.
fn compact(tree: &mut JobTree) {
    let mut nodes = Vec::with_capacity(tree.job_count());
    let mut memo = std::collections::HashMap::new();
    let root = copy_reachable(tree, tree.root(), &mut nodes, &mut memo);
    *tree.nodes_mut() = nodes;
    tree.set_root(root);
}

// Shared prerequisites keep a single slot across the renumbering.
fn copy_reachable(
    tree: &JobTree,
    index: JobIndex,
    nodes: &mut Vec<super::JobNode>,
    memo: &mut std::collections::HashMap<JobIndex, JobIndex>,
) -> JobIndex {
    if let Some(&existing) = memo.get(&index) {
        return existing;
    }
    let mut copy = tree.node(index).clone();
    let children = std::mem::take(&mut copy.children);
    let finished = copy.finished_job.take();

    let slot = JobIndex(nodes.len());
    nodes.push(copy);
    memo.insert(index, slot);
    for child in children {
        let copied = copy_reachable(tree, child, nodes, memo);
        nodes[slot.0].children.push(copied);
    }
    if let Some(finished) = finished {
        let copied = copy_reachable(tree, finished, nodes, memo);
        nodes[slot.0].finished_job = Some(copied);
    }
    slot
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use simflow_core::{Files, JobKind, JobParams, ToolInfo, Tools};

    use super::*;
    use crate::job::{JobNode, JobTree};

    fn scripted_chain(kinds: &[JobKind]) -> JobTree {
        let mut tools = Tools::new();
        tools.append(ToolInfo::new("ruby", "/usr/bin/ruby"));
        let mut nodes: Vec<JobNode> = kinds
            .iter()
            .map(|&kind| {
                let mut params = JobParams::new();
                params.append("ruby_scriptfile", format!("{kind}.rb"));
                JobNode::new(kind, tools.clone(), params, Files::new())
            })
            .collect();
        for i in 0..nodes.len().saturating_sub(1) {
            nodes[i].children.push(JobIndex(i + 1));
        }
        JobTree::new(nodes, JobIndex(0), PathBuf::from("/tmp/out"))
    }

    #[test]
    fn test_chain_of_scripted_jobs_merges_into_one() {
        let mut tree = scripted_chain(&[
            JobKind::UserScript,
            JobKind::UserScript,
            JobKind::UserScript,
        ]);
        optimize_job_tree(&mut tree);

        assert_eq!(tree.job_count(), 1);
        assert_eq!(tree.logical_job_count(), 3);
        let root = tree.node(tree.root());
        assert_eq!(root.merged_steps.len(), 3);
        // Deepest step first.
        assert!(
            root.merged_steps[0]
                .params
                .get_value("ruby_scriptfile")
                .is_ok()
        );
        assert!(root.params.has(MERGED_JOBS_PARAM));
    }

    #[test]
    fn test_non_scripted_node_breaks_the_chain() {
        let mut tree = scripted_chain(&[
            JobKind::UserScript,
            JobKind::EnergyPlus,
            JobKind::UserScript,
        ]);
        optimize_job_tree(&mut tree);
        assert_eq!(tree.job_count(), 3);
    }

    #[test]
    fn test_differing_tools_do_not_merge() {
        let mut tree = scripted_chain(&[JobKind::UserScript, JobKind::UserScript]);
        let other = {
            let mut t = Tools::new();
            t.append(ToolInfo::new("ruby", "/opt/other/ruby"));
            t
        };
        tree.node_mut(JobIndex(1)).tools = other;
        optimize_job_tree(&mut tree);
        assert_eq!(tree.job_count(), 2);
    }

    #[test]
    fn test_merged_params_round_trip_through_builder() {
        let mut tree = scripted_chain(&[JobKind::UserScript, JobKind::UserScript]);
        optimize_job_tree(&mut tree);

        let builder =
            crate::script::RubyJobBuilder::from_params(&tree.node(tree.root()).params)
                .unwrap();
        assert_eq!(builder.merged_jobs().len(), 2);
    }
}
