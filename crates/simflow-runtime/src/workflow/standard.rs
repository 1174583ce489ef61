//! The fixed default pipeline and the parallel-simulation rewrite.

use std::path::{Path, PathBuf};

use simflow_core::{JobKind, JobParams, Tools};

use crate::TRACING_TARGET;
use crate::error::{RunError, RunResult};
use crate::script::RubyJobBuilder;
use crate::workflow::{Workflow, WorkflowNode};

/// Parameter carrying the number of branches on a split node.
pub const NUM_SPLITS_PARAM: &str = "numsplits";
/// Parameter carrying a branch's index within its split.
pub const SPLIT_INDEX_PARAM: &str = "splitindex";

impl Workflow {
    /// Appends the default simulation pipeline: pre-model scripts, model
    /// translation, object expansion, pre-simulation scripts, pre-processing,
    /// the simulation itself, then post-processing scripts.
    ///
    /// Scripted phases are populated from `scripts_dir`'s `model_scripts`,
    /// `idf_scripts` and `post_scripts` subdirectories. Returns `true` when
    /// scripted steps were skipped because `tools` carries no scripting
    /// runtime.
    pub fn add_standard_workflow(
        &mut self,
        scripts_dir: Option<&Path>,
        tools: &Tools,
    ) -> bool {
        let scripting_available = tools.has("ruby");
        let mut skipped = false;

        skipped |= self.add_script_phase(scripts_dir, "model_scripts", scripting_available);
        self.add_job_kind(JobKind::ModelToIdf);
        self.add_job_kind(JobKind::ExpandObjects);
        skipped |= self.add_script_phase(scripts_dir, "idf_scripts", scripting_available);
        self.add_job_kind(JobKind::EnergyPlusPreProcess);
        self.add_job_kind(JobKind::EnergyPlus);
        skipped |= self.add_script_phase(scripts_dir, "post_scripts", scripting_available);

        if skipped {
            tracing::warn!(
                target: TRACING_TARGET,
                uuid = %self.uuid(),
                "scripted steps skipped, no scripting runtime registered",
            );
        }
        skipped
    }

    /// Appends one job per script found in `scripts_dir/<phase>`, in name
    /// order. Returns `true` when scripts were present but skipped.
    fn add_script_phase(
        &mut self,
        scripts_dir: Option<&Path>,
        phase: &str,
        scripting_available: bool,
    ) -> bool {
        let Some(dir) = scripts_dir else {
            return false;
        };
        let mut scripts = phase_scripts(&dir.join(phase));
        scripts.sort();
        if scripts.is_empty() {
            return false;
        }
        if !scripting_available {
            return true;
        }
        for script in scripts {
            let mut builder = RubyJobBuilder::new();
            builder.set_script_file(script);
            self.add_job(builder.to_work_item());
        }
        false
    }

    /// Replaces the single simulation step of a strictly linear workflow
    /// with a split, `num_splits` parallel simulation branches, and a join.
    ///
    /// The step's tools, params, and files move onto the split, which runs
    /// first; each branch carries its index offset by `offset`; the join
    /// takes the step's place in the chain so downstream structure is
    /// untouched.
    pub fn parallelize_energy_plus(
        &mut self,
        num_splits: usize,
        offset: usize,
    ) -> RunResult<()> {
        if num_splits == 0 {
            return Err(RunError::Configuration(
                "cannot parallelize into zero branches".into(),
            ));
        }

        let mut target = None;
        let mut current = self.root();
        while let Some(index) = current {
            let node = self.node(index);
            if node.children.len() > 1 || node.finished_job.is_some() {
                return Err(RunError::Configuration(
                    "workflow must be strictly linear to parallelize".into(),
                ));
            }
            if node.kind == JobKind::EnergyPlus {
                target = Some(index);
            }
            current = node.children.first().copied();
        }
        let Some(target) = target else {
            return Err(RunError::Configuration(
                "workflow has no simulation step to parallelize".into(),
            ));
        };

        let original = self.node(target).clone();

        // The split inherits the original step's payload and prerequisites,
        // so it is the first part of the rewritten subtree to run.
        let mut split_params = original.params.clone();
        split_params.set(NUM_SPLITS_PARAM, num_splits.to_string());
        let split = self.intern(WorkflowNode {
            kind: JobKind::ParallelEnergyPlusSplit,
            tools: original.tools.clone(),
            params: split_params,
            files: original.files.clone(),
            children: original.children.clone(),
            finished_job: None,
        });

        let mut branches = Vec::with_capacity(num_splits);
        for i in 0..num_splits {
            let mut params = JobParams::new();
            params.append(SPLIT_INDEX_PARAM, (offset + i).to_string());
            branches.push(self.intern(WorkflowNode {
                kind: JobKind::EnergyPlus,
                tools: original.tools.clone(),
                params,
                files: simflow_core::Files::new(),
                children: vec![split],
                finished_job: None,
            }));
        }

        // The join reuses the original slot, so whatever depended on the
        // simulation step now depends on the join.
        let join = self.node_mut(target);
        join.kind = JobKind::ParallelEnergyPlusJoin;
        join.tools = Tools::new();
        join.params = JobParams::new();
        join.files = simflow_core::Files::new();
        join.children = branches;
        join.finished_job = None;

        tracing::debug!(
            target: TRACING_TARGET,
            uuid = %self.uuid(),
            branches = num_splits,
            offset,
            "simulation step parallelized",
        );
        Ok(())
    }
}

fn phase_scripts(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("rb"))
        })
        .collect()
}
