//! Encoder/decoder between scripted domain actions and work items.

use std::path::{Path, PathBuf};

use simflow_core::{FileInfo, Files, JobKind, JobParam, JobParams, RequiredFile, WorkItem};
use uuid::Uuid;

use crate::TRACING_TARGET;
use crate::error::RunResult;

use super::argument::{self, ScriptArgument};
use super::{CopyRule, FileSelection, FileSource, InputFileRule, Measure};

/// Parameter node holding the script path.
pub const SCRIPT_FILE_PARAM: &str = "ruby_scriptfile";
/// Parameter node holding the ordered input-binding rules.
pub const INPUT_FILES_PARAM: &str = "ruby_inputfiles";
/// Parameter node holding the ordered copy-forward rules.
pub const COPY_REQUIRED_PARAM: &str = "ruby_copyrequired";
/// Parameter node holding the ordered script parameters.
pub const SCRIPT_PARAMS_PARAM: &str = "ruby_scriptparameters";
/// Parameter node holding the ordered tool parameters.
pub const TOOL_PARAMS_PARAM: &str = "ruby_toolparameters";
/// Parameter node holding the required files.
pub const REQUIRED_FILES_PARAM: &str = "ruby_requiredfiles";
/// Parameter marking user-script jobs.
pub const USER_SCRIPT_PARAM: &str = "ruby_isuserscriptjob";
/// Parameter node holding logical steps folded into one physical job.
pub const MERGED_JOBS_PARAM: &str = "merged_ruby_jobs";
/// Parameter holding the original identity of a folded logical step.
pub const ORIGINAL_UUID_PARAM: &str = "original_job_uuid";

/// Builder for scripted jobs.
///
/// Encodes the full description of a script invocation into the parameter
/// tree: input-binding rules, copy-forward rules, ordered script and tool
/// parameters, required files, and argument metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RubyJobBuilder {
    script: Option<PathBuf>,
    user_script_job: bool,
    job_key_name: String,
    input_files: Vec<InputFileRule>,
    copy_rules: Vec<CopyRule>,
    script_params: Vec<String>,
    tool_params: Vec<String>,
    required_files: Vec<(String, PathBuf)>,
    arguments: Vec<ScriptArgument>,
    merged_jobs: Vec<RubyJobBuilder>,
    original_uuid: Option<Uuid>,
}

impl RubyJobBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconstructs a builder from a previously encoded parameter tree.
    pub fn from_params(params: &JobParams) -> RunResult<Self> {
        let mut builder = Self::new();

        if let Ok(merged) = params.get(MERGED_JOBS_PARAM) {
            let merged_params = JobParams::from_vec(merged.children.clone());
            let mut i = 0usize;
            while let Ok(step) = merged_params.get(&i.to_string()) {
                let step_params = JobParams::from_vec(step.children.clone());
                builder.merged_jobs.push(Self::from_params(&step_params)?);
                i += 1;
            }
        }

        if let Ok(uuid) = params.get_value(ORIGINAL_UUID_PARAM) {
            builder.original_uuid = uuid.parse().ok();
        }

        if let Ok(rules) = params.get(INPUT_FILES_PARAM) {
            for rule in &rules.children {
                let Some(source) = rule.children.first() else {
                    continue;
                };
                let Some(pattern) = source.children.first() else {
                    continue;
                };
                let Some(target) = pattern.children.first() else {
                    continue;
                };
                let (Ok(selection), Ok(file_source)) =
                    (rule.value.parse(), source.value.parse())
                else {
                    continue;
                };
                builder.input_files.push(InputFileRule::new(
                    selection,
                    file_source,
                    &pattern.value,
                    &target.value,
                ));
            }
        }

        if let Ok(rules) = params.get(COPY_REQUIRED_PARAM) {
            for rule in &rules.children {
                let Some(to) = rule.children.first() else {
                    continue;
                };
                let pattern = to.children.first().map(|p| p.value.as_str()).unwrap_or("");
                builder
                    .copy_rules
                    .push(CopyRule::new(&rule.value, &to.value, pattern));
            }
        }

        if let Ok(list) = params.get(SCRIPT_PARAMS_PARAM) {
            builder.script_params = list.children.iter().map(|c| c.value.clone()).collect();
        }
        if let Ok(list) = params.get(TOOL_PARAMS_PARAM) {
            builder.tool_params = list.children.iter().map(|c| c.value.clone()).collect();
        }

        if let Ok(list) = params.get(REQUIRED_FILES_PARAM) {
            for entry in &list.children {
                if let Some(destination) = entry.children.first() {
                    builder
                        .add_required_file(&entry.value, PathBuf::from(&destination.value));
                }
            }
        }

        if let Ok(flag) = params.get_value(USER_SCRIPT_PARAM) {
            builder.user_script_job = flag == "true";
        }

        if let Ok(script) = params.get_value(SCRIPT_FILE_PARAM) {
            builder.script = Some(PathBuf::from(script));
        }

        builder.arguments = argument::from_job_params(params, Path::new(""))?;

        Ok(builder)
    }

    /// Reconstructs a builder from a work item produced by
    /// [`Self::to_work_item`].
    pub fn from_work_item(item: &WorkItem) -> RunResult<Self> {
        let mut builder = Self::from_params(&item.params)?;
        builder.job_key_name = item.job_key_name.clone();

        if builder.script.is_none() {
            if let Ok(script) = item.files.get_last_by_key("rb") {
                builder.script = Some(script.full_path.clone());
            }
        }

        Ok(builder)
    }

    /// Creates a user-script builder from a measure: points the script at
    /// the measure's primary script, attaches each declared file as a
    /// required file, and installs the binding and copy-forward rules
    /// implied by the measure's input/output format pair.
    pub fn from_measure(
        measure: &dyn Measure,
        arguments: Vec<ScriptArgument>,
        relative_to: &Path,
    ) -> Self {
        let mut builder = Self::new();
        builder.user_script_job = true;
        builder.arguments = arguments;

        let script = measure.primary_script_path();
        builder.script = Some(if relative_to.as_os_str().is_empty() || script.is_absolute() {
            script
        } else {
            relative_to.join(script)
        });

        for file in measure.files() {
            let destination = file
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| file.clone());
            builder.add_required_file(file.to_string_lossy(), destination);
        }

        if let Some(in_ext) = measure.input_file_format().extension() {
            builder.add_input_file(InputFileRule::new(
                FileSelection::Last,
                FileSource::Parent,
                format!(".*\\.{in_ext}"),
                format!("in.{in_ext}"),
            ));
            if let Some(out_ext) = measure.output_file_format().extension() {
                builder.add_copy_rule(CopyRule::new(in_ext, out_ext, ""));
            }
        }

        builder
    }

    /// Sets the script file to run.
    pub fn set_script_file(&mut self, script: impl Into<PathBuf>) {
        self.script = Some(script.into());
    }

    /// Returns the script file, if set.
    pub fn script(&self) -> Option<&Path> {
        self.script.as_deref()
    }

    /// Returns whether this describes a user-script job.
    pub fn is_user_script_job(&self) -> bool {
        self.user_script_job
    }

    /// Marks this as a user-script job.
    pub fn set_user_script_job(&mut self, user_script: bool) {
        self.user_script_job = user_script;
    }

    /// Sets the placeholder key name stamped on the emitted work item.
    pub fn set_job_key_name(&mut self, name: impl Into<String>) {
        self.job_key_name = name.into();
    }

    /// Appends an input-binding rule. Order is preserved.
    pub fn add_input_file(&mut self, rule: InputFileRule) {
        self.input_files.push(rule);
    }

    /// Appends a copy-forward rule. Order is preserved.
    pub fn add_copy_rule(&mut self, rule: CopyRule) {
        self.copy_rules.push(rule);
    }

    /// Appends an ordered script parameter.
    pub fn add_script_parameter(&mut self, param: impl Into<String>) {
        self.script_params.push(param.into());
    }

    /// Appends an ordered tool parameter.
    pub fn add_tool_parameter(&mut self, param: impl Into<String>) {
        self.tool_params.push(param.into());
    }

    /// Returns the ordered script parameters.
    pub fn script_parameters(&self) -> &[String] {
        &self.script_params
    }

    /// Returns the ordered tool parameters.
    pub fn tool_parameters(&self) -> &[String] {
        &self.tool_params
    }

    /// Adds a required file, de-duplicated by destination.
    ///
    /// Returns whether the file was added; a duplicate destination is
    /// skipped with a diagnostic.
    pub fn add_required_file(
        &mut self,
        source: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> bool {
        let source = source.into();
        let destination = destination.into();
        if self.required_files.iter().any(|(_, d)| *d == destination) {
            tracing::debug!(
                target: TRACING_TARGET,
                source = %source,
                destination = %destination.display(),
                "required file destination already bound, skipping"
            );
            return false;
        }
        self.required_files.push((source, destination));
        true
    }

    /// Returns the required files in insertion order.
    pub fn required_files(&self) -> &[(String, PathBuf)] {
        &self.required_files
    }

    /// Returns the logical steps folded into this job, if it was merged.
    pub fn merged_jobs(&self) -> &[RubyJobBuilder] {
        &self.merged_jobs
    }

    /// Returns the original job identity, if this builder describes a
    /// folded logical step.
    pub fn original_uuid(&self) -> Option<Uuid> {
        self.original_uuid
    }

    /// Encodes the builder into the parameter tree wire form.
    pub fn to_params(&self) -> JobParams {
        let mut params = JobParams::new();

        let mut input_files = JobParam::new(INPUT_FILES_PARAM);
        for rule in &self.input_files {
            input_files.push_child(JobParam::with_children(
                rule.selection.to_string(),
                vec![JobParam::with_children(
                    rule.source.to_string(),
                    vec![JobParam::with_children(
                        &rule.pattern,
                        vec![JobParam::new(&rule.target)],
                    )],
                )],
            ));
        }
        params.append_param(input_files);

        let mut copy_rules = JobParam::new(COPY_REQUIRED_PARAM);
        for rule in &self.copy_rules {
            copy_rules.push_child(JobParam::with_children(
                &rule.from_extension,
                vec![JobParam::with_children(
                    &rule.to_extension,
                    vec![JobParam::new(&rule.pattern)],
                )],
            ));
        }
        params.append_param(copy_rules);

        params.append_param(JobParam::with_children(
            SCRIPT_PARAMS_PARAM,
            self.script_params
                .iter()
                .map(|v| JobParam::new(v.clone()))
                .collect(),
        ));
        params.append_param(JobParam::with_children(
            TOOL_PARAMS_PARAM,
            self.tool_params
                .iter()
                .map(|v| JobParam::new(v.clone()))
                .collect(),
        ));

        let mut required = JobParam::new(REQUIRED_FILES_PARAM);
        for (source, destination) in &self.required_files {
            required.push_child(JobParam::with_children(
                source,
                vec![JobParam::new(destination.to_string_lossy())],
            ));
        }
        params.append_param(required);

        params.append(
            USER_SCRIPT_PARAM,
            if self.user_script_job { "true" } else { "false" },
        );

        if let Some(script) = &self.script {
            params.append(SCRIPT_FILE_PARAM, script.to_string_lossy());
        }

        if let Some(uuid) = self.original_uuid {
            params.append(ORIGINAL_UUID_PARAM, uuid.to_string());
        }

        if !self.merged_jobs.is_empty() {
            let mut merged = JobParam::new(MERGED_JOBS_PARAM);
            for (i, job) in self.merged_jobs.iter().enumerate() {
                merged.push_child(JobParam::with_children(
                    i.to_string(),
                    job.to_params().into_iter().collect(),
                ));
            }
            params.append_param(merged);
        }

        if !self.arguments.is_empty() {
            params.append_params(argument::to_job_params(&self.arguments, Path::new("")));
        }

        params
    }

    /// Emits the immutable work item this builder describes.
    pub fn to_work_item(&self) -> WorkItem {
        let kind = if self.user_script_job {
            JobKind::UserScript
        } else {
            JobKind::Ruby
        };

        let mut files = Files::new();
        if let Some(script) = &self.script {
            let mut info = FileInfo::with_exists("rb", script.clone(), script.exists());
            for (source, destination) in &self.required_files {
                info.required_files
                    .push(RequiredFile::new(source.clone(), destination.clone()));
            }
            files.append(info);
        }

        WorkItem::with_parts(
            kind,
            simflow_core::Tools::new(),
            self.to_params(),
            files,
            &self.job_key_name,
        )
    }
}

#[cfg(test)]
mod tests {
    use simflow_core::FileFormat;

    use crate::script::ArgumentKind;

    use super::*;

    fn populated_builder() -> RubyJobBuilder {
        let mut builder = RubyJobBuilder::new();
        builder.set_script_file("/scripts/transform.rb");
        builder.add_input_file(InputFileRule::new(
            FileSelection::Last,
            FileSource::Parent,
            ".*\\.osm",
            "in.osm",
        ));
        builder.add_copy_rule(CopyRule::new("osm", "idf", ""));
        builder.add_script_parameter("--verbose");
        builder.add_script_parameter("--scale=2");
        builder.add_tool_parameter("-I/opt/lib");
        builder.add_required_file("/scripts/helper.rb", "helper.rb");
        builder
    }

    #[test]
    fn test_builder_round_trip() {
        let builder = populated_builder();
        let item = builder.to_work_item();
        let rebuilt = RubyJobBuilder::from_work_item(&item).expect("rebuild");
        assert_eq!(rebuilt.to_work_item(), item);
    }

    #[test]
    fn test_round_trip_preserves_ordering() {
        let builder = populated_builder();
        let rebuilt =
            RubyJobBuilder::from_work_item(&builder.to_work_item()).expect("rebuild");
        assert_eq!(rebuilt.script_params, ["--verbose", "--scale=2"]);
    }

    #[test]
    fn test_required_file_destination_dedup() {
        let mut builder = RubyJobBuilder::new();
        assert!(builder.add_required_file("/a/lib.rb", "lib.rb"));
        assert!(!builder.add_required_file("/b/lib.rb", "lib.rb"));
        assert_eq!(builder.required_files().len(), 1);
    }

    #[test]
    fn test_user_script_kind() {
        let mut builder = populated_builder();
        builder.set_user_script_job(true);
        assert_eq!(builder.to_work_item().kind, JobKind::UserScript);

        let rebuilt =
            RubyJobBuilder::from_work_item(&builder.to_work_item()).expect("rebuild");
        assert!(rebuilt.is_user_script_job());
    }

    struct FakeMeasure;

    impl Measure for FakeMeasure {
        fn primary_script_path(&self) -> PathBuf {
            PathBuf::from("/measures/setpoint/measure.rb")
        }

        fn files(&self) -> Vec<PathBuf> {
            vec![
                PathBuf::from("/measures/setpoint/resources/helper.rb"),
                PathBuf::from("/measures/setpoint/resources/data.csv"),
            ]
        }

        fn input_file_format(&self) -> FileFormat {
            FileFormat::Osm
        }

        fn output_file_format(&self) -> FileFormat {
            FileFormat::Osm
        }
    }

    #[test]
    fn test_from_measure() {
        let mut arg = ScriptArgument::new("setpoint", ArgumentKind::Double);
        arg.value = Some("21.5".to_string());

        let builder = RubyJobBuilder::from_measure(&FakeMeasure, vec![arg], Path::new(""));

        assert!(builder.is_user_script_job());
        assert_eq!(
            builder.script(),
            Some(Path::new("/measures/setpoint/measure.rb"))
        );
        assert_eq!(builder.required_files().len(), 2);

        let item = builder.to_work_item();
        assert_eq!(item.input_file_type(), FileFormat::Osm);
        assert_eq!(item.output_file_type(), FileFormat::Osm);

        let rebuilt = RubyJobBuilder::from_work_item(&item).expect("rebuild");
        assert_eq!(rebuilt.to_work_item(), item);
    }

    #[test]
    fn test_merged_jobs_round_trip() {
        let mut step = populated_builder();
        step.original_uuid = Some(Uuid::new_v4());

        let mut physical = populated_builder();
        physical.merged_jobs.push(step.clone());

        let params = physical.to_params();
        let rebuilt = RubyJobBuilder::from_params(&params).expect("rebuild");
        assert_eq!(rebuilt.merged_jobs().len(), 1);
        assert_eq!(rebuilt.merged_jobs()[0].original_uuid(), step.original_uuid());
    }
}
