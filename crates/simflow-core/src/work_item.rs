//! Immutable description of one schedulable unit of work.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::files::Files;
use crate::job_kind::{FileFormat, JobKind};
use crate::params::JobParams;
use crate::tools::Tools;

/// Parameter node holding the ordered input-binding rules of scripted jobs.
pub const INPUT_FILES_PARAM: &str = "ruby_inputfiles";
/// Parameter node holding the ordered copy-forward rules of scripted jobs.
pub const COPY_REQUIRED_PARAM: &str = "ruby_copyrequired";

/// An immutable, serializable description of one unit of work: job kind,
/// tool set, parameter tree, and file set.
///
/// Equality is structural over all fields plus the key name, and is the
/// identity relation JSON round-tripping must preserve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// What this unit of work does.
    #[serde(rename = "type")]
    pub kind: JobKind,
    /// Tools the work requires.
    #[serde(default, skip_serializing_if = "Tools::is_empty")]
    pub tools: Tools,
    /// Configuration parameters.
    #[serde(default, skip_serializing_if = "JobParams::is_empty")]
    pub params: JobParams,
    /// Input files.
    #[serde(default, skip_serializing_if = "Files::is_empty")]
    pub files: Files,
    /// Name used to address this item for placeholder substitution.
    #[serde(rename = "jobkeyname", default, skip_serializing_if = "String::is_empty")]
    pub job_key_name: String,
}

impl WorkItem {
    /// Creates a work item of the given kind with empty tools, params,
    /// and files.
    pub fn new(kind: JobKind) -> Self {
        Self {
            kind,
            tools: Tools::new(),
            params: JobParams::new(),
            files: Files::new(),
            job_key_name: String::new(),
        }
    }

    /// Creates a fully specified work item.
    pub fn with_parts(
        kind: JobKind,
        tools: Tools,
        params: JobParams,
        files: Files,
        job_key_name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            tools,
            params,
            files,
            job_key_name: job_key_name.into(),
        }
    }

    /// The file format this item consumes.
    ///
    /// Derived, not stored: fixed kinds answer from the kind, scripted kinds
    /// from the first input-binding rule in the parameters.
    pub fn input_file_type(&self) -> FileFormat {
        if !self.kind.is_scripted() {
            return self.kind.input_file_format();
        }
        self.first_input_rule_extension()
            .map(|ext| FileFormat::from_extension(&ext))
            .unwrap_or(FileFormat::Unknown)
    }

    /// The file format this item produces.
    ///
    /// Scripted kinds answer from the first copy-forward rule in the
    /// parameters.
    pub fn output_file_type(&self) -> FileFormat {
        if !self.kind.is_scripted() {
            return self.kind.output_file_format();
        }
        self.first_copy_rule_target()
            .map(|ext| FileFormat::from_extension(&ext))
            .unwrap_or(FileFormat::Unknown)
    }

    /// Extension of the pattern in the first input-binding rule, if present.
    ///
    /// The rule chain is `selection -> source -> pattern -> target`; the
    /// pattern carries the extension, e.g. `.*\.osm`.
    fn first_input_rule_extension(&self) -> Option<String> {
        let rules = self.params.get(INPUT_FILES_PARAM).ok()?;
        let selection = rules.children.first()?;
        let source = selection.children.first()?;
        let pattern = source.children.first()?;
        pattern.value.rsplit('.').next().map(str::to_string)
    }

    /// Target extension of the first copy-forward rule, if present.
    ///
    /// The rule chain is `from-extension -> to-extension`.
    fn first_copy_rule_target(&self) -> Option<String> {
        let rules = self.params.get(COPY_REQUIRED_PARAM).ok()?;
        let from = rules.children.first()?;
        let to = from.children.first()?;
        Some(to.value.clone())
    }

    /// Serializes to the canonical JSON wire form.
    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserializes from the canonical JSON wire form.
    pub fn from_json(json: &str) -> CoreResult<WorkItem> {
        Ok(serde_json::from_str(json)?)
    }

    /// Writes the JSON wire form to a file.
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Reads the JSON wire form from a file.
    pub fn load(path: &Path) -> CoreResult<WorkItem> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

/// Serializes a list of work items to the array-of-object JSON form.
pub fn work_items_to_json(items: &[WorkItem]) -> CoreResult<String> {
    Ok(serde_json::to_string_pretty(items)?)
}

/// Deserializes a list of work items from the array-of-object JSON form.
pub fn work_items_from_json(json: &str) -> CoreResult<Vec<WorkItem>> {
    Ok(serde_json::from_str(json)?)
}

/// Writes a list of work items to a file.
pub fn save_work_items(path: &Path, items: &[WorkItem]) -> CoreResult<()> {
    std::fs::write(path, work_items_to_json(items)?)?;
    Ok(())
}

/// Reads a list of work items from a file.
pub fn load_work_items(path: &Path) -> CoreResult<Vec<WorkItem>> {
    let json = std::fs::read_to_string(path)?;
    work_items_from_json(&json)
}

/// Writes a file list to the array-of-object JSON form at `path`.
pub fn save_file_list(path: &Path, files: &Files) -> CoreResult<()> {
    std::fs::write(path, serde_json::to_string_pretty(files)?)?;
    Ok(())
}

/// Reads a file list from the array-of-object JSON form at `path`.
pub fn load_file_list(path: &Path) -> CoreResult<Files> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}
