//! Script/tool job builders: encoders between domain script actions and
//! work items.
//!
//! A builder round-trips through the parameter tree: building a work item,
//! reconstructing a builder from it, and rebuilding a work item reproduces
//! the original under `==`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use simflow_core::FileFormat;
use strum::{Display, EnumString};

mod argument;
mod ruby;

pub use argument::{ArgumentDomainType, ArgumentKind, ScriptArgument};
pub use ruby::{MERGED_JOBS_PARAM, ORIGINAL_UUID_PARAM, RubyJobBuilder};

/// Which of a source job's files an input-binding rule considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString)]
pub enum FileSelection {
    /// Every matching file.
    All,
    /// Only the most recently produced matching file.
    Last,
}

/// Where an input-binding rule looks for files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString)]
pub enum FileSource {
    /// Any upstream job's outputs.
    All,
    /// Only the direct parent job's outputs.
    Parent,
}

/// A "select file / from source / matching pattern / rename to" rule that
/// binds an upstream file into a scripted job's run directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFileRule {
    /// Which matching files to take.
    pub selection: FileSelection,
    /// Where to look for them.
    pub source: FileSource,
    /// Regular-expression pattern the file name must match.
    pub pattern: String,
    /// Name the file is given inside the run directory.
    pub target: String,
}

impl InputFileRule {
    /// Creates a new input-binding rule.
    pub fn new(
        selection: FileSelection,
        source: FileSource,
        pattern: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            selection,
            source,
            pattern: pattern.into(),
            target: target.into(),
        }
    }
}

/// A "copy required files between extensions" rule: required files attached
/// to inputs of one extension are carried forward onto outputs of another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyRule {
    /// Extension of the inputs whose required files are copied.
    pub from_extension: String,
    /// Extension of the outputs the required files are attached to.
    pub to_extension: String,
    /// Optional file-name pattern narrowing which required files move.
    pub pattern: String,
}

impl CopyRule {
    /// Creates a new copy-forward rule.
    pub fn new(
        from_extension: impl Into<String>,
        to_extension: impl Into<String>,
        pattern: impl Into<String>,
    ) -> Self {
        Self {
            from_extension: from_extension.into(),
            to_extension: to_extension.into(),
            pattern: pattern.into(),
        }
    }
}

/// The measure collaborator: an opaque domain value that can describe the
/// scripted job it wants run.
///
/// Consumed only through [`RubyJobBuilder::from_measure`].
pub trait Measure {
    /// Path to the measure's primary script.
    fn primary_script_path(&self) -> PathBuf;
    /// Auxiliary files the measure declares.
    fn files(&self) -> Vec<PathBuf>;
    /// Format of the model the measure consumes.
    fn input_file_format(&self) -> FileFormat;
    /// Format of the model the measure produces.
    fn output_file_format(&self) -> FileFormat;
}
