//! Job kinds and the file formats flowing between them.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The kind of work a job performs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString)]
pub enum JobKind {
    /// Does nothing; useful as a placeholder or workflow anchor.
    #[default]
    Null,
    /// Translates an energy model into the simulation input format.
    ModelToIdf,
    /// Translates a simulation input file back into an energy model.
    IdfToModel,
    /// Expands templated simulation objects into concrete ones.
    ExpandObjects,
    /// Rewrites a simulation input file ahead of the heavy run.
    EnergyPlusPreProcess,
    /// The heavy whole-building simulation.
    EnergyPlus,
    /// Post-processes simulation output into report form.
    EnergyPlusPostProcess,
    /// Runs a script through the scripting tool.
    Ruby,
    /// Runs a user-provided script through the scripting tool.
    UserScript,
    /// Splits a simulation input file into parallel run periods.
    ParallelEnergyPlusSplit,
    /// Joins parallel simulation results back together.
    ParallelEnergyPlusJoin,
}

impl JobKind {
    /// Returns whether this kind runs a script through the scripting tool.
    ///
    /// Scripted kinds derive their input/output file formats from their
    /// parameters rather than from the kind itself.
    pub fn is_scripted(&self) -> bool {
        matches!(self, JobKind::Ruby | JobKind::UserScript)
    }

    /// The registered tool name this kind is executed with, or `None` for
    /// kinds that need no external process.
    pub fn tool_name(&self) -> Option<&'static str> {
        match self {
            JobKind::Null
            | JobKind::ParallelEnergyPlusSplit
            | JobKind::ParallelEnergyPlusJoin => None,
            JobKind::ModelToIdf => Some("modeltoidf"),
            JobKind::IdfToModel => Some("idftomodel"),
            JobKind::ExpandObjects => Some("expandobjects"),
            JobKind::EnergyPlusPreProcess | JobKind::EnergyPlus => Some("energyplus"),
            JobKind::EnergyPlusPostProcess => Some("readvars"),
            JobKind::Ruby | JobKind::UserScript => Some("ruby"),
        }
    }

    /// The file format this kind consumes, when fixed by the kind.
    pub fn input_file_format(&self) -> FileFormat {
        match self {
            JobKind::Null => FileFormat::Unknown,
            JobKind::ModelToIdf => FileFormat::Osm,
            JobKind::IdfToModel => FileFormat::Idf,
            JobKind::ExpandObjects
            | JobKind::EnergyPlusPreProcess
            | JobKind::EnergyPlus
            | JobKind::ParallelEnergyPlusSplit => FileFormat::Idf,
            JobKind::EnergyPlusPostProcess | JobKind::ParallelEnergyPlusJoin => FileFormat::Sql,
            JobKind::Ruby | JobKind::UserScript => FileFormat::Unknown,
        }
    }

    /// The file format this kind produces, when fixed by the kind.
    pub fn output_file_format(&self) -> FileFormat {
        match self {
            JobKind::Null => FileFormat::Unknown,
            JobKind::ModelToIdf => FileFormat::Idf,
            JobKind::IdfToModel => FileFormat::Osm,
            JobKind::ExpandObjects
            | JobKind::EnergyPlusPreProcess
            | JobKind::ParallelEnergyPlusSplit => FileFormat::Idf,
            JobKind::EnergyPlus => FileFormat::Sql,
            JobKind::EnergyPlusPostProcess => FileFormat::Xml,
            JobKind::ParallelEnergyPlusJoin => FileFormat::Sql,
            JobKind::Ruby | JobKind::UserScript => FileFormat::Unknown,
        }
    }
}

/// File formats recognized at job boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString)]
pub enum FileFormat {
    /// Energy model.
    Osm,
    /// Simulation input file.
    Idf,
    /// Simulation output database.
    Sql,
    /// Weather file.
    Epw,
    /// Report output.
    Xml,
    /// Not determined by the job kind alone.
    Unknown,
}

impl FileFormat {
    /// Maps a file extension (without dot, any case) to a format.
    pub fn from_extension(extension: &str) -> FileFormat {
        match extension.to_lowercase().as_str() {
            "osm" => FileFormat::Osm,
            "idf" => FileFormat::Idf,
            "sql" => FileFormat::Sql,
            "epw" => FileFormat::Epw,
            "xml" => FileFormat::Xml,
            _ => FileFormat::Unknown,
        }
    }

    /// The canonical extension for this format, if it has one.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            FileFormat::Osm => Some("osm"),
            FileFormat::Idf => Some("idf"),
            FileFormat::Sql => Some("sql"),
            FileFormat::Epw => Some("epw"),
            FileFormat::Xml => Some("xml"),
            FileFormat::Unknown => None,
        }
    }
}
