//! Script argument metadata and its parameter-tree wire form.
//!
//! Arguments are serialized losslessly under a `user_script_params` node:
//! one child per argument, named by the argument, whose children are the
//! field pairs. Path-typed values are relativized against a base path on
//! encode and resolved back on decode.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use simflow_core::{JobParam, JobParams};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::error::{RunError, RunResult};

/// Parameter node arguments are serialized under.
pub const USER_SCRIPT_PARAMS: &str = "user_script_params";

/// The type of a script argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString)]
pub enum ArgumentKind {
    Boolean,
    Double,
    Quantity,
    Integer,
    String,
    Choice,
    Path,
}

/// How an argument's domain constrains its values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString)]
pub enum ArgumentDomainType {
    /// No domain restriction.
    #[default]
    NotDomained,
    /// Values lie in an interval; the domain list holds its bounds.
    Interval,
    /// Values come from an enumerated list.
    Enumeration,
}

/// Metadata describing one argument of a scripted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptArgument {
    /// Identity of the argument definition.
    pub uuid: Uuid,
    /// Identity of this version of the definition.
    pub version_uuid: Uuid,
    /// Machine name.
    pub name: String,
    /// Human-readable name.
    pub display_name: String,
    /// Value type.
    pub kind: ArgumentKind,
    /// Whether a value must be supplied.
    pub required: bool,
    /// Current value, if set.
    pub value: Option<String>,
    /// Default value, if declared.
    pub default_value: Option<String>,
    /// Domain restriction type.
    pub domain_type: ArgumentDomainType,
    /// Domain values (interval bounds or enumeration members).
    pub domain: Vec<String>,
    /// Choice values for choice-typed arguments.
    pub choices: Vec<String>,
    /// Display names parallel to `choices`.
    pub choice_display_names: Vec<String>,
    /// For path-typed arguments: whether the path is read (vs written).
    pub is_read: bool,
    /// For path-typed arguments: the expected file extension.
    pub extension: String,
}

impl ScriptArgument {
    /// Creates a minimal argument of the given name and kind.
    pub fn new(name: impl Into<String>, kind: ArgumentKind) -> Self {
        let name = name.into();
        Self {
            uuid: Uuid::new_v4(),
            version_uuid: Uuid::new_v4(),
            display_name: name.clone(),
            name,
            kind,
            required: false,
            value: None,
            default_value: None,
            domain_type: ArgumentDomainType::NotDomained,
            domain: Vec::new(),
            choices: Vec::new(),
            choice_display_names: Vec::new(),
            is_read: false,
            extension: String::new(),
        }
    }
}

/// Serializes arguments under a `user_script_params` node.
pub fn to_job_params(args: &[ScriptArgument], base_path: &Path) -> JobParams {
    let mut list = JobParam::new(USER_SCRIPT_PARAMS);

    for arg in args {
        let mut fields = JobParams::new();
        fields.append("uuid", arg.uuid.to_string());
        fields.append("versionUUID", arg.version_uuid.to_string());
        fields.append("name", &arg.name);
        fields.append("displayName", &arg.display_name);
        fields.append("type", arg.kind.to_string());
        fields.append("required", bool_to_str(arg.required));

        if let Some(value) = &arg.value {
            fields.append("value", encode_path_value(arg.kind, value, base_path));
        }
        if let Some(default_value) = &arg.default_value {
            fields.append(
                "defaultValue",
                encode_path_value(arg.kind, default_value, base_path),
            );
        }

        fields.append("domainType", arg.domain_type.to_string());
        fields.append_param(string_list("domain", &arg.domain));
        fields.append_param(string_list("choices", &arg.choices));
        fields.append_param(string_list("choiceDisplayNames", &arg.choice_display_names));
        fields.append("isRead", bool_to_str(arg.is_read));
        fields.append("extension", &arg.extension);

        list.push_child(JobParam::with_children(
            &arg.name,
            fields.into_iter().collect(),
        ));
    }

    let mut params = JobParams::new();
    params.append_param(list);
    params
}

/// Decodes arguments from a `user_script_params` node. Absent node means
/// no arguments.
pub fn from_job_params(params: &JobParams, base_path: &Path) -> RunResult<Vec<ScriptArgument>> {
    let Ok(list) = params.get(USER_SCRIPT_PARAMS) else {
        return Ok(Vec::new());
    };

    let mut args = Vec::with_capacity(list.children.len());
    for child in &list.children {
        let fields = JobParams::from_vec(child.children.clone());

        let kind: ArgumentKind = fields
            .get_value("type")?
            .parse()
            .map_err(|_| invalid_field("type", &child.value))?;

        let value = fields
            .get_value("value")
            .ok()
            .map(|v| decode_path_value(kind, v, base_path));
        let default_value = fields
            .get_value("defaultValue")
            .ok()
            .map(|v| decode_path_value(kind, v, base_path));

        args.push(ScriptArgument {
            uuid: parse_uuid(&fields, "uuid", &child.value)?,
            version_uuid: parse_uuid(&fields, "versionUUID", &child.value)?,
            name: fields.get_value("name")?.to_string(),
            display_name: fields.get_value("displayName")?.to_string(),
            kind,
            required: fields.get_value("required")? == "true",
            value,
            default_value,
            domain_type: fields
                .get_value("domainType")?
                .parse()
                .map_err(|_| invalid_field("domainType", &child.value))?,
            domain: string_list_values(&fields, "domain"),
            choices: string_list_values(&fields, "choices"),
            choice_display_names: string_list_values(&fields, "choiceDisplayNames"),
            is_read: fields.get_value("isRead")? == "true",
            extension: fields.get_value("extension")?.to_string(),
        });
    }

    Ok(args)
}

fn bool_to_str(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

fn string_list(name: &str, values: &[String]) -> JobParam {
    JobParam::with_children(name, values.iter().map(|v| JobParam::new(v.clone())).collect())
}

fn string_list_values(fields: &JobParams, name: &str) -> Vec<String> {
    fields
        .get(name)
        .map(|p| p.children.iter().map(|c| c.value.clone()).collect())
        .unwrap_or_default()
}

fn parse_uuid(fields: &JobParams, name: &str, arg: &str) -> RunResult<Uuid> {
    fields
        .get_value(name)?
        .parse()
        .map_err(|_| invalid_field(name, arg))
}

fn invalid_field(field: &str, arg: &str) -> RunError {
    RunError::Internal(format!("argument {arg}: invalid {field} field"))
}

/// Path-typed values are stored relative to the base path when possible.
fn encode_path_value(kind: ArgumentKind, value: &str, base_path: &Path) -> String {
    if kind != ArgumentKind::Path || base_path.as_os_str().is_empty() {
        return value.to_string();
    }
    let path = PathBuf::from(value);
    match path.strip_prefix(base_path) {
        Ok(relative) => relative.to_string_lossy().into_owned(),
        Err(_) => value.to_string(),
    }
}

/// Relative path-typed values are resolved against the base path.
fn decode_path_value(kind: ArgumentKind, value: &str, base_path: &Path) -> String {
    if kind != ArgumentKind::Path || base_path.as_os_str().is_empty() {
        return value.to_string();
    }
    let path = PathBuf::from(value);
    if path.is_absolute() {
        value.to_string()
    } else {
        base_path.join(path).to_string_lossy().into_owned()
    }
}
