//! Named executable references.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// A named reference to an executable tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    /// Logical tool name, e.g. `energyplus` or `ruby`.
    pub name: String,
    /// Location of the executable.
    pub location: PathBuf,
}

impl ToolInfo {
    /// Creates a new tool reference.
    pub fn new(name: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
        }
    }
}

/// An ordered collection of tools, de-duplicated by name.
///
/// Appending a tool whose name is already present replaces the earlier entry:
/// the most recent registration of a given tool wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tools(Vec<ToolInfo>);

impl Tools {
    /// Creates an empty tool collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of registered tools.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Registers a tool. Idempotent per name; the last write for a given
    /// name wins, keeping the original position in the ordering.
    pub fn append(&mut self, tool: ToolInfo) {
        match self.0.iter_mut().find(|t| t.name == tool.name) {
            Some(existing) => *existing = tool,
            None => self.0.push(tool),
        }
    }

    /// Merges another collection into this one, entry by entry.
    pub fn append_all(&mut self, tools: Tools) {
        for tool in tools.0 {
            self.append(tool);
        }
    }

    /// Looks up a tool by name.
    pub fn get(&self, name: &str) -> CoreResult<&ToolInfo> {
        self.0
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| CoreError::ToolNotFound(name.to_string()))
    }

    /// Returns whether a tool with the given name is registered.
    pub fn has(&self, name: &str) -> bool {
        self.0.iter().any(|t| t.name == name)
    }

    /// Iterates over the tools in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ToolInfo> {
        self.0.iter()
    }
}

impl FromIterator<ToolInfo> for Tools {
    fn from_iter<T: IntoIterator<Item = ToolInfo>>(iter: T) -> Self {
        let mut tools = Tools::new();
        for tool in iter {
            tools.append(tool);
        }
        tools
    }
}

/// Builds a collection with a single tool, a common construction in tests
/// and standard workflows.
impl From<ToolInfo> for Tools {
    fn from(tool: ToolInfo) -> Self {
        let mut tools = Tools::new();
        tools.append(tool);
        tools
    }
}

impl ToolInfo {
    /// Returns the location as a path.
    pub fn location(&self) -> &Path {
        &self.location
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_dedupes_by_name() {
        let mut tools = Tools::new();
        tools.append(ToolInfo::new("ruby", "/usr/bin/ruby"));
        tools.append(ToolInfo::new("energyplus", "/opt/ep/energyplus"));
        tools.append(ToolInfo::new("ruby", "/usr/local/bin/ruby"));

        assert_eq!(tools.len(), 2);
        let ruby = tools.get("ruby").expect("ruby registered");
        assert_eq!(ruby.location, PathBuf::from("/usr/local/bin/ruby"));
    }

    #[test]
    fn test_get_missing_fails() {
        let tools = Tools::new();
        assert!(matches!(
            tools.get("absent"),
            Err(CoreError::ToolNotFound(_))
        ));
    }

    #[test]
    fn test_order_preserved() {
        let mut tools = Tools::new();
        tools.append(ToolInfo::new("b", "/b"));
        tools.append(ToolInfo::new("a", "/a"));

        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["b", "a"]);
    }
}
