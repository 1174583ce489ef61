//! Generic labeled parameter tree.
//!
//! Job configuration is carried as a recursive key/children value store:
//! every node is a string value with an ordered list of child nodes. The same
//! shape encodes flat key/value pairs (a named node with a single child
//! holding the value), ordered lists (a named node whose children are the
//! list elements, in insertion order), and nested records.
//!
//! This is the only structure used on the wire; richer consumers decode it
//! into typed structs at their own boundary.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// A single node in the parameter tree: a string value with ordered children.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParam {
    /// Value of this node. For top-level params this is the lookup name.
    pub value: String,
    /// Ordered child nodes. Order is significant and preserved.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<JobParam>,
}

impl JobParam {
    /// Creates a leaf node with the given value.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            children: Vec::new(),
        }
    }

    /// Creates a node with the given value and children.
    pub fn with_children(value: impl Into<String>, children: Vec<JobParam>) -> Self {
        Self {
            value: value.into(),
            children,
        }
    }

    /// Appends a child node, preserving insertion order.
    pub fn push_child(&mut self, child: JobParam) {
        self.children.push(child);
    }

    /// Returns the value of the first child, if any.
    ///
    /// Flat `name -> value` pairs are encoded as a named node with a single
    /// child holding the value, so this is the common read path.
    pub fn first_child_value(&self) -> Option<&str> {
        self.children.first().map(|c| c.value.as_str())
    }
}

impl From<&str> for JobParam {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// An ordered collection of top-level [`JobParam`] nodes, looked up by name.
///
/// No ordering guarantee holds between distinct top-level names, but the
/// collection preserves insertion order and lookups return the first match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobParams(Vec<JobParam>);

impl JobParams {
    /// Creates an empty parameter collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a collection from existing nodes.
    pub fn from_vec(params: Vec<JobParam>) -> Self {
        Self(params)
    }

    /// Returns the number of top-level parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends a flat `name -> value` pair.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0
            .push(JobParam::with_children(name, vec![JobParam::new(value)]));
    }

    /// Appends a pre-built parameter node.
    pub fn append_param(&mut self, param: JobParam) {
        self.0.push(param);
    }

    /// Merges another collection into this one by appending its nodes.
    ///
    /// Existing parameters are never overwritten; conflict resolution is the
    /// caller's concern.
    pub fn append_params(&mut self, params: JobParams) {
        self.0.extend(params.0);
    }

    /// Looks up a top-level parameter by name.
    ///
    /// Fails with [`CoreError::ParamNotFound`] if absent; use [`Self::has`]
    /// for a non-failing probe.
    pub fn get(&self, name: &str) -> CoreResult<&JobParam> {
        self.0
            .iter()
            .find(|p| p.value == name)
            .ok_or_else(|| CoreError::ParamNotFound(name.to_string()))
    }

    /// Looks up the flat value of a `name -> value` pair.
    pub fn get_value(&self, name: &str) -> CoreResult<&str> {
        self.get(name)?
            .first_child_value()
            .ok_or_else(|| CoreError::ParamNotFound(format!("{name} (no value)")))
    }

    /// Returns whether a top-level parameter with the given name exists.
    pub fn has(&self, name: &str) -> bool {
        self.0.iter().any(|p| p.value == name)
    }

    /// Removes every top-level parameter with the given name.
    ///
    /// Returns whether anything was removed. Removing an absent name is not
    /// an error.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|p| p.value != name);
        self.0.len() != before
    }

    /// Replaces any existing parameter of the given name with a flat pair.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.remove(name);
        self.append(name, value);
    }

    /// Iterates over the top-level parameters in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &JobParam> {
        self.0.iter()
    }
}

impl IntoIterator for JobParams {
    type Item = JobParam;
    type IntoIter = std::vec::IntoIter<JobParam>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<JobParam> for JobParams {
    fn from_iter<T: IntoIterator<Item = JobParam>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_get() {
        let mut params = JobParams::new();
        params.append("alpha", "1");
        params.append("beta", "2");

        assert_eq!(params.get_value("alpha").expect("alpha"), "1");
        assert_eq!(params.get_value("beta").expect("beta"), "2");
        assert!(params.has("alpha"));
        assert!(!params.has("gamma"));
    }

    #[test]
    fn test_get_missing_fails() {
        let params = JobParams::new();
        let err = params.get("missing").unwrap_err();
        assert!(matches!(err, CoreError::ParamNotFound(_)));
    }

    #[test]
    fn test_remove() {
        let mut params = JobParams::new();
        params.append("alpha", "1");
        assert!(params.remove("alpha"));
        assert!(!params.remove("alpha"));
        assert!(!params.has("alpha"));
    }

    #[test]
    fn test_children_preserve_insertion_order() {
        let mut list = JobParam::new("scriptparameters");
        for i in 0..5 {
            list.push_child(JobParam::new(format!("arg{i}")));
        }

        let collected: Vec<_> = list.children.iter().map(|c| c.value.as_str()).collect();
        assert_eq!(collected, ["arg0", "arg1", "arg2", "arg3", "arg4"]);
    }

    #[test]
    fn test_merge_appends_without_overwriting() {
        let mut a = JobParams::new();
        a.append("shared", "original");

        let mut b = JobParams::new();
        b.append("shared", "merged");
        b.append("extra", "x");

        a.append_params(b);

        // First match wins on lookup; both entries survive the merge.
        assert_eq!(a.get_value("shared").expect("shared"), "original");
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn test_wire_form_round_trip() {
        let mut params = JobParams::new();
        params.append("flat", "value");
        params.append_param(JobParam::with_children(
            "list",
            vec![JobParam::new("a"), JobParam::new("b")],
        ));

        let json = serde_json::to_string(&params).expect("serialize");
        let back: JobParams = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(params, back);
    }
}
