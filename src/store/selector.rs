//! Label selectors for list and watch calls
//!
//! A selector is a set of `key in (values)` requirements. Requirements with
//! many values are evaluated client-side instead of being sent to the API
//! server, which caps selector length.

use crate::crd::labels::to_label_selector;
use std::collections::BTreeMap;
use std::fmt;

/// Requirements with more values than this are filtered client-side
pub const MAX_SERVER_SELECTOR_VALUES: usize = 64;

/// Set of `key in (values)` requirements
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: BTreeMap<String, Vec<String>>,
}

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key` to have one of `values`; empty lists add nothing
    pub fn with_values(mut self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.add_values(key, values);
        self
    }

    /// Require `key=value`
    pub fn with_label(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_values(key, vec![value.into()])
    }

    pub fn add_values(&mut self, key: impl Into<String>, values: Vec<String>) {
        if values.is_empty() {
            return;
        }
        let entry = self.requirements.entry(key.into()).or_default();
        for value in values {
            if !entry.contains(&value) {
                entry.push(value);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn requirements(&self) -> &BTreeMap<String, Vec<String>> {
        &self.requirements
    }

    /// Check a label map against every requirement
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|(key, values)| {
            labels
                .get(key)
                .map(|v| values.contains(v))
                .unwrap_or(false)
        })
    }

    /// Split into the part sent to the server and the part evaluated locally
    pub fn split(&self, threshold: usize) -> (LabelSelector, LabelSelector) {
        let (server, client): (BTreeMap<_, _>, BTreeMap<_, _>) = self
            .requirements
            .clone()
            .into_iter()
            .partition(|(_, values)| values.len() <= threshold);
        (
            LabelSelector {
                requirements: server,
            },
            LabelSelector {
                requirements: client,
            },
        )
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", to_label_selector(&self.requirements))
    }
}
