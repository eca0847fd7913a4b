pub mod refresh;

use std::collections::BTreeMap;

pub use refresh::{Refresh, RefreshMetrics};

#[macro_use]
extern crate tracing;

/// The label holding the address of a target, it is absent when the
/// target is known but not addressable.
pub const ADDRESS_LABEL: &str = "__address__";

/// The labels describing a single target.
pub type LabelSet = BTreeMap<String, String>;

/// TargetGroup is a set of targets with a common tags
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TargetGroup {
    /// `targets` is a list of targets identified by a label set. Each target
    /// is uniquely identifiable in the group by its `address` label
    pub targets: Vec<LabelSet>,

    /// `labels` is a set of labels that is common across all targets in the group
    pub labels: LabelSet,

    /// An identifier that describes a group of targets
    pub source: String,
}

impl TargetGroup {
    pub fn new(source: impl Into<String>) -> Self {
        TargetGroup {
            targets: vec![],
            labels: LabelSet::new(),
            source: source.into(),
        }
    }
}

/// Normalize a label name, every character outside of `[a-zA-Z0-9_]` is
/// replaced with `_` and the result is lower cased.
///
/// Normalizing a normalized name returns it unchanged.
pub fn sanitize_label_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}
