//! Selector engine for subject and namespace selection
//!
//! Selectors arrive as CRD fields with several alternative branches; exactly
//! one branch must be populated. Construction compiles a selector into a
//! matcher (validating it on the way), and matching is then a pure check
//! against names or label/annotation maps.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Namespace;
use regex::Regex;

use crate::crd::{MatchRegex, MetaSelector, NameSelector, NamespaceSelector};
use crate::error::Error;

/// Subset semantics shared by meta selection and ownership checks: every
/// key of `smaller` must be present in `larger` with an equal value.
pub fn is_subset(
    smaller: &BTreeMap<String, String>,
    larger: Option<&BTreeMap<String, String>>,
) -> bool {
    smaller.iter().all(|(key, value)| {
        larger.is_some_and(|map| map.get(key).is_some_and(|found| found == value))
    })
}

fn compile_regex(spec: &MatchRegex) -> Result<(Regex, bool), Error> {
    let regex = Regex::new(&spec.expression).map_err(|e| {
        Error::validation(format!("invalid regex '{}': {e}", spec.expression))
    })?;
    Ok((regex, spec.negative))
}

/// Compiled form of a [`NameSelector`]
#[derive(Clone, Debug)]
pub enum NameMatcher {
    /// Match names contained in a fixed list
    List(Vec<String>),
    /// Match names against a regex, optionally inverted
    Regex { regex: Regex, negative: bool },
}

impl NameMatcher {
    /// Validate and compile a name selector
    pub fn new(selector: &NameSelector) -> Result<Self, Error> {
        let list = selector
            .match_list
            .as_ref()
            .filter(|list| !list.is_empty());
        let regex = selector
            .match_regex
            .as_ref()
            .filter(|regex| !regex.expression.is_empty());

        match (list, regex) {
            (Some(list), None) => Ok(Self::List(list.clone())),
            (None, Some(spec)) => {
                let (regex, negative) = compile_regex(spec)?;
                Ok(Self::Regex { regex, negative })
            }
            _ => Err(Error::validation(
                "only one of the following fields is allowed as nameSelector: matchList, matchRegex",
            )),
        }
    }

    /// Whether the given name is selected
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::List(list) => list.iter().any(|entry| entry == name),
            Self::Regex { regex, negative } => regex.is_match(name) != *negative,
        }
    }
}

/// Compiled form of a [`MetaSelector`]
#[derive(Clone, Debug)]
pub enum MetaMatcher {
    /// Match objects whose labels contain the selector as a subset
    Labels(BTreeMap<String, String>),
    /// Match objects whose annotations contain the selector as a subset
    Annotations(BTreeMap<String, String>),
}

impl MetaMatcher {
    /// Validate and compile a meta selector
    pub fn new(selector: &MetaSelector) -> Result<Self, Error> {
        let labels = selector
            .match_labels
            .as_ref()
            .filter(|labels| !labels.is_empty());
        let annotations = selector
            .match_annotations
            .as_ref()
            .filter(|annotations| !annotations.is_empty());

        match (labels, annotations) {
            (Some(labels), None) => Ok(Self::Labels(labels.clone())),
            (None, Some(annotations)) => Ok(Self::Annotations(annotations.clone())),
            _ => Err(Error::validation(
                "only one of the following fields is allowed as metaSelector: matchLabels, matchAnnotations",
            )),
        }
    }

    /// Whether an object with the given metadata maps is selected
    pub fn matches(
        &self,
        labels: Option<&BTreeMap<String, String>>,
        annotations: Option<&BTreeMap<String, String>>,
    ) -> bool {
        match self {
            Self::Labels(wanted) => is_subset(wanted, labels),
            Self::Annotations(wanted) => is_subset(wanted, annotations),
        }
    }
}

/// Compiled form of a [`NamespaceSelector`]
///
/// An absent selector selects every namespace; a selector object that is
/// present but has no populated branch is rejected as invalid.
#[derive(Clone, Debug)]
pub enum NamespaceMatcher {
    /// Select every namespace
    All,
    /// Select namespaces whose labels contain the selector as a subset
    Labels(BTreeMap<String, String>),
    /// Select namespaces named in a fixed list
    List(Vec<String>),
    /// Select namespaces whose name matches a regex, optionally inverted
    Regex { regex: Regex, negative: bool },
}

impl NamespaceMatcher {
    /// Validate and compile an optional namespace selector
    pub fn new(selector: Option<&NamespaceSelector>) -> Result<Self, Error> {
        let Some(selector) = selector else {
            return Ok(Self::All);
        };

        let labels = selector
            .match_labels
            .as_ref()
            .filter(|labels| !labels.is_empty());
        let list = selector
            .match_list
            .as_ref()
            .filter(|list| !list.is_empty());
        let regex = selector
            .match_regex
            .as_ref()
            .filter(|regex| !regex.expression.is_empty());

        match (labels, list, regex) {
            (Some(labels), None, None) => Ok(Self::Labels(labels.clone())),
            (None, Some(list), None) => Ok(Self::List(list.clone())),
            (None, None, Some(spec)) => {
                let (regex, negative) = compile_regex(spec)?;
                Ok(Self::Regex { regex, negative })
            }
            _ => Err(Error::validation(
                "only one of the following fields is allowed as namespaceSelector: matchLabels, matchList, matchRegex",
            )),
        }
    }

    /// Whether a namespace with the given name and labels is selected
    pub fn matches(&self, name: &str, labels: Option<&BTreeMap<String, String>>) -> bool {
        match self {
            Self::All => true,
            Self::Labels(wanted) => is_subset(wanted, labels),
            Self::List(list) => list.iter().any(|entry| entry == name),
            Self::Regex { regex, negative } => regex.is_match(name) != *negative,
        }
    }

    /// Names of the namespaces selected out of a cluster listing
    pub fn filter(&self, namespaces: &[Namespace]) -> Vec<String> {
        namespaces
            .iter()
            .filter_map(|namespace| {
                let name = namespace.metadata.name.as_deref()?;
                self.matches(name, namespace.metadata.labels.as_ref())
                    .then(|| name.to_string())
            })
            .collect()
    }
}
