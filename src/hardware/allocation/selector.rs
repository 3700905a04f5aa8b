//! Label Selector Matching
//!
//! Evaluates a Kubernetes `LabelSelector` against a label map the same way
//! the API server does for list calls.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use std::collections::BTreeMap;
use tracing::warn;

/// Whether `labels` satisfy every `matchLabels` entry and every expression
pub fn selector_matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> bool {
    let labels_match = selector.match_labels.as_ref().map_or(true, |wanted| {
        wanted
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    });

    labels_match
        && selector
            .match_expressions
            .as_deref()
            .unwrap_or_default()
            .iter()
            .all(|requirement| requirement_matches(requirement, labels))
}

fn requirement_matches(
    requirement: &LabelSelectorRequirement,
    labels: &BTreeMap<String, String>,
) -> bool {
    let value = labels.get(&requirement.key);
    let values = requirement.values.as_deref().unwrap_or_default();

    match requirement.operator.as_str() {
        "In" => value.is_some_and(|v| values.contains(v)),
        "NotIn" => value.map_or(true, |v| !values.contains(v)),
        "Exists" => value.is_some(),
        "DoesNotExist" => value.is_none(),
        other => {
            warn!("Unsupported label selector operator {}", other);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn requirement(key: &str, operator: &str, values: &[&str]) -> LabelSelectorRequirement {
        LabelSelectorRequirement {
            key: key.into(),
            operator: operator.into(),
            values: (!values.is_empty()).then(|| values.iter().map(|v| v.to_string()).collect()),
        }
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        assert!(selector_matches(&LabelSelector::default(), &labels(&[])));
    }

    #[test]
    fn test_match_labels() {
        let selector = LabelSelector {
            match_labels: Some(labels(&[("tier", "fast")])),
            ..Default::default()
        };

        assert!(selector_matches(&selector, &labels(&[("tier", "fast"), ("x", "y")])));
        assert!(!selector_matches(&selector, &labels(&[("tier", "slow")])));
        assert!(!selector_matches(&selector, &labels(&[])));
    }

    #[test]
    fn test_match_expressions() {
        let node = labels(&[("tier", "fast"), ("zone", "a")]);

        let cases = [
            (requirement("tier", "In", &["fast", "medium"]), true),
            (requirement("tier", "NotIn", &["fast"]), false),
            (requirement("rack", "NotIn", &["r1"]), true),
            (requirement("zone", "Exists", &[]), true),
            (requirement("zone", "DoesNotExist", &[]), false),
            (requirement("zone", "Gt", &["1"]), false),
        ];

        for (req, expected) in cases {
            let selector = LabelSelector {
                match_expressions: Some(vec![req.clone()]),
                ..Default::default()
            };
            assert_eq!(selector_matches(&selector, &node), expected, "{:?}", req);
        }
    }
}
