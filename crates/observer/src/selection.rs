//! The three pod-selection modes a session can be started with, and the
//! regex semantics they share.

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("invalid regular expression {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

fn compile(pattern: &str) -> Result<Regex, SelectionError> {
    Regex::new(pattern).map_err(|source| SelectionError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// `regex::Regex::is_match` behaves like a search anywhere in the string;
/// the original semantics this observer replicates anchor at the start
/// (Python's `re.match`), so a match only counts when it begins at index 0.
fn matches_at_start(re: &Regex, text: &str) -> bool {
    re.find(text).map(|m| m.start() == 0).unwrap_or(false)
}

/// How a session picks which pods to track.
pub enum Selection {
    ByLabel {
        label_selector: String,
        namespace: Option<String>,
    },
    ByNamespaceRegex {
        namespace_pattern: Regex,
        label_selector: Option<String>,
    },
    ByNameAndNamespaceRegex {
        name_pattern: Regex,
        namespace_pattern: Regex,
    },
}

impl Selection {
    pub fn by_label(label_selector: impl Into<String>, namespace: Option<String>) -> Self {
        Selection::ByLabel {
            label_selector: label_selector.into(),
            namespace,
        }
    }

    pub fn by_namespace_regex(
        namespace_pattern: &str,
        label_selector: Option<String>,
    ) -> Result<Self, SelectionError> {
        Ok(Selection::ByNamespaceRegex {
            namespace_pattern: compile(namespace_pattern)?,
            label_selector,
        })
    }

    pub fn by_name_and_namespace_regex(
        name_pattern: &str,
        namespace_pattern: &str,
    ) -> Result<Self, SelectionError> {
        Ok(Selection::ByNameAndNamespaceRegex {
            name_pattern: compile(name_pattern)?,
            namespace_pattern: compile(namespace_pattern)?,
        })
    }

    /// The label selector passed down to `list_pods`/`watch_pods`, when the
    /// mode carries one server-side.
    pub fn label_selector(&self) -> Option<&str> {
        match self {
            Selection::ByLabel { label_selector, .. } => Some(label_selector.as_str()),
            Selection::ByNamespaceRegex { label_selector, .. } => label_selector.as_deref(),
            Selection::ByNameAndNamespaceRegex { .. } => None,
        }
    }

    /// The namespace passed down to `list_pods`/`watch_pods` when the mode
    /// pins one exactly (label-only mode may).
    pub fn fixed_namespace(&self) -> Option<&str> {
        match self {
            Selection::ByLabel { namespace, .. } => namespace.as_deref(),
            _ => None,
        }
    }

    /// In-process filter applied to every candidate pod name/namespace on
    /// top of whatever the server already filtered.
    pub fn matches(&self, name: &str, namespace: &str) -> bool {
        match self {
            Selection::ByLabel { .. } => true,
            Selection::ByNamespaceRegex {
                namespace_pattern, ..
            } => matches_at_start(namespace_pattern, namespace),
            Selection::ByNameAndNamespaceRegex {
                name_pattern,
                namespace_pattern,
            } => matches_at_start(name_pattern, name) && matches_at_start(namespace_pattern, namespace),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_pattern_fails_synchronously() {
        let result = Selection::by_namespace_regex("(unclosed", None);
        assert!(result.is_err());
    }

    #[test]
    fn namespace_regex_is_anchored_at_start_not_fully() {
        let sel = Selection::by_namespace_regex("chaos-", None).unwrap();
        assert!(sel.matches("anything", "chaos-testing"));
        assert!(!sel.matches("anything", "the-chaos-testing"));
    }

    #[test]
    fn name_and_namespace_regex_requires_both() {
        let sel = Selection::by_name_and_namespace_regex("web-", "prod-").unwrap();
        assert!(sel.matches("web-7c9", "prod-east"));
        assert!(!sel.matches("api-7c9", "prod-east"));
        assert!(!sel.matches("web-7c9", "stage-east"));
    }

    #[test]
    fn label_mode_matches_everything_in_process() {
        let sel = Selection::by_label("app=checkout", None);
        assert!(sel.matches("anything", "any-ns"));
    }
}
