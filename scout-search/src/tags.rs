//! Tag alias expansion.
//!
//! Search tags are broadened with known abbreviation/full-name pairs before
//! matching, so `rs` finds documents tagged `rust` and vice versa. The table
//! is symmetric: every alias group expands to the whole group.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Alias groups. Each inner slice is one equivalence class; a tag matching
/// any member expands to all members.
const ALIAS_GROUPS: &[&[&str]] = &[
    &["rs", "rust"],
    &["py", "python"],
    &["js", "javascript"],
    &["ts", "typescript"],
    &["go", "golang"],
    &["rb", "ruby"],
    &["kt", "kotlin"],
    &["cpp", "c++", "cxx"],
    &["cs", "csharp", "c#"],
    &["sh", "shell", "bash"],
    &["md", "markdown"],
    &["yml", "yaml"],
    &["db", "database", "sql"],
    &["auth", "authentication"],
    &["config", "configuration"],
    &["test", "testing", "tests"],
    &["doc", "docs", "documentation"],
];

static ALIASES: Lazy<HashMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for group in ALIAS_GROUPS {
        for member in *group {
            map.insert(*member, *group);
        }
    }
    map
});

/// Expand a tag to itself plus its aliases. The original tag comes first;
/// matching is case-insensitive but returned aliases are lowercase.
pub fn expand_tag(tag: &str) -> Vec<String> {
    let normalized = tag.to_lowercase();
    let mut terms = vec![tag.to_string()];
    if let Some(group) = ALIASES.get(normalized.as_str()) {
        for member in *group {
            if *member != normalized {
                terms.push((*member).to_string());
            }
        }
    }
    terms
}

/// Expand a whole tag list, deduplicating while preserving first-seen order.
pub fn expand_tags(tags: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut terms = Vec::new();
    for tag in tags {
        for term in expand_tag(tag) {
            if seen.insert(term.to_lowercase()) {
                terms.push(term);
            }
        }
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_abbreviation_to_full_name() {
        let terms = expand_tag("rs");
        assert_eq!(terms, vec!["rs".to_string(), "rust".to_string()]);
    }

    #[test]
    fn expands_full_name_to_abbreviation() {
        let terms = expand_tag("rust");
        assert!(terms.contains(&"rs".to_string()));
    }

    #[test]
    fn expansion_is_case_insensitive() {
        let terms = expand_tag("Python");
        assert_eq!(terms[0], "Python");
        assert!(terms.contains(&"py".to_string()));
    }

    #[test]
    fn unknown_tag_passes_through() {
        assert_eq!(expand_tag("serde"), vec!["serde".to_string()]);
    }

    #[test]
    fn list_expansion_deduplicates() {
        let terms = expand_tags(&["rs".to_string(), "rust".to_string()]);
        assert_eq!(terms, vec!["rs".to_string(), "rust".to_string()]);
    }
}
