/// Lexical relatedness between success criteria.
///
/// Two criteria are related when the first few words of their cleaned, lowercased
/// content overlap enough. No stemming, no stopwords, no weighting.
use std::collections::{HashMap, HashSet};

use crate::model::WcagSpec;
use crate::text::clean_text;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelatedPolicy {
    /// Shared keywords needed for two criteria to be related.
    pub min_shared: usize,
    /// Leading tokens of the content that make up the keyword set.
    pub keyword_count: usize,
    /// Cap on related criteria per criterion. `None` keeps all of them.
    pub limit: Option<usize>,
}

impl Default for RelatedPolicy {
    fn default() -> Self {
        Self {
            min_shared: 3,
            keyword_count: 10,
            limit: None,
        }
    }
}

impl RelatedPolicy {
    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }
}

pub fn keywords(content: &str, count: usize) -> HashSet<String> {
    clean_text(content)
        .to_lowercase()
        .split_whitespace()
        .take(count)
        .map(str::to_string)
        .collect()
}

/// Related criterion numbers for every success criterion, keyed by criterion id.
///
/// Numbers are listed in document order. A criterion is never related to itself.
pub fn find_related(spec: &WcagSpec, policy: &RelatedPolicy) -> HashMap<String, Vec<String>> {
    let criteria: Vec<(&str, &str, HashSet<String>)> = spec
        .success_criteria()
        .map(|(_, _, sc)| {
            (
                sc.id.as_str(),
                sc.num.as_str(),
                keywords(&sc.content, policy.keyword_count),
            )
        })
        .collect();

    let mut related = HashMap::with_capacity(criteria.len());
    for (id, _, words) in &criteria {
        let mut nums = Vec::new();
        for (other_id, other_num, other_words) in &criteria {
            if policy.limit.is_some_and(|limit| nums.len() >= limit) {
                break;
            }
            if other_id == id {
                continue;
            }
            if words.intersection(other_words).count() >= policy.min_shared {
                nums.push(other_num.to_string());
            }
        }
        related.insert(id.to_string(), nums);
    }
    related
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_with(contents: &[(&str, &str, &str)]) -> WcagSpec {
        let criteria: Vec<serde_json::Value> = contents
            .iter()
            .map(|(id, num, content)| {
                serde_json::json!({
                    "id": id, "num": num, "title": id, "content": content,
                    "level": "A", "versions": ["2.2"]
                })
            })
            .collect();
        let json = serde_json::json!({
            "principles": [{
                "id": "operable", "num": "2", "title": "Operable", "content": "",
                "guidelines": [{
                    "id": "keyboard-accessible", "num": "2.1", "title": "Keyboard Accessible",
                    "content": "", "successcriteria": criteria
                }]
            }],
            "terms": []
        });
        WcagSpec::from_json("2.2", &json.to_string()).unwrap()
    }

    #[test]
    fn test_three_shared_words_relate_two_do_not() {
        let spec = spec_with(&[
            ("a", "2.1.1", "<p>All functionality is operable through a keyboard interface</p>"),
            ("b", "2.1.2", "All content is reachable via alternate pointer devices"),
            ("c", "2.1.3", "Some functionality is never blocked"),
        ]);
        let related = find_related(&spec, &RelatedPolicy::default());
        // a/b share "all" and "is"; a/c share "functionality" and "is".
        assert!(related["a"].is_empty());
        assert!(related["b"].is_empty());
        assert!(related["c"].is_empty());

        let spec = spec_with(&[
            ("a", "2.1.1", "All functionality is operable through a keyboard interface"),
            ("b", "2.1.2", "Keyboard focus is operable from any component"),
        ]);
        let related = find_related(&spec, &RelatedPolicy::default());
        // "keyboard", "is", "operable"
        assert_eq!(related["a"], vec!["2.1.2"]);
        assert_eq!(related["b"], vec!["2.1.1"]);
    }

    #[test]
    fn test_only_first_keywords_count() {
        let spec = spec_with(&[
            ("a", "1", "one two three four five six seven eight nine ten alpha beta gamma"),
            ("b", "2", "x y z w v u t s r q alpha beta gamma"),
        ]);
        let related = find_related(&spec, &RelatedPolicy::default());
        assert!(related["a"].is_empty());
        assert!(related["b"].is_empty());
    }

    #[test]
    fn test_irreflexive_and_symmetric_when_uncapped() {
        let spec = spec_with(&[
            ("a", "1", "users can pause stop or hide moving content"),
            ("b", "2", "users can pause stop the audio"),
            ("c", "3", "users can stop or hide any popup content"),
            ("d", "4", "completely unrelated sentence here"),
        ]);
        let related = find_related(&spec, &RelatedPolicy::default());
        let num_to_id = [("1", "a"), ("2", "b"), ("3", "c"), ("4", "d")];
        for (id, nums) in &related {
            let own_num = num_to_id.iter().find(|(_, i)| i == id).unwrap().0;
            assert!(!nums.iter().any(|n| n == own_num), "{id} relates to itself");
            for num in nums {
                let other = num_to_id.iter().find(|(n, _)| n == num).unwrap().1;
                assert!(
                    related[other].iter().any(|n| n == own_num),
                    "{id} -> {other} not mirrored"
                );
            }
        }
        assert_eq!(related["a"], vec!["2", "3"]);
        assert!(related["d"].is_empty());
    }

    #[test]
    fn test_limit_caps_in_document_order() {
        let spec = spec_with(&[
            ("a", "1", "text can be resized easily"),
            ("b", "2", "text can be resized today"),
            ("c", "3", "text can be resized tomorrow"),
        ]);
        let related = find_related(&spec, &RelatedPolicy::with_limit(Some(1)));
        assert_eq!(related["a"], vec!["2"]);
        assert_eq!(related["c"], vec!["1"]);
    }

    #[test]
    fn test_zero_limit_relates_nothing() {
        let spec = spec_with(&[
            ("a", "1", "text can be resized easily"),
            ("b", "2", "text can be resized today"),
        ]);
        let related = find_related(&spec, &RelatedPolicy::with_limit(Some(0)));
        assert!(related["a"].is_empty());
        assert!(related["b"].is_empty());
    }
}
