//! Query expansion for code-switched speech
//!
//! Callers mix Malayalam and English technical vocabulary. Known native
//! terms are expanded with their English equivalent (and vice versa) so a
//! query matches documents written in either language.

use std::collections::HashMap;

/// Malayalam → English technical vocabulary
const TERM_PAIRS: &[(&str, &str)] = &[
    ("റെഡ് ലൈറ്റ്", "red light"),
    ("ചുവന്ന ലൈറ്റ്", "red light"),
    ("പച്ച ലൈറ്റ്", "green light"),
    ("മഞ്ഞ ലൈറ്റ്", "yellow light"),
    ("സിഗ്നൽ", "signal"),
    ("മോഡം", "modem"),
    ("റൗട്ടർ", "router"),
    ("വൈഫൈ", "wifi"),
    ("ഇന്റർനെറ്റ്", "internet"),
    ("കണക്ഷൻ", "connection"),
    ("കേബിൾ", "cable"),
    ("ചാനൽ", "channel"),
    ("റീചാർജ്", "recharge"),
    ("സ്പീഡ്", "speed"),
    ("സ്ലോ", "slow"),
    ("ഫൈബർ", "fiber"),
    ("അഡാപ്റ്റർ", "adapter"),
];

/// Expanded query
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedQuery {
    pub original: String,
    /// Terms appended to the original text
    pub added: Vec<String>,
}

impl ExpandedQuery {
    pub fn was_expanded(&self) -> bool {
        !self.added.is_empty()
    }

    /// Original text followed by the added terms
    pub fn text(&self) -> String {
        if self.added.is_empty() {
            return self.original.clone();
        }
        format!("{} {}", self.original, self.added.join(" "))
    }
}

/// Bilingual term expander
#[derive(Debug, Clone)]
pub struct QueryExpander {
    native_to_english: HashMap<String, String>,
    english_to_native: HashMap<String, Vec<String>>,
}

impl Default for QueryExpander {
    fn default() -> Self {
        Self::from_pairs(TERM_PAIRS.iter().copied())
    }
}

impl QueryExpander {
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut native_to_english = HashMap::new();
        let mut english_to_native: HashMap<String, Vec<String>> = HashMap::new();
        for (native, english) in pairs {
            native_to_english.insert(native.to_string(), english.to_lowercase());
            english_to_native
                .entry(english.to_lowercase())
                .or_default()
                .push(native.to_string());
        }
        Self {
            native_to_english,
            english_to_native,
        }
    }

    pub fn expand(&self, query: &str) -> ExpandedQuery {
        let lowered = query.to_lowercase();
        let mut added: Vec<String> = Vec::new();

        for (native, english) in &self.native_to_english {
            if query.contains(native.as_str()) && !lowered.contains(english.as_str()) {
                push_unique(&mut added, english);
            }
        }
        for (english, natives) in &self.english_to_native {
            if lowered.contains(english.as_str()) {
                for native in natives {
                    if !query.contains(native.as_str()) {
                        push_unique(&mut added, native);
                    }
                }
            }
        }

        // Map iteration order is unspecified
        added.sort();
        ExpandedQuery {
            original: query.to_string(),
            added,
        }
    }
}

fn push_unique(terms: &mut Vec<String>, term: &str) {
    if !terms.iter().any(|t| t == term) {
        terms.push(term.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_term_gains_english() {
        let expanded = QueryExpander::default().expand("മോഡം ഓൺ ആകുന്നില്ല");
        assert!(expanded.was_expanded());
        assert!(expanded.added.contains(&"modem".to_string()));
        assert!(expanded.text().starts_with("മോഡം ഓൺ ആകുന്നില്ല "));
    }

    #[test]
    fn test_english_term_gains_native() {
        let expanded = QueryExpander::default().expand("the red light is blinking");
        assert!(expanded.added.contains(&"റെഡ് ലൈറ്റ്".to_string()));
        assert!(expanded.added.contains(&"ചുവന്ന ലൈറ്റ്".to_string()));
    }

    #[test]
    fn test_no_known_terms() {
        let expanded = QueryExpander::default().expand("hello there");
        assert!(!expanded.was_expanded());
        assert_eq!(expanded.text(), "hello there");
    }
}
