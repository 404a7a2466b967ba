//! Whole-word phrase matching over mixed-script (Malayalam/English) text

use regex::{Regex, RegexBuilder};

/// A set of phrases matched case-insensitively on word boundaries
///
/// "los" matches "red los light" but not "closed". Boundaries are only
/// enforced on sides where the phrase itself starts or ends with a word
/// character, so phrases ending in punctuation still match.
#[derive(Debug, Clone, Default)]
pub struct PhraseSet {
    phrases: Vec<(String, Regex)>,
}

impl PhraseSet {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases = phrases
            .into_iter()
            .filter_map(|p| {
                let phrase = p.as_ref().trim().to_string();
                compile(&phrase).map(|re| (phrase, re))
            })
            .collect();
        Self { phrases }
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.phrases.iter().any(|(_, re)| re.is_match(text))
    }

    /// Number of distinct phrases present in `text`
    pub fn count(&self, text: &str) -> usize {
        self.phrases.iter().filter(|(_, re)| re.is_match(text)).count()
    }

    /// First phrase (in declaration order) present in `text`
    pub fn first_match(&self, text: &str) -> Option<&str> {
        self.phrases
            .iter()
            .find(|(_, re)| re.is_match(text))
            .map(|(p, _)| p.as_str())
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}

/// Whether `text` contains `phrase` as a whole word or phrase
pub fn contains_phrase(text: &str, phrase: &str) -> bool {
    compile(phrase.trim())
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

fn compile(phrase: &str) -> Option<Regex> {
    let first = phrase.chars().next()?;
    let last = phrase.chars().next_back()?;

    let mut pattern = String::with_capacity(phrase.len() + 8);
    if is_word_char(first) {
        pattern.push_str(r"\b");
    }
    pattern.push_str(&regex::escape(phrase));
    if is_word_char(last) {
        pattern.push_str(r"\b");
    }

    match RegexBuilder::new(&pattern).case_insensitive(true).build() {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(phrase, error = %e, "Skipping unmatchable phrase");
            None
        }
    }
}

/// Letters, digits and combining marks (Malayalam vowel signs and virama)
fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || ('\u{0D00}'..='\u{0D7F}').contains(&c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_boundaries() {
        let set = PhraseSet::new(["los", "red light"]);
        assert!(set.is_match("There is a LOS light"));
        assert!(set.is_match("the red light is blinking"));
        assert!(!set.is_match("the shop is closed"));
        assert!(!set.is_match("a reddish light"));
    }

    #[test]
    fn test_count_and_first_match() {
        let set = PhraseSet::new(["slow", "buffering", "speed"]);
        assert_eq!(set.count("slow speed and slow pages"), 2);
        assert_eq!(set.first_match("buffering, so slow"), Some("slow"));
        assert_eq!(set.first_match("all fine"), None);
    }

    #[test]
    fn test_malayalam_phrases() {
        let set = PhraseSet::new(["റെഡ് ലൈറ്റ്", "ശരിയായി"]);
        assert!(set.is_match("മോഡത്തിൽ റെഡ് ലൈറ്റ് ഉണ്ട്"));
        assert!(set.is_match("ഇപ്പോൾ ശരിയായി"));
        assert!(!set.is_match("ശരിയായില്ല"));
    }

    #[test]
    fn test_contains_phrase() {
        assert!(contains_phrase("No lights at all", "no lights"));
        assert!(!contains_phrase("anything", "nothing"));
        assert!(!contains_phrase("text", "   "));
    }
}
