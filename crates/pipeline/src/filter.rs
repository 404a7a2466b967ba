//! Transcript noise filtering and interim gating

use call_agent_config::TranscriptConfig;
use call_agent_core::TranscriptEvent;

/// Drops transcription misfires before they reach the session
#[derive(Debug, Clone)]
pub struct TranscriptFilter {
    min_chars: usize,
    interim_stability_threshold: f32,
    interim_min_words: usize,
    denylist: Vec<String>,
}

impl Default for TranscriptFilter {
    fn default() -> Self {
        Self::new(&TranscriptConfig::default())
    }
}

impl TranscriptFilter {
    pub fn new(config: &TranscriptConfig) -> Self {
        Self {
            min_chars: config.min_chars,
            interim_stability_threshold: config.interim_stability_threshold,
            interim_min_words: config.interim_min_words,
            denylist: config
                .denylist
                .iter()
                .map(|w| normalize_word(&w.to_lowercase()).to_string())
                .filter(|w| !w.is_empty())
                .collect(),
        }
    }

    /// Empty, punctuation-only, too short, or a denylisted misfire
    pub fn is_noise(&self, text: &str) -> bool {
        let trimmed = text.trim();

        if trimmed.chars().count() < self.min_chars {
            return true;
        }

        if !trimmed.chars().any(char::is_alphanumeric) {
            return true;
        }

        let lowered = trimmed.to_lowercase();
        let words: Vec<&str> = lowered
            .split_whitespace()
            .map(normalize_word)
            .filter(|w| !w.is_empty())
            .collect();

        // Denylisted words stand in for misrecognized short noises, so only
        // very short utterances are dropped, and only on a whole-word match
        if words.len() <= 2
            && words
                .iter()
                .any(|w| self.denylist.iter().any(|d| d.as_str() == *w))
        {
            return true;
        }

        false
    }

    /// Whether the event should be acted on
    ///
    /// Interim results must be stable and long enough to not be a fragment.
    pub fn accept(&self, event: &TranscriptEvent) -> bool {
        if self.is_noise(&event.text) {
            return false;
        }
        if event.is_final {
            return true;
        }
        event.stability >= self.interim_stability_threshold
            && event.word_count() >= self.interim_min_words
    }
}

/// Strip surrounding punctuation, keeping Malayalam signs such as the virama
fn normalize_word(word: &str) -> &str {
    word.trim_matches(|c: char| !(c.is_alphanumeric() || ('\u{0D00}'..='\u{0D7F}').contains(&c)))
}

/// Ensures each utterance is acted on once
///
/// Once an interim result is accepted, later interims and the final result
/// of the same utterance (equal text or an extension of it) are swallowed.
#[derive(Debug, Clone)]
pub struct UtteranceGate {
    filter: TranscriptFilter,
    accepted_interim: Option<String>,
}

impl UtteranceGate {
    pub fn new(filter: TranscriptFilter) -> Self {
        Self {
            filter,
            accepted_interim: None,
        }
    }

    /// Returns the event to forward, if any
    pub fn admit(&mut self, event: TranscriptEvent) -> Option<TranscriptEvent> {
        let normalized = normalize(&event.text);

        if let Some(prefix) = &self.accepted_interim {
            let same_utterance = normalized.starts_with(prefix.as_str());
            if event.is_final {
                self.accepted_interim = None;
                if same_utterance {
                    tracing::debug!(text = %event.text, "Final already handled as interim");
                    return None;
                }
            } else if same_utterance {
                return None;
            } else {
                self.accepted_interim = None;
            }
        }

        if !self.filter.accept(&event) {
            tracing::debug!(text = %event.text, is_final = event.is_final, "Transcript filtered");
            return None;
        }

        if !event.is_final {
            self.accepted_interim = Some(normalized);
        }
        Some(event)
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise_detection() {
        let filter = TranscriptFilter::default();
        assert!(filter.is_noise(""));
        assert!(filter.is_noise("   "));
        assert!(filter.is_noise("a"));
        assert!(filter.is_noise("..."));
        assert!(filter.is_noise("?!"));
        assert!(!filter.is_noise("ok"));
        assert!(!filter.is_noise("my internet is not working"));
    }

    #[test]
    fn test_denylisted_short_utterances_dropped() {
        let filter = TranscriptFilter::default();
        assert!(filter.is_noise("sex"));
        assert!(filter.is_noise("Sex."));
        assert!(filter.is_noise("സെക്സ്"));
        assert!(filter.is_noise("xxx hello"));
        // Longer utterances are kept
        assert!(!filter.is_noise("the xxx light on the modem is red"));
    }

    #[test]
    fn test_denylist_matches_whole_words_only() {
        let filter = TranscriptFilter::default();
        assert!(!filter.is_noise("Essex"));
        assert!(!filter.is_noise("xxxl router"));
        assert!(!filter.is_noise("pornography"));
        assert!(filter.is_noise("\"porn\""));
    }

    #[test]
    fn test_interim_gating() {
        let filter = TranscriptFilter::default();
        assert!(!filter.accept(&TranscriptEvent::interim("my internet", 0.9)));
        assert!(!filter.accept(&TranscriptEvent::interim(
            "my internet is not working today",
            0.5
        )));
        assert!(filter.accept(&TranscriptEvent::interim(
            "my internet is not working today",
            0.8
        )));
        assert!(filter.accept(&TranscriptEvent::final_result("yes")));
    }

    #[test]
    fn test_gate_swallows_final_of_accepted_interim() {
        let mut gate = UtteranceGate::new(TranscriptFilter::default());

        let interim = TranscriptEvent::interim("my internet is not working today", 0.9);
        assert!(gate.admit(interim).is_some());

        let longer = TranscriptEvent::interim("my internet is not working today at all", 0.9);
        assert!(gate.admit(longer).is_none());

        let final_event = TranscriptEvent::final_result("My internet is not working today at all.");
        assert!(gate.admit(final_event).is_none());

        let next = TranscriptEvent::final_result("the red light is on");
        assert!(gate.admit(next).is_some());
    }

    #[test]
    fn test_gate_forwards_unrelated_final() {
        let mut gate = UtteranceGate::new(TranscriptFilter::default());
        assert!(gate
            .admit(TranscriptEvent::interim("please restart my modem now", 0.95))
            .is_some());
        assert!(gate
            .admit(TranscriptEvent::final_result("no the light is red"))
            .is_some());
    }
}
