//! Sentence-aware text segmentation for progressive synthesis

use unicode_segmentation::UnicodeSegmentation;

use call_agent_config::DeliveryConfig;

const SENTENCE_ENDERS: [char; 6] = ['.', '!', '?', '।', '።', '፡'];

/// Splits a response into segments that can be synthesized independently
///
/// Sentence pieces are accumulated until the segment grows past
/// `max_segment_chars`, or passes `sentence_end_min_chars` and ends on
/// sentence punctuation. Segments shorter than `merge_below_chars` are then
/// folded into their predecessor (or, for a leading fragment, the next one).
#[derive(Debug, Clone)]
pub struct SentenceSegmenter {
    max_segment_chars: usize,
    sentence_end_min_chars: usize,
    merge_below_chars: usize,
}

impl Default for SentenceSegmenter {
    fn default() -> Self {
        Self::new(&DeliveryConfig::default())
    }
}

impl SentenceSegmenter {
    pub fn new(config: &DeliveryConfig) -> Self {
        Self {
            max_segment_chars: config.max_segment_chars,
            sentence_end_min_chars: config.sentence_end_min_chars,
            merge_below_chars: config.merge_below_chars,
        }
    }

    pub fn segment(&self, text: &str) -> Vec<String> {
        let pieces = split_sentences(text);
        let total = pieces.len();

        let mut raw = Vec::new();
        let mut current = String::new();
        for (i, piece) in pieces.into_iter().enumerate() {
            current.push_str(&piece);
            let len = current.trim().chars().count();
            let ends_sentence = current
                .trim_end()
                .chars()
                .last()
                .map(|c| SENTENCE_ENDERS.contains(&c))
                .unwrap_or(false);

            if len > self.max_segment_chars
                || i + 1 == total
                || (len > self.sentence_end_min_chars && ends_sentence)
            {
                raw.push(std::mem::take(&mut current));
            }
        }

        self.merge_small(raw)
    }

    fn merge_small(&self, raw: Vec<String>) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(raw.len());
        let mut carry = String::new();

        for segment in raw {
            let trimmed = segment.trim();
            if trimmed.is_empty() {
                continue;
            }

            let mut candidate = std::mem::take(&mut carry);
            if !candidate.is_empty() {
                candidate.push(' ');
            }
            candidate.push_str(trimmed);

            if candidate.chars().count() < self.merge_below_chars {
                match out.last_mut() {
                    Some(prev) => {
                        prev.push(' ');
                        prev.push_str(&candidate);
                    }
                    None => carry = candidate,
                }
            } else {
                out.push(candidate);
            }
        }

        if !carry.is_empty() {
            out.push(carry);
        }
        out
    }
}

/// Split after sentence punctuation, keeping the punctuation and trailing
/// whitespace with the sentence
fn split_sentences(text: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut after_ender = false;

    for grapheme in text.graphemes(true) {
        let c = grapheme.chars().next().unwrap_or(' ');

        if after_ender && !c.is_whitespace() && !SENTENCE_ENDERS.contains(&c) {
            pieces.push(std::mem::take(&mut current));
            after_ender = false;
        }

        current.push_str(grapheme);

        if SENTENCE_ENDERS.contains(&c) {
            after_ender = true;
        }
    }

    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}
