//! Transcript events produced by the streaming transcription collaborator

use serde::{Deserialize, Serialize};

/// One interim or final recognition result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub text: String,
    pub is_final: bool,
    /// Provider stability score for interim results; finals report 1.0
    #[serde(default = "default_stability")]
    pub stability: f32,
}

fn default_stability() -> f32 {
    1.0
}

impl TranscriptEvent {
    pub fn final_result(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            stability: 1.0,
        }
    }

    pub fn interim(text: impl Into<String>, stability: f32) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            stability,
        }
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let f = TranscriptEvent::final_result("my internet is down");
        assert!(f.is_final);
        assert_eq!(f.word_count(), 4);

        let i = TranscriptEvent::interim("my inter", 0.4);
        assert!(!i.is_final);
        assert_eq!(i.stability, 0.4);
    }

    #[test]
    fn test_missing_stability_defaults_to_one() {
        let event: TranscriptEvent =
            serde_json::from_str(r#"{"text":"hello","is_final":true}"#).unwrap();
        assert_eq!(event.stability, 1.0);
    }
}
