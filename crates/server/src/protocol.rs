//! Media-stream wire format
//!
//! Telephony providers stream a call as JSON text frames, each tagged with an
//! `event` field. Inbound audio arrives base64 encoded inside `media` events;
//! outbound audio goes back in the same envelope.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::ServerError;

/// One inbound frame from the telephony provider
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TransportEvent {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    Start {
        #[serde(default)]
        start: StartPayload,
        #[serde(default, alias = "streamSid")]
        stream_sid: Option<String>,
    },
    Dtmf {
        #[serde(default)]
        dtmf: Option<DtmfField>,
        #[serde(default)]
        digit: Option<String>,
    },
    Media {
        media: MediaPayload,
    },
    Stop,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct StartPayload {
    #[serde(default, alias = "callSid")]
    pub call_sid: Option<String>,
    #[serde(default, alias = "streamSid")]
    pub stream_sid: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
}

/// Providers disagree on the DTMF shape: some nest an object, some send the
/// digit directly
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DtmfField {
    Object { digit: String },
    Digit(String),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MediaPayload {
    pub payload: String,
}

impl TransportEvent {
    pub fn decode(text: &str) -> Result<Self, ServerError> {
        serde_json::from_str(text).map_err(|e| ServerError::Protocol(e.to_string()))
    }

    /// Keypad digit of a `dtmf` event
    pub fn digit(&self) -> Option<char> {
        let Self::Dtmf { dtmf, digit } = self else {
            return None;
        };
        let raw = match dtmf {
            Some(DtmfField::Object { digit }) | Some(DtmfField::Digit(digit)) => digit.as_str(),
            None => digit.as_deref()?,
        };
        raw.trim().chars().next()
    }

    /// Stream identifier, wherever the provider put it
    pub fn stream_sid(&self) -> Option<&str> {
        match self {
            Self::Start { start, stream_sid } => {
                stream_sid.as_deref().or(start.stream_sid.as_deref())
            },
            _ => None,
        }
    }
}

impl MediaPayload {
    pub fn decode_audio(&self) -> Result<Vec<u8>, ServerError> {
        STANDARD
            .decode(self.payload.as_bytes())
            .map_err(|e| ServerError::Protocol(format!("invalid media payload: {}", e)))
    }
}

/// Outbound audio frame
#[derive(Debug, Serialize)]
pub struct OutboundMedia<'a> {
    event: &'static str,
    stream_sid: &'a str,
    media: OutboundPayload,
}

#[derive(Debug, Serialize)]
struct OutboundPayload {
    payload: String,
}

impl<'a> OutboundMedia<'a> {
    pub fn new(stream_sid: &'a str, audio: &[u8]) -> Self {
        Self {
            event: "media",
            stream_sid,
            media: OutboundPayload {
                payload: STANDARD.encode(audio),
            },
        }
    }

    pub fn encode(&self) -> Result<String, ServerError> {
        serde_json::to_string(self).map_err(|e| ServerError::Protocol(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtmf_shapes() {
        let nested = TransportEvent::decode(r#"{"event":"dtmf","dtmf":{"digit":"7"}}"#).unwrap();
        assert_eq!(nested.digit(), Some('7'));

        let bare = TransportEvent::decode(r#"{"event":"dtmf","dtmf":"3"}"#).unwrap();
        assert_eq!(bare.digit(), Some('3'));

        let flat = TransportEvent::decode(r##"{"event":"dtmf","digit":"#"}"##).unwrap();
        assert_eq!(flat.digit(), Some('#'));

        let empty = TransportEvent::decode(r#"{"event":"dtmf"}"#).unwrap();
        assert_eq!(empty.digit(), None);
    }

    #[test]
    fn test_outbound_envelope() {
        let frame = OutboundMedia::new("MZ1", b"abc").encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "media");
        assert_eq!(value["stream_sid"], "MZ1");
        assert_eq!(value["media"]["payload"], "YWJj");
    }

    #[test]
    fn test_unknown_event_is_error() {
        assert!(TransportEvent::decode(r#"{"event":"mark"}"#).is_err());
        assert!(TransportEvent::decode("not json").is_err());
    }
}
