//! JSON text frames exchanged with the media server.
//!
//! ```text
//! -> {"event":"start","streamSid":"12345"}
//! -> {"event":"media","media":{"payload":"<base64 μ-law>"}}
//! <- {"event":"media","media":{"payload":"<base64 μ-law>"}}
//! ```

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::InboundError;

/// Inbound payloads are accepted with or without trailing `=` padding.
const PAYLOAD_DECODER: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaPayload {
    /// Base64 (standard alphabet, padded) of one μ-law buffer.
    pub payload: String,
}

/// Messages sent by this client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ClientMessage {
    Start {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
    Media { media: MediaPayload },
}

impl ClientMessage {
    pub fn start(stream_sid: impl Into<String>) -> Self {
        ClientMessage::Start {
            stream_sid: stream_sid.into(),
        }
    }

    /// Wrap one μ-law buffer.
    pub fn media(ulaw: &[u8]) -> Self {
        ClientMessage::Media {
            media: MediaPayload {
                payload: STANDARD.encode(ulaw),
            },
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Messages received from the server. Only `media` carries meaning here;
/// every other event value lands in `Other`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ServerMessage {
    Media { media: MediaPayload },
    #[serde(other)]
    Other,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, InboundError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl MediaPayload {
    /// The μ-law bytes carried by this payload.
    pub fn decode(&self) -> Result<Vec<u8>, InboundError> {
        Ok(PAYLOAD_DECODER.decode(self.payload.as_bytes())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_frame() {
        let json = ClientMessage::start("12345").to_json().unwrap();
        assert_eq!(json, r#"{"event":"start","streamSid":"12345"}"#);
    }

    #[test]
    fn test_media_frame() {
        let json = ClientMessage::media(&[0xFF]).to_json().unwrap();
        assert_eq!(json, r#"{"event":"media","media":{"payload":"/w=="}}"#);
    }

    #[test]
    fn test_parse_media() {
        let msg = ServerMessage::parse(r#"{"event":"media","media":{"payload":"/w=="}}"#).unwrap();
        match msg {
            ServerMessage::Media { media } => assert_eq!(media.decode().unwrap(), vec![0xFF]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unpadded_payload_decodes() {
        let msg = ServerMessage::parse(r#"{"event":"media","media":{"payload":"/w"}}"#).unwrap();
        let ServerMessage::Media { media } = msg else {
            panic!("expected media");
        };
        assert_eq!(media.decode().unwrap(), vec![0xFF]);

        let media = MediaPayload {
            payload: "nJyc".to_string(),
        };
        assert_eq!(media.decode().unwrap(), vec![0x9C; 3]);
        let media = MediaPayload {
            payload: "nJw".to_string(),
        };
        assert_eq!(media.decode().unwrap(), vec![0x9C; 2]);
    }

    #[test]
    fn test_parse_ignores_extra_fields() {
        let msg = ServerMessage::parse(
            r#"{"event":"media","sequenceNumber":"4","media":{"payload":"AAA=","track":"outbound"},"streamSid":"x"}"#,
        )
        .unwrap();
        assert!(matches!(msg, ServerMessage::Media { .. }));
    }

    #[test]
    fn test_parse_other_events() {
        for text in [
            r#"{"event":"start","streamSid":"abc"}"#,
            r#"{"event":"mark","mark":{"name":"x"}}"#,
            r#"{"event":"stop"}"#,
        ] {
            assert_eq!(ServerMessage::parse(text).unwrap(), ServerMessage::Other);
        }
    }

    #[test]
    fn test_parse_failures() {
        assert!(matches!(
            ServerMessage::parse("not json"),
            Err(InboundError::Json(_))
        ));
        // Missing discriminant.
        assert!(ServerMessage::parse(r#"{"media":{"payload":"/w=="}}"#).is_err());
        // Media event without its payload object.
        assert!(ServerMessage::parse(r#"{"event":"media"}"#).is_err());

        let bad = MediaPayload {
            payload: "***".to_string(),
        };
        assert!(matches!(bad.decode(), Err(InboundError::Base64(_))));
    }
}
