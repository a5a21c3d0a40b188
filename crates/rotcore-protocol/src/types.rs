use serde::{Deserialize, Serialize};

/// ICE candidate in the form browsers emit from `RTCIceCandidate.toJSON()`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateInit {
    pub candidate: String,
    #[serde(default, rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Session description in browser (`RTCSessionDescriptionInit`) form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A unit of negotiation traffic for one peer.
///
/// Offers and candidates flow from clients to the server. Answers and
/// server-gathered candidates flow back, on push transports only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    Offer { peer_id: String, sdp: String },
    Candidate { peer_id: String, candidate: CandidateInit },
    Answer { peer_id: String, sdp: String },
}

impl SignalingEvent {
    pub fn peer_id(&self) -> &str {
        match self {
            SignalingEvent::Offer { peer_id, .. }
            | SignalingEvent::Candidate { peer_id, .. }
            | SignalingEvent::Answer { peer_id, .. } => peer_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_uses_browser_field_names() {
        let json = r#"{
            "candidate": "candidate:1 1 udp 2130706431 10.0.0.2 50000 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0,
            "usernameFragment": "abcd"
        }"#;

        let candidate: CandidateInit = serde_json::from_str(json).unwrap();
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_m_line_index, Some(0));
        assert_eq!(candidate.username_fragment.as_deref(), Some("abcd"));
    }

    #[test]
    fn candidate_optional_fields_may_be_absent() {
        let candidate: CandidateInit =
            serde_json::from_str(r#"{"candidate": "candidate:1 1 udp 1 1.2.3.4 5 typ host"}"#)
                .unwrap();
        assert!(candidate.sdp_mid.is_none());
        assert!(candidate.sdp_m_line_index.is_none());
    }

    #[test]
    fn session_description_type_is_lowercase() {
        let json = serde_json::to_value(SessionDescription::answer("v=0")).unwrap();
        assert_eq!(json["type"], "answer");
        assert_eq!(json["sdp"], "v=0");
    }
}
