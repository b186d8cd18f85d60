//! Wire messages exchanged with remote players.
//!
//! Every frame is a JSON text message. The first frame of a connection is the
//! client's [`RegisterRequest`]; the server answers with a [`RegisterResponse`]
//! (or an [`ErrorResponse`] followed by a close frame) and from then on only
//! pushes [`Envelope`]s.

use serde::{Deserialize, Serialize};

/// The kind of command carried by an [`Envelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Error,
    Tts,
    Sound,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Error => "error",
            Kind::Tts => "tts",
            Kind::Sound => "sound",
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A routed command: literal text to speak, a sound identifier, or an error
/// report for the player to log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: Kind,
    pub data: String,
}

impl Envelope {
    pub fn new(kind: Kind, data: impl Into<String>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// First frame sent by a player. An empty (or missing) name asks the server
/// to pick one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: String,
}

impl RegisterRequest {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Server answer to a successful registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub name: String,
    pub ping_period_seconds: u64,
}

/// Sent instead of a [`RegisterResponse`] when the handshake fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "Error")]
    pub error: String,
}

/// Anything the server may answer to the first frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum HandshakeReply {
    Registered(RegisterResponse),
    Rejected(ErrorResponse),
}
