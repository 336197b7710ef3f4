//! Inbound events from the chat gateway.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Opaque identity of a voter as asserted by the chat transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct VoterId(String);

impl VoterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VoterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for VoterId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for VoterId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

// Chat platforms hand out numeric ids; config files may carry either form.
impl<'de> Deserialize<'de> for VoterId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(i64),
            Text(String),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Number(n) => VoterId::from(n),
            Repr::Text(s) => VoterId(s),
        })
    }
}

/// Everything the gateway can tell the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// `/start`: begin a brand-new session, discarding any previous one.
    InitiateSession {
        voter: VoterId,
        first_name: Option<String>,
    },

    /// Free text typed by the voter.
    TextInput { voter: VoterId, text: String },

    /// A shared contact card. `asserted` is the identity the card belongs to,
    /// which may differ from the sender.
    ContactPayload {
        voter: VoterId,
        asserted: Option<VoterId>,
        phone: String,
        display_name: String,
        handle: Option<String>,
    },

    /// A candidate button was pressed.
    ChoiceSelected { voter: VoterId, candidate_key: String },

    /// `/cancel`.
    CancelRequested { voter: VoterId },

    /// `/result`, admin only.
    AdminResultsRequested { voter: VoterId },
}

impl InboundEvent {
    /// The identity that sent this event.
    pub fn voter(&self) -> &VoterId {
        match self {
            InboundEvent::InitiateSession { voter, .. }
            | InboundEvent::TextInput { voter, .. }
            | InboundEvent::ContactPayload { voter, .. }
            | InboundEvent::ChoiceSelected { voter, .. }
            | InboundEvent::CancelRequested { voter }
            | InboundEvent::AdminResultsRequested { voter } => voter,
        }
    }
}
