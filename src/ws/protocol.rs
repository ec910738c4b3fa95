//! WebSocket protocol message definitions
//! These are the wire types for client-server communication
//!
//! Client -> server: `{"event":"state","obs":[0,1,1,0,1],"score":12,"ai_active":true,"playerDir":1}`
//! Server -> client: `{"action":0}`

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::policy::{Direction, Observation, ObservationError, SteerAction};

/// Discriminator of the only event this relay acts on
pub const STATE_EVENT: &str = "state";

/// Raw inbound envelope as sent by the game client.
///
/// `score` and `ai_active` are read loosely: the browser client sends
/// whatever its game state holds.
#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    obs: Option<Vec<i64>>,
    #[serde(default, deserialize_with = "lenient_score")]
    score: i64,
    #[serde(default, deserialize_with = "truthy")]
    ai_active: bool,
    /// Older clients omit this; they always start facing right
    #[serde(rename = "playerDir", default)]
    player_dir: Option<Direction>,
}

/// Any JSON number, truncated; anything else counts as 0
fn lenient_score<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .unwrap_or(0))
}

/// Null, false, zero and empty values are false; everything else is true
fn truthy<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    })
}

/// Who is driving the player this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Human input; the observation is not needed
    Manual,
    /// Agent input with the window to judge
    Agent(Observation),
}

/// Decoded per-tick game state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameActionEvent {
    pub score: i64,
    pub facing: Direction,
    pub control: Control,
}

impl GameActionEvent {
    pub fn ai_active(&self) -> bool {
        matches!(self.control, Control::Agent(_))
    }

    pub fn observation(&self) -> Option<&Observation> {
        match &self.control {
            Control::Agent(obs) => Some(obs),
            Control::Manual => None,
        }
    }
}

/// Result of decoding one inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A "state" tick
    State(GameActionEvent),
    /// Well-formed envelope with an event this relay does not handle
    Ignored { event: String },
}

/// Outbound decision envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SteerDecision {
    pub action: SteerAction,
}

impl From<SteerAction> for SteerDecision {
    fn from(action: SteerAction) -> Self {
        Self { action }
    }
}

/// Decode a text frame
pub fn decode(raw: &str) -> Result<Inbound, ProtocolError> {
    let envelope: Envelope = serde_json::from_str(raw).map_err(ProtocolError::Malformed)?;

    if envelope.event != STATE_EVENT {
        return Ok(Inbound::Ignored {
            event: envelope.event,
        });
    }

    let control = if envelope.ai_active {
        let bits = envelope.obs.ok_or(ProtocolError::MissingObservation)?;
        Control::Agent(Observation::from_bits(&bits)?)
    } else {
        Control::Manual
    };

    Ok(Inbound::State(GameActionEvent {
        score: envelope.score,
        facing: envelope.player_dir.unwrap_or_default(),
        control,
    }))
}

/// Encode a decision as a text frame
pub fn encode(decision: &SteerDecision) -> Result<String, ProtocolError> {
    serde_json::to_string(decision).map_err(ProtocolError::Encode)
}

/// Codec errors. None of them end the session.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(serde_json::Error),

    #[error("ai_active frame without an observation")]
    MissingObservation,

    #[error("invalid observation: {0}")]
    InvalidObservation(#[from] ObservationError),

    #[error("failed to encode decision: {0}")]
    Encode(serde_json::Error),
}
