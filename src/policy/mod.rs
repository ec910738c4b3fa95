//! Decision function: observation window + facing -> relative steer action
//!
//! A decision source produces an *absolute* intent (Left/Right). The game only
//! understands *relative* input (keep going / flip), so every intent goes
//! through [`to_relative`] before it leaves the server.

pub mod decider;
pub mod mlp;

pub use decider::Decider;
pub use mlp::MlpPolicy;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Number of upcoming stairs in an observation window
pub const OBSERVATION_LEN: usize = 5;

/// Absolute movement direction in world space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Direction {
    Left = 0,
    Right = 1,
}

impl Default for Direction {
    /// Older clients omit their facing; the game spawns facing right
    fn default() -> Self {
        Self::Right
    }
}

impl Direction {
    /// Map an output index of a two-logit policy head
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Left),
            1 => Some(Self::Right),
            _ => None,
        }
    }
}

impl TryFrom<u8> for Direction {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Left),
            1 => Ok(Self::Right),
            other => Err(format!("direction must be 0 or 1, got {}", other)),
        }
    }
}

impl From<Direction> for u8 {
    fn from(dir: Direction) -> Self {
        dir as u8
    }
}

/// Relative action understood by the game client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SteerAction {
    /// Keep moving in the current facing
    Continue = 0,
    /// Reverse facing before stepping
    Flip = 1,
}

impl TryFrom<u8> for SteerAction {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Continue),
            1 => Ok(Self::Flip),
            other => Err(format!("action must be 0 or 1, got {}", other)),
        }
    }
}

impl From<SteerAction> for u8 {
    fn from(action: SteerAction) -> Self {
        action as u8
    }
}

/// The next five required moves, index 0 being the very next stair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation([Direction; OBSERVATION_LEN]);

impl Observation {
    /// Build a window from raw wire values.
    ///
    /// Short windows are padded with `Right`, matching how the game pads its
    /// own look-ahead near the end of a generated stair run.
    pub fn from_bits(bits: &[i64]) -> Result<Self, ObservationError> {
        if bits.len() > OBSERVATION_LEN {
            return Err(ObservationError::TooLong(bits.len()));
        }

        let mut steps = [Direction::Right; OBSERVATION_LEN];
        for (index, &value) in bits.iter().enumerate() {
            steps[index] = match value {
                0 => Direction::Left,
                1 => Direction::Right,
                _ => return Err(ObservationError::InvalidEntry { index, value }),
            };
        }

        Ok(Self(steps))
    }

    pub fn steps(&self) -> &[Direction; OBSERVATION_LEN] {
        &self.0
    }

    pub fn next_step(&self) -> Direction {
        self.0[0]
    }

    /// Network input vector (0.0 = Left, 1.0 = Right)
    pub fn features(&self) -> [f32; OBSERVATION_LEN] {
        self.0.map(|d| f32::from(u8::from(d)))
    }
}

/// Observation window validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObservationError {
    #[error("observation has {0} entries, at most {} allowed", OBSERVATION_LEN)]
    TooLong(usize),

    #[error("observation entry {index} is {value}, expected 0 or 1")]
    InvalidEntry { index: usize, value: i64 },
}

/// Anything that can turn an observation into an absolute intent.
///
/// Implementations are shared by every session, so inference must be safe to
/// run concurrently.
pub trait DecisionSource: Send + Sync {
    /// Short label used in logs and the health endpoint
    fn name(&self) -> &'static str;

    /// Deterministic intended direction for this window
    fn predict(&self, observation: &Observation) -> Result<Direction, PolicyError>;
}

/// Greedy fallback: step toward the very next stair
#[derive(Debug, Clone, Copy, Default)]
pub struct Heuristic;

impl Heuristic {
    pub fn intent(&self, observation: &Observation) -> Direction {
        observation.next_step()
    }
}

impl DecisionSource for Heuristic {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn predict(&self, observation: &Observation) -> Result<Direction, PolicyError> {
        Ok(self.intent(observation))
    }
}

/// Bridge an absolute intent into the game's relative action space
pub fn to_relative(intended: Direction, facing: Direction) -> SteerAction {
    if intended == facing {
        SteerAction::Continue
    } else {
        SteerAction::Flip
    }
}

/// Heuristic decision, used whenever no learned policy is serving
pub fn decide(observation: &Observation, facing: Direction) -> SteerAction {
    to_relative(Heuristic.intent(observation), facing)
}

/// Decision source failures
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("failed to read policy weights: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse policy weights: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid policy shape: {0}")]
    Shape(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("inference exceeded the {0:?} decision budget")]
    Timeout(Duration),
}
