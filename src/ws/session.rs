//! Per-connection session state machine
//!
//! ```text
//! Connecting --accept--> Open --close/error/shutdown--> Closing --> Closed
//! ```
//!
//! Only `Open` processes frames. No game history is kept between frames: every
//! tick is judged from the window it carries.

use std::fmt;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::config::Config;
use crate::policy::Decider;
use crate::util::rate_limit::{FrameRateLimiter, ResponsePacer};
use crate::ws::protocol::{self, Control, Inbound, ProtocolError, SteerDecision};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Upgrade accepted, not yet serving
    Connecting,
    /// Serving frames
    Open,
    /// Tearing down; pending responses are abandoned
    Closing,
    /// Terminal
    Closed,
}

impl SessionState {
    fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Open) | (Connecting, Closing) | (Open, Closing) | (Closing, Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What to do with one inbound text frame
#[derive(Debug)]
pub enum FrameOutcome {
    /// Pace, then send this decision
    Respond(SteerDecision),
    /// Valid frame that needs no answer (manual play or unknown event)
    Silent,
    /// Frame could not be decoded; the session stays open
    Rejected(ProtocolError),
    /// Frame exceeded the inbound ceiling and was dropped
    Throttled,
    /// Session is not open
    NotOpen,
}

/// One live client connection
pub struct Session {
    id: Uuid,
    state: SessionState,
    decider: Arc<Decider>,
    pacer: ResponsePacer,
    frame_limiter: FrameRateLimiter,
    throttled_frames: u64,
}

impl Session {
    pub fn new(decider: Arc<Decider>, config: &Config) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Connecting,
            decider,
            pacer: ResponsePacer::new(config.min_response_interval),
            frame_limiter: FrameRateLimiter::new(config.inbound_frame_limit),
            throttled_frames: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Frames dropped by the inbound ceiling so far
    pub fn throttled_frames(&self) -> u64 {
        self.throttled_frames
    }

    pub fn open(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Open)
    }

    pub fn begin_close(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Closing)
    }

    pub fn finish_close(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Closed)
    }

    fn transition(&mut self, next: SessionState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(session_id = %self.id, from = %self.state, to = %next, "Session transition");
        self.state = next;
        Ok(())
    }

    /// Decode a text frame and decide whether it earns a response
    pub async fn handle_text(&mut self, text: &str) -> FrameOutcome {
        if self.state != SessionState::Open {
            return FrameOutcome::NotOpen;
        }

        if !self.frame_limiter.check_frame() {
            self.throttled_frames += 1;
            return FrameOutcome::Throttled;
        }

        let event = match protocol::decode(text) {
            Ok(Inbound::State(event)) => event,
            Ok(Inbound::Ignored { event }) => {
                debug!(session_id = %self.id, event = %event, "Ignoring unhandled event");
                return FrameOutcome::Silent;
            }
            Err(e) => return FrameOutcome::Rejected(e),
        };

        let Control::Agent(observation) = event.control else {
            return FrameOutcome::Silent;
        };

        let action = self.decider.decide_within(&observation, event.facing).await;
        debug!(
            session_id = %self.id,
            score = event.score,
            facing = ?event.facing,
            action = ?action,
            "Decision ready"
        );

        FrameOutcome::Respond(action.into())
    }

    /// Wait for this session's next response slot
    pub async fn pace(&self) {
        self.pacer.pace().await;
    }

    pub fn mark_sent(&mut self) {
        self.pacer.mark_sent();
    }
}

/// Session lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid session transition {from} -> {to}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },
}
