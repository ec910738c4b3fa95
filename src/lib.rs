//! Stairs Relay - real-time decision relay for the infinite stairs game
//!
//! A game client streams its upcoming stair directions over a WebSocket each
//! tick; when the agent is driving, the relay answers with a relative steer
//! action (keep going / flip) from a learned policy or a greedy heuristic.

pub mod app;
pub mod config;
pub mod http;
pub mod policy;
pub mod util;
pub mod ws;

pub use app::AppState;
pub use config::Config;
pub use http::build_router;
