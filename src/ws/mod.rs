//! Real-time decision relay over WebSocket

pub mod handler;
pub mod protocol;
pub mod registry;
pub mod session;
