//! HTTP surface: health, static assets and the game socket

pub mod routes;

pub use routes::build_router;
