//! HTTP API handlers for empire-server
//!
//! JSON bodies use camelCase field names. Each feature area contributes a
//! route group; `build_router` mounts the groups of enabled engines.

pub mod api_keys;
pub mod challenges;
pub mod forum;
pub mod health;
pub mod newsletter;
pub mod sse;
pub mod system;
pub mod videos;

pub use api_keys::api_key_routes;
pub use challenges::challenge_routes;
pub use forum::forum_routes;
pub use health::health_routes;
pub use newsletter::newsletter_routes;
pub use sse::event_stream;
pub use system::system_routes;
pub use videos::video_routes;
