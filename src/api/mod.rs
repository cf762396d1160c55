// API module
//
// HTTP surface of a node: the peer-facing verbs plus wallet helpers

pub mod handlers;
pub mod routes;

// Re-export main components for easier access
pub use routes::configure_routes;
