//! HTTP server: application state, router and background maintenance.

pub mod maintenance;
pub mod routes;
pub mod state;

pub use maintenance::spawn_maintenance;
pub use routes::build_router;
pub use state::AppState;
