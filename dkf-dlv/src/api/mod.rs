//! HTTP API handlers for dkf-dlv
//!
//! REST for staging, search, jobs and settings; SSE for job and index events.

pub mod demos;
pub mod health;
pub mod jobs;
pub mod search;
pub mod settings;
pub mod sse;
pub mod staging;

pub use demos::demo_routes;
pub use health::health_routes;
pub use jobs::job_routes;
pub use search::search_routes;
pub use settings::settings_routes;
pub use sse::event_routes;
pub use staging::staging_routes;
