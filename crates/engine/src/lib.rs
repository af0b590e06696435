//! Taleweaver Engine library.
//!
//! All server-side code for the Taleweaver interactive-fiction engine.
//!
//! ## Structure
//!
//! - `use_cases/` - Session orchestration across the domain and the ports
//! - `infrastructure/` - External dependency implementations (ports + adapters)
//! - `api/` - HTTP entry points
//! - `app` - Application composition

pub mod api;
pub mod app;
pub mod infrastructure;
pub mod use_cases;

/// Test fixtures module for integration testing.
#[cfg(test)]
pub mod test_fixtures;

pub use app::App;
