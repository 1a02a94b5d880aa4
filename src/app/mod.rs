//! Application state and background maintenance

pub mod state;

pub use state::AppState;
