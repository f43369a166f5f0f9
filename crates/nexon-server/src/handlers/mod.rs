//! HTTP request handlers

pub mod health;
pub mod inference;
pub mod models;

// Re-export handler modules for convenience
pub use health::*;
pub use inference::*;
pub use models::*;
