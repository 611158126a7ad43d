//! Token models and secret handling for authorized sessions.

pub mod secret;
pub mod token;

pub use secret::*;
pub use token::*;
