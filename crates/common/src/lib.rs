//! Shared types for the Trakt gateway workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
