//! Shared types

pub mod error;

pub use error::{GatherError, Result};
