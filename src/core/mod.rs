//! Core types and error handling for otad.

pub mod error;

pub use error::{ErrorContext, OtaError, user_friendly_error};
