//! Secret handling utilities.
//!
//! Re-exports the secrecy types used for the database URL and API keys.

pub use secrecy::{ExposeSecret, SecretString};
