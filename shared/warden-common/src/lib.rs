//! Warden Common Library
//!
//! Value types shared by the permission engine and its storage backends.

pub mod error;
pub mod types;

pub use error::ParseModelKeyError;
pub use types::*;
