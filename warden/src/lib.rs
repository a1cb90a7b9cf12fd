//! Warden
//!
//! Per-object permissions: grant a user or group a named permission on one
//! specific object, then answer "does this subject hold this permission on
//! that object?" with batched, cached lookups.
//!
//! Start from [`Guardian`], which wires the content type resolver, grant
//! storage and both subject-kind managers together.

pub mod checker;
pub mod config;
pub mod ctypes;
pub mod db;
mod engine;
pub mod error;
pub mod managers;
pub mod observability;
pub mod shortcuts;
pub mod store;

pub use checker::ObjectPermissionChecker;
pub use config::Config;
pub use error::{GuardianError, Result};
pub use managers::ObjectPermissionManager;
pub use shortcuts::{Guardian, GuardianBuilder};
