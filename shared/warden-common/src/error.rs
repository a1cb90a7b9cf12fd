//! Common Error Types

use thiserror::Error;

/// A model key string was not of the form `app_label.model`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid model key '{0}': expected 'app_label.model'")]
pub struct ParseModelKeyError(pub String);
