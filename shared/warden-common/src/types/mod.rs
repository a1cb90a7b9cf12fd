//! Shared types.

mod content;
mod grant;
mod object;
mod subject;

pub use content::*;
pub use grant::*;
pub use object::*;
pub use subject::*;
