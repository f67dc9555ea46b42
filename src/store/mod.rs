//! Storage module for session persistence and the contact roster.

mod file;
mod memory;
mod session;
mod traits;

pub use file::*;
pub use memory::*;
pub use session::*;
pub use traits::*;
