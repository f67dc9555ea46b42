//! Types module for WeChat protocol types.
//!
//! Contacts, user name helpers and the events published on the bus.

mod contact;
mod events;

pub use contact::*;
pub use events::*;
