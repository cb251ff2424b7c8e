//! Objects, their kinds, and references between them.

pub use self::{kind::*, reference::*};

pub mod hash_table;
pub mod layout;

mod kind;
mod reference;
