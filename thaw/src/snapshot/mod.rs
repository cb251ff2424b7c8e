//! Wire format of snapshots.

pub use self::{opcode::*, reservation::*, sink::*, source::*};

mod opcode;
mod reservation;
mod sink;
mod source;
