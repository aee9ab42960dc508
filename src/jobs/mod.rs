//! Job runners built on the dispatcher: folder moves and SMTP sends.

pub mod mover;
pub mod plan;
pub mod sender;

pub use mover::{run_move, MoveJob, MoveTarget};
pub use sender::{run_send, SendJob, SendMode};
