//! Turn lifecycle: seeding, running, approving, resuming.

pub mod service;

pub use service::{TurnError, TurnReply, TurnService};
