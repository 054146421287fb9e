//! Message log.
//!
//! Every message belongs to exactly one branch. Within a branch messages are
//! ordered by creation time, with ties broken by insertion sequence.

mod log;

pub use log::MessageLog;
