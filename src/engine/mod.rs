//! Fork and merge.
//!
//! Both operations create a new branch and fill it with copies. Source
//! messages are never modified; each copy records where it came from in its
//! metadata.

mod copy;
mod fork;
mod merge;

pub use copy::CopyFailure;
pub use fork::{ForkEngine, ForkOutcome, ForkRequest};
pub use merge::{MergeEngine, MergeOutcome, MergeRequest};
