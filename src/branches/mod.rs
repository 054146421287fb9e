//! Branch registry.
//!
//! A branch is one of three structural variants (root, fork, merge) fixed at
//! creation. Its log holds only messages written under its own id; nothing is
//! inherited from a parent or merge source.

mod registry;

pub use registry::BranchRegistry;
