//! The diary listing: one live query at a time, published as a state snapshot.

mod coordinator;

pub use coordinator::*;
