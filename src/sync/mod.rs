//! Replays the image outbox against object storage.

mod runner;

pub use runner::*;
