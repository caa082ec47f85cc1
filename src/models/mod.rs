//! Data models for the DailyFlow service.
//!
//! Wire representations use camelCase to match the presentation layer.

mod diary;
mod outbox;
mod query;
mod reminder;

pub use diary::*;
pub use outbox::*;
pub use query::*;
pub use reminder::*;
