//! Daily reminder: persisted settings plus a re-arming alarm.

mod scheduler;
mod service;

pub use scheduler::*;
pub use service::*;
