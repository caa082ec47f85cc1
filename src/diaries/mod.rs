//! Interactive diary operations: save, edit and delete entries together with their images.

mod service;

pub use service::*;
