//! Data models

pub mod alert;
pub mod export;

pub use alert::*;
pub use export::*;
