//! Request handlers

pub mod alerts;
pub mod compliance;
pub mod exports;
pub mod health;
