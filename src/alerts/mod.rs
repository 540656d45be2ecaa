//! Alert engine: lifecycle state machine, SLA policy, and correlation.

pub mod correlator;
pub mod lifecycle;
pub mod sla;

pub use lifecycle::AlertLifecycle;
