//! Background jobs.

mod leave_activator;

pub use leave_activator::*;
