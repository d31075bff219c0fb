//! Air-raid alert model, change detection and the source port.

pub mod diff;
pub mod source;
pub mod types;
