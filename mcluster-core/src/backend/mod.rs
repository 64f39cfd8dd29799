//! Environments bundled with the core.
//!
//! Real environments (container runtimes, cloud APIs) live in their own
//! crates and implement [`StateInspector`](crate::StateInspector) and
//! [`Actuator`](crate::Actuator) the same way.

pub mod memory;

pub use memory::MemoryEnvironment;
