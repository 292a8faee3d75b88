//! In-process source and destination used by the CLI demo and the tests.

pub mod destination;
pub mod fault;
pub mod source;

pub use destination::MemoryDestination;
pub use fault::{Fault, FaultPlan};
pub use source::MemorySource;
