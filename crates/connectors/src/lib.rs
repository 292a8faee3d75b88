pub mod destination;
pub mod error;
pub mod fixture;
pub mod memory;
pub mod source;
