pub mod failure;
pub mod log;
pub mod status;
