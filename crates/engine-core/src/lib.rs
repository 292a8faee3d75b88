pub mod control;
pub mod error;
pub mod metrics;
pub mod retry;
