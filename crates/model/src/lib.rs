pub mod catalog;
pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod pagination;
pub mod records;
