pub mod budget;
pub mod extractor;
pub mod loader;
pub mod worker;
