pub mod error;
pub mod graph;
pub mod plan;
pub mod report;
pub mod validation;

pub use error::ConfigError;
pub use graph::{DependencyGraph, TopoOrder};
pub use plan::{MigrationPlan, PlanLevel, build_plan};
