pub mod error;
pub mod handle;
pub mod report;
pub mod scheduler;
pub mod state;

pub use error::RunError;
pub use handle::{Connections, RunHandle, start_run};
pub use report::{RunReport, TableReport};
pub use state::RunState;
