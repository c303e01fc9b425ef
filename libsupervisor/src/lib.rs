pub mod error;
pub mod process;
pub mod readiness;
pub mod strays;

// re-export selected public API
pub use error::{Result, SupervisorError};
pub use process::{CommandSpec, OutputPolicy, ProcessHandle, ProcessSpec, ProcessState, exit_code};
pub use readiness::Readiness;
pub use strays::kill_strays;
