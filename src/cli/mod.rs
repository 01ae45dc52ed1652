//! CLI command handlers
//!
//! - Argument parsing structures
//! - Command routing and exit codes
//! - Logging setup
//! - Terminal progress display

pub mod args;
pub mod logging;
pub mod progress;
pub mod router;

pub use args::{Cli, Commands};
pub use logging::{get_log_level, init_logging};
pub use router::{execute_command, exit_code, EXIT_ERROR};
