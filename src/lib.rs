// Library exports for corepool

pub mod cli;
pub mod config;
pub mod error;
pub mod logs;
pub mod process;

pub use error::{CorePoolError, Result};
pub use process::{restart_callback, ProcessSupervisor};
