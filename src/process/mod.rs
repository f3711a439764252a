// Process module - Guarded external process supervision

pub mod commandline;
mod exit;
mod guard;
pub mod platform;
pub mod spawner;
mod supervisor;

pub use exit::{classify, ExitKind, ExitVerdict};
pub use guard::{FatalHandler, RestartCallback};
pub use spawner::{spawn_process, SpawnedProcess};
pub use supervisor::{restart_callback, ProcessSupervisor};
