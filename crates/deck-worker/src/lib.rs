//! Child Process Handle: owns at most one external worker process and
//! exposes line-level send/receive plus exit reporting.

pub mod channel;
pub mod process;
pub mod spec;

pub use channel::WorkerChannel;
pub use process::{WorkerOutput, WorkerProcess};
pub use spec::WorkerSpec;
