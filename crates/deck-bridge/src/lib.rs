//! # deck-bridge
//!
//! Request/response correlation over the worker's single output stream.
//!
//! - [`registry`]: pending requests keyed by correlation id, with timeouts
//! - [`router`]: classifies worker output, resolves replies, broadcasts the rest
//! - [`dispatch`]: envelope construction plus `invoke` / `fire_and_forget`
//! - [`commands`]: the UI command surface, answering every command with JSON
//! - [`configs`]: named configuration files
//! - [`supervisor`]: the [`Bridge`] owning all of the above

pub mod commands;
pub mod configs;
pub mod dispatch;
pub mod registry;
pub mod router;
pub mod supervisor;

pub use commands::{needs_worker, CommandSurface, COMMANDS};
pub use configs::{ConfigStore, ConfigStoreError};
pub use dispatch::Dispatcher;
pub use registry::{CorrelationRegistry, PendingReply, Reply};
pub use router::Router;
pub use supervisor::{worker_spec, Bridge};
