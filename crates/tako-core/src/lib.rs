//! Shared primitives for the Takobot cognitive runtime: workspace paths,
//! the instance lock, the `Event` type, the error taxonomy, and secret
//! masking. Every other `tako-*` crate depends on this one.

pub mod error;
pub mod event;
pub mod lock;
pub mod paths;
pub mod secret;

pub use error::{TakoError, TakoResult};
pub use event::{Event, Severity};
pub use lock::InstanceLock;
pub use paths::{RuntimePaths, find_workspace_root};
pub use secret::{mask_command_line, mask_secret};
