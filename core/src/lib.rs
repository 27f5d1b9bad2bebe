//! Supervisor for a directory of compose service folders.
//!
//! Every immediate subdirectory of the base path is a service. Filesystem
//! changes are attributed to their service, debounced per service and then
//! turned into `up`, `restart` or `down` actions, never more than one at a time
//! for the same service.

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::dbg_macro,
	deprecated
)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod config;
mod controller;
mod debouncer;
mod error;
mod reconcile;
mod registry;
mod service;
mod supervisor;

pub use config::{SupervisorConfig, DEFAULT_ACTION_TIMEOUT, DEFAULT_BASE_PATH, DEFAULT_WAIT};
pub use controller::Controller;
pub use debouncer::{classify, Debouncer};
pub use error::{ActionError, SupervisorError};
pub use reconcile::{reconcile, scan_services};
pub use registry::ServiceRegistry;
pub use service::{ChangeKind, LifecycleState, Service, ServiceChanged};
pub use supervisor::Supervisor;

pub use cs_compose::{ComposeAction, ComposeError, ComposeExecutor, DockerCompose};
pub use cs_fs_watcher::{FsWatcherConfig, FsWatcherError};
