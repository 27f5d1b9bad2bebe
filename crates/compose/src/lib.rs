//! Compose lifecycle actions for service folders.
//!
//! The supervisor only talks to [`ComposeExecutor`]; [`DockerCompose`] is the
//! production implementation that shells out to `docker compose`.

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

mod docker;
mod error;
mod executor;
mod project;

pub use docker::DockerCompose;
pub use error::ComposeError;
pub use executor::{ComposeAction, ComposeExecutor};
pub use project::{compose_file_modified, find_compose_file, project_name, COMPOSE_FILE_NAMES};
