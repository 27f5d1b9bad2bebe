//! Recursive filesystem watcher for a services directory.
//!
//! Wraps `notify` so that the rest of the supervisor only ever sees a small,
//! closed set of event kinds ([`FsEventKind`]) on absolute paths, and so that
//! losing the watched root is reported instead of silently ending the stream.

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
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	deprecated
)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod error;
mod event;
mod watcher;

pub use error::{FsWatcherError, Result};
pub use event::{FsEvent, FsEventKind};
pub use watcher::{FsWatcher, FsWatcherConfig, WatcherMessage};
